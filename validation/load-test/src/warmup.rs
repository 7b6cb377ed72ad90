//! Warmup phase and Little's Law throughput prediction.
//!
//! With `L` workers each doing strictly sequential round trips of mean
//! duration `W`, the expected arrival rate is `λ = L / W`.

use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{ChatMessage, MessageType};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::connection::Connector;
use crate::error::TransportError;

const WARMUP_ROOM: &str = "1";

/// Throughput predicted from a measured round-trip time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LittlesLaw {
    /// L: requests in flight (one per worker).
    pub concurrency: usize,
    /// W: estimated round-trip time in seconds.
    pub estimated_rtt_secs: f64,
    /// λ = L / W, requests per second.
    pub predicted_throughput: f64,
}

impl LittlesLaw {
    /// Predict from `round_trips` sequential round trips per worker taking
    /// `elapsed` wall time in total.
    pub fn predict(concurrency: usize, elapsed: Duration, round_trips: u64) -> Option<Self> {
        if round_trips == 0 || elapsed.is_zero() {
            return None;
        }
        let rtt = elapsed.as_secs_f64() / round_trips as f64;
        Some(Self {
            concurrency,
            estimated_rtt_secs: rtt,
            predicted_throughput: concurrency as f64 / rtt,
        })
    }

    /// L = λ · W for an observed run.
    pub fn implied_concurrency(throughput: f64, mean_latency: Duration) -> f64 {
        throughput * mean_latency.as_secs_f64()
    }

    /// Observed over predicted throughput.
    pub fn accuracy(&self, observed_throughput: f64) -> f64 {
        if self.predicted_throughput > 0.0 {
            observed_throughput / self.predicted_throughput
        } else {
            0.0
        }
    }
}

/// Outcome of the warmup phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupReport {
    pub elapsed: Duration,
    pub workers: usize,
    pub failed_workers: usize,
    pub round_trips: u64,
}

impl WarmupReport {
    pub fn prediction(&self) -> Option<LittlesLaw> {
        let per_worker = self.round_trips / self.workers.max(1) as u64;
        LittlesLaw::predict(self.workers, self.elapsed, per_worker)
    }
}

fn warmup_message() -> ChatMessage {
    ChatMessage {
        user_id: "123".to_string(),
        username: "testuser".to_string(),
        message: "warmup message".to_string(),
        timestamp: Utc::now(),
        message_type: MessageType::Text,
    }
}

/// Run `workers` connections in parallel, each doing `messages_per_worker`
/// sequential round trips. A worker stops at its first failure.
pub async fn run(
    connector: Arc<dyn Connector>,
    workers: usize,
    messages_per_worker: u64,
    io_timeout: Duration,
) -> WarmupReport {
    let started = Instant::now();
    let mut handles = Vec::with_capacity(workers);

    for id in 0..workers {
        let connector = connector.clone();
        handles.push(tokio::spawn(async move {
            let result = warm_connection(connector.as_ref(), messages_per_worker, io_timeout).await;
            if let Err((done, e)) = &result {
                warn!(worker = id, completed = done, error = %e, "Warmup worker stopped");
            }
            result
        }));
    }

    let mut report = WarmupReport {
        elapsed: Duration::ZERO,
        workers,
        failed_workers: 0,
        round_trips: 0,
    };
    for handle in handles {
        match handle.await {
            Ok(Ok(done)) => report.round_trips += done,
            Ok(Err((done, _))) => {
                report.round_trips += done;
                report.failed_workers += 1;
            }
            Err(_) => report.failed_workers += 1,
        }
    }
    report.elapsed = started.elapsed();

    info!(
        elapsed_secs = report.elapsed.as_secs_f64(),
        round_trips = report.round_trips,
        failed_workers = report.failed_workers,
        "Warmup finished"
    );
    report
}

async fn warm_connection(
    connector: &dyn Connector,
    messages: u64,
    io_timeout: Duration,
) -> Result<u64, (u64, TransportError)> {
    let mut conn = timeout(io_timeout, connector.connect(WARMUP_ROOM))
        .await
        .map_err(|_| (0, TransportError::timeout("connect", io_timeout)))?
        .map_err(|e| (0, e))?;

    let message = warmup_message();
    let mut done = 0;
    while done < messages {
        let step = async {
            timeout(io_timeout, conn.send(&message))
                .await
                .map_err(|_| TransportError::timeout("write", io_timeout))??;
            timeout(io_timeout, conn.receive())
                .await
                .map_err(|_| TransportError::timeout("read", io_timeout))??;
            Ok::<_, TransportError>(())
        };
        if let Err(e) = step.await {
            conn.close().await;
            return Err((done, e));
        }
        done += 1;
    }

    conn.close().await;
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WsConnector;
    use test_utils::{unused_address, Behavior, StubService};

    #[test]
    fn test_predict_throughput() {
        // 32 workers, 1000 round trips each in 2s: W = 2ms, λ = 16000/s
        let law = LittlesLaw::predict(32, Duration::from_secs(2), 1_000).unwrap();
        assert!((law.estimated_rtt_secs - 0.002).abs() < 1e-12);
        assert!((law.predicted_throughput - 16_000.0).abs() < 1e-6);
        assert!((law.accuracy(8_000.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_predict_needs_samples() {
        assert!(LittlesLaw::predict(4, Duration::ZERO, 10).is_none());
        assert!(LittlesLaw::predict(4, Duration::from_secs(1), 0).is_none());
    }

    #[test]
    fn test_implied_concurrency() {
        let l = LittlesLaw::implied_concurrency(500.0, Duration::from_millis(20));
        assert!((l - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_warmup_against_stub() {
        let service = StubService::spawn(Behavior::echo_after_ms(1)).await.unwrap();
        let connector = Arc::new(WsConnector::new(service.address()));

        let report = run(connector, 3, 10, Duration::from_secs(5)).await;

        assert_eq!(report.round_trips, 30);
        assert_eq!(report.failed_workers, 0);
        assert_eq!(service.connections(), 3);
        let law = report.prediction().unwrap();
        assert_eq!(law.concurrency, 3);
        assert!(law.estimated_rtt_secs >= 0.001);
    }

    #[tokio::test]
    async fn test_warmup_tolerates_unreachable_service() {
        let connector = Arc::new(WsConnector::new(unused_address().await.unwrap()));
        let report = run(connector, 2, 10, Duration::from_secs(1)).await;

        assert_eq!(report.failed_workers, 2);
        assert_eq!(report.round_trips, 0);
        assert!(report.prediction().is_none());
    }
}
