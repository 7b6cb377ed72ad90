//! Worker pool replaying generated requests against the service.
//!
//! Workers share one input queue and nothing else. Each keeps a private
//! cache of connections keyed by room, so a room can have up to one open
//! connection per worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{RetryConfig, StatusPolicy};
use crate::connection::{Connection, Connector};
use crate::error::TransportError;
use crate::metrics::{MetricsRecorder, OutcomeRecord};
use crate::request::Request;

/// Retry budget and deadlines for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Applied separately to connect, write and read.
    pub io_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base_backoff.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: config.base_backoff(),
            io_timeout: config.io_timeout(),
        }
    }
}

/// Request queue shared by all workers.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<Request>>>;

/// Totals reported once every worker has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSummary {
    pub workers: usize,
    /// Requests taken off the queue, successful or not.
    pub processed: u64,
}

/// Fixed set of workers draining one queue.
pub struct WorkerPool {
    num_workers: usize,
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    status_policy: StatusPolicy,
}

impl WorkerPool {
    pub fn new(num_workers: usize, connector: Arc<dyn Connector>) -> Self {
        Self {
            num_workers: num_workers.max(1),
            connector,
            policy: RetryPolicy::default(),
            status_policy: StatusPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_status_policy(mut self, status_policy: StatusPolicy) -> Self {
        self.status_policy = status_policy;
        self
    }

    /// Drain `input` to exhaustion and wait for the last worker.
    ///
    /// `recorder` is dropped on return, so the collector can be finished
    /// right after.
    pub async fn run(&self, input: mpsc::Receiver<Request>, recorder: MetricsRecorder) -> PoolSummary {
        let queue: SharedQueue = Arc::new(Mutex::new(input));
        let mut handles = Vec::with_capacity(self.num_workers);

        for id in 0..self.num_workers {
            let worker = Worker {
                id,
                connector: self.connector.clone(),
                recorder: recorder.clone(),
                policy: self.policy,
                status_policy: self.status_policy,
                connections: HashMap::new(),
            };
            handles.push(tokio::spawn(worker.run(queue.clone())));
        }
        drop(recorder);

        let mut summary = PoolSummary {
            workers: self.num_workers,
            processed: 0,
        };
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(processed) => summary.processed += processed,
                Err(e) => error!(worker = id, error = %e, "Worker task failed"),
            }
        }

        info!(
            workers = summary.workers,
            processed = summary.processed,
            "Worker pool finished"
        );
        summary
    }
}

struct Worker {
    id: usize,
    connector: Arc<dyn Connector>,
    recorder: MetricsRecorder,
    policy: RetryPolicy,
    status_policy: StatusPolicy,
    connections: HashMap<String, Box<dyn Connection>>,
}

impl Worker {
    async fn run(mut self, queue: SharedQueue) -> u64 {
        let mut processed = 0;
        loop {
            let next = queue.lock().await.recv().await;
            let Some(request) = next else { break };
            self.process(request).await;
            processed += 1;
        }

        for (_, mut conn) in self.connections.drain() {
            conn.close().await;
        }
        debug!(worker = self.id, processed, "Worker finished");
        processed
    }

    /// Deliver one request, retrying until it succeeds or the budget runs out.
    async fn process(&mut self, request: Request) {
        let attempts = self.policy.max_retries + 1;

        for attempt in 0..attempts {
            match self.attempt(&request).await {
                Ok((sent_at, latency)) => {
                    self.recorder
                        .record(OutcomeRecord::ok(&request, sent_at, latency))
                        .await;
                    return;
                }
                Err(e) => {
                    warn!(
                        worker = self.id,
                        room = %request.room_id,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Send failed"
                    );
                    // Transport state is unknown after a failure
                    self.evict(&request.room_id).await;

                    if attempt + 1 == attempts {
                        self.recorder.record(OutcomeRecord::error(&request)).await;
                    } else {
                        self.recorder.record_retry(&request).await;
                        sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }
    }

    /// One send/receive round trip. Latency excludes connection setup.
    async fn attempt(
        &mut self,
        request: &Request,
    ) -> Result<(chrono::DateTime<Utc>, Duration), TransportError> {
        let io_timeout = self.policy.io_timeout;
        let strict = self.status_policy == StatusPolicy::Strict;
        let message = request.to_message();

        if !self.connections.contains_key(&request.room_id) {
            let conn = timeout(io_timeout, self.connector.connect(&request.room_id))
                .await
                .map_err(|_| TransportError::timeout("connect", io_timeout))??;
            self.recorder.record_connection(request).await;
            self.connections.insert(request.room_id.clone(), conn);
        }
        let conn = self
            .connections
            .get_mut(&request.room_id)
            .ok_or(TransportError::Closed)?;

        let sent_at = Utc::now();
        let started = Instant::now();

        timeout(io_timeout, conn.send(&message))
            .await
            .map_err(|_| TransportError::timeout("write", io_timeout))??;
        let response = timeout(io_timeout, conn.receive())
            .await
            .map_err(|_| TransportError::timeout("read", io_timeout))??;
        let latency = started.elapsed();

        if strict && !response.is_ok() {
            return Err(TransportError::Rejected(
                response.error.unwrap_or_else(|| "status ERROR".to_string()),
            ));
        }
        Ok((sent_at, latency))
    }

    async fn evict(&mut self, room_id: &str) {
        if let Some(mut conn) = self.connections.remove(room_id) {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::{MetricsCollector, Statistics};
    use async_trait::async_trait;
    use chat_protocol::{ChatMessage, MessageType, ServerResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted transport: every read fails, or every reply has a status.
    #[derive(Default)]
    struct ScriptedConnector {
        fail_reads: bool,
        reject: bool,
        connects: AtomicUsize,
        closes: Arc<AtomicUsize>,
        attempts: Arc<StdMutex<Vec<Instant>>>,
    }

    struct ScriptedConnection {
        fail_reads: bool,
        reject: bool,
        last: Option<ChatMessage>,
        closes: Arc<AtomicUsize>,
        attempts: Arc<StdMutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _room_id: &str) -> Result<Box<dyn Connection>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                fail_reads: self.fail_reads,
                reject: self.reject,
                last: None,
                closes: self.closes.clone(),
                attempts: self.attempts.clone(),
            }))
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&mut self, message: &ChatMessage) -> Result<(), TransportError> {
            self.attempts.lock().unwrap().push(Instant::now());
            self.last = Some(message.clone());
            Ok(())
        }

        async fn receive(&mut self) -> Result<ServerResponse, TransportError> {
            if self.fail_reads {
                return Err(TransportError::Read("induced".to_string()));
            }
            let message = self.last.take().ok_or(TransportError::Closed)?;
            if self.reject {
                Ok(ServerResponse::rejected(&message, "rejected"))
            } else {
                Ok(ServerResponse::ok(&message))
            }
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Connector whose dial never succeeds.
    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, room_id: &str) -> Result<Box<dyn Connection>, TransportError> {
            Err(TransportError::connect(format!("stub/{}", room_id), "refused"))
        }
    }

    fn request(room: &str) -> Request {
        Request {
            user_id: 1,
            username: "user1".to_string(),
            message: "Ping".to_string(),
            timestamp: Utc::now(),
            kind: MessageType::Text,
            room_id: room.to_string(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(1),
            io_timeout: Duration::from_millis(100),
        }
    }

    async fn run_pool(pool: &WorkerPool, requests: Vec<Request>) -> (PoolSummary, Statistics) {
        let collector = MetricsCollector::start(&MetricsConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(requests.len().max(1));
        for request in requests {
            tx.send(request).await.unwrap();
        }
        drop(tx);

        let summary = pool.run(rx, collector.recorder()).await;
        let stats = collector.finish().await.unwrap();
        (summary, stats)
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (0..5).map(|a| policy.backoff(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
        assert_eq!(policy.backoff(64), Duration::MAX);
    }

    #[tokio::test]
    async fn test_connections_are_reused_per_room() {
        let connector = Arc::new(ScriptedConnector::default());
        let pool = WorkerPool::new(1, connector.clone()).with_retry_policy(fast_policy());

        let requests = vec![request("1"), request("2"), request("1"), request("1")];
        let (summary, stats) = run_pool(&pool, requests).await;

        assert_eq!(summary.processed, 4);
        assert_eq!(stats.success, 4);
        assert_eq!(stats.connections, 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        // Cached connections are closed when the queue is exhausted
        assert_eq!(connector.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_record_one_error() {
        let connector = Arc::new(ScriptedConnector {
            fail_reads: true,
            ..Default::default()
        });
        let pool = WorkerPool::new(1, connector.clone()).with_retry_policy(RetryPolicy::default());

        let (summary, stats) = run_pool(&pool, vec![request("3")]).await;

        assert_eq!(summary.processed, 1);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.fail, 1);
        assert_eq!(stats.success, 0);
        assert_eq!(stats.retries, 5);
        // Every failure evicts, so every attempt dials again
        assert_eq!(stats.connections, 6);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 6);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 6);

        let attempts = connector.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 6);
        let gaps: Vec<u128> = attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![100, 200, 400, 800, 1600]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_worker() {
        let pool = WorkerPool::new(2, Arc::new(RefusingConnector)).with_retry_policy(RetryPolicy {
            max_retries: 1,
            ..fast_policy()
        });

        let requests = (0..5).map(|i| request(&i.to_string())).collect();
        let (summary, stats) = run_pool(&pool, requests).await;

        assert_eq!(summary.processed, 5);
        assert_eq!(stats.fail, 5);
        assert_eq!(stats.retries, 5);
        assert_eq!(stats.connections, 0);
    }

    #[tokio::test]
    async fn test_lenient_policy_counts_rejections_as_success() {
        let connector = Arc::new(ScriptedConnector {
            reject: true,
            ..Default::default()
        });
        let pool = WorkerPool::new(1, connector).with_retry_policy(fast_policy());

        let (_, stats) = run_pool(&pool, vec![request("1"), request("2")]).await;
        assert_eq!(stats.success, 2);
        assert_eq!(stats.fail, 0);
        assert_eq!(stats.retries, 0);
    }

    #[tokio::test]
    async fn test_strict_policy_retries_rejections() {
        let connector = Arc::new(ScriptedConnector {
            reject: true,
            ..Default::default()
        });
        let pool = WorkerPool::new(1, connector)
            .with_retry_policy(RetryPolicy {
                max_retries: 2,
                ..fast_policy()
            })
            .with_status_policy(StatusPolicy::Strict);

        let (_, stats) = run_pool(&pool, vec![request("1")]).await;
        assert_eq!(stats.fail, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.connections, 3);
    }

    #[tokio::test]
    async fn test_work_is_shared_not_broadcast() {
        let connector = Arc::new(ScriptedConnector::default());
        let pool = WorkerPool::new(4, connector.clone()).with_retry_policy(fast_policy());

        let requests = (0..40).map(|i| request(&(i % 3).to_string())).collect();
        let (summary, stats) = run_pool(&pool, requests).await;

        assert_eq!(summary.workers, 4);
        assert_eq!(summary.processed, 40);
        assert_eq!(stats.total, 40);
        assert_eq!(stats.success, 40);
        // At most one connection per (worker, room)
        assert!(stats.connections <= 12);
    }
}
