//! Outcome aggregation.
//!
//! Workers never touch [`Statistics`] directly. They push [`OutcomeRecord`]s
//! through a [`MetricsRecorder`] into one consumer task that owns the
//! statistics; callers get them back from [`MetricsCollector::finish`] once
//! the intake is closed and drained.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chat_protocol::MessageType;
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MetricsConfig;
use crate::error::{HarnessError, Result};
use crate::request::Request;
use crate::telemetry::TelemetrySink;
use crate::warmup::LittlesLaw;

/// What an outcome record reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// The request got a reply.
    #[serde(rename = "OK")]
    Ok,
    /// The request failed on every attempt.
    #[serde(rename = "ERROR")]
    Error,
    /// A worker opened a new connection.
    #[serde(rename = "CONN_NEW")]
    ConnNew,
    /// A worker is about to retry a request.
    #[serde(rename = "RETRY")]
    Retry,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Ok => "OK",
            OutcomeStatus::Error => "ERROR",
            OutcomeStatus::ConnNew => "CONN_NEW",
            OutcomeStatus::Retry => "RETRY",
        }
    }

    /// Connection and retry events are counted apart from requests.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(self, OutcomeStatus::ConnNew | OutcomeStatus::Retry)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt-level event emitted by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: MessageType,
    pub room_id: String,
    pub latency: Duration,
    pub status: OutcomeStatus,
}

impl OutcomeRecord {
    /// Successful round trip that started at `sent_at`.
    pub fn ok(request: &Request, sent_at: DateTime<Utc>, latency: Duration) -> Self {
        Self::new(request, sent_at, latency, OutcomeStatus::Ok)
    }

    /// Terminal failure, stamped with the request's generation time.
    pub fn error(request: &Request) -> Self {
        Self::new(request, request.timestamp, Duration::ZERO, OutcomeStatus::Error)
    }

    pub fn connection(request: &Request) -> Self {
        Self::new(request, Utc::now(), Duration::ZERO, OutcomeStatus::ConnNew)
    }

    pub fn retry(request: &Request) -> Self {
        Self::new(request, Utc::now(), Duration::ZERO, OutcomeStatus::Retry)
    }

    fn new(
        request: &Request,
        timestamp: DateTime<Utc>,
        latency: Duration,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            timestamp,
            kind: request.kind,
            room_id: request.room_id.clone(),
            latency,
            status,
        }
    }
}

/// Nearest-rank latency percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Percentiles {
    pub median: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Successful requests within one fixed-width time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputBucket {
    /// Window start, unix seconds.
    pub start: i64,
    pub count: u64,
    /// `count` divided by the window width.
    pub per_second: f64,
}

impl ThroughputBucket {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.start, 0)
    }
}

/// Aggregate statistics, owned by the collector task.
pub struct Statistics {
    pub total: u64,
    pub success: u64,
    pub fail: u64,
    pub connections: u64,
    pub retries: u64,
    latency_sum: Duration,
    latency_min: Option<Duration>,
    latency_max: Option<Duration>,
    latencies: Vec<Duration>,
    histogram: Histogram<u64>,
    by_kind: HashMap<MessageType, u64>,
    by_room: HashMap<String, u64>,
    buckets: BTreeMap<i64, u64>,
    bucket_width_secs: i64,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Statistics {
    /// Empty statistics with throughput buckets `bucket_width_secs` wide.
    pub fn new(bucket_width_secs: u32) -> Result<Self> {
        let histogram = Histogram::new(3).map_err(|e| HarnessError::Collector(format!("{:?}", e)))?;

        Ok(Self {
            total: 0,
            success: 0,
            fail: 0,
            connections: 0,
            retries: 0,
            latency_sum: Duration::ZERO,
            latency_min: None,
            latency_max: None,
            latencies: Vec::new(),
            histogram,
            by_kind: HashMap::new(),
            by_room: HashMap::new(),
            buckets: BTreeMap::new(),
            bucket_width_secs: i64::from(bucket_width_secs.max(1)),
            started_at: Utc::now(),
            finished_at: None,
        })
    }

    /// Fold one record into the statistics.
    pub fn ingest(&mut self, record: &OutcomeRecord) {
        match record.status {
            OutcomeStatus::ConnNew => self.connections += 1,
            OutcomeStatus::Retry => self.retries += 1,
            OutcomeStatus::Ok => {
                self.total += 1;
                self.success += 1;

                let latency = record.latency;
                self.latency_sum += latency;
                self.latency_min = Some(self.latency_min.map_or(latency, |m| m.min(latency)));
                self.latency_max = Some(self.latency_max.map_or(latency, |m| m.max(latency)));
                self.latencies.push(latency);
                self.histogram.record(latency.as_micros() as u64).ok();

                *self.by_kind.entry(record.kind).or_default() += 1;
                *self.by_room.entry(record.room_id.clone()).or_default() += 1;

                let bucket = record.timestamp.timestamp().div_euclid(self.bucket_width_secs)
                    * self.bucket_width_secs;
                *self.buckets.entry(bucket).or_default() += 1;
            }
            OutcomeStatus::Error => {
                self.total += 1;
                self.fail += 1;
            }
        }
    }

    /// Median, p95 and p99 of successful latencies, all zero when empty.
    ///
    /// Sorts the sample set in place; repeated calls return the same values.
    pub fn percentiles(&mut self) -> Percentiles {
        let n = self.latencies.len();
        if n == 0 {
            return Percentiles::default();
        }
        self.latencies.sort_unstable();

        let at = |q: f64| self.latencies[((n as f64 * q) as usize).min(n - 1)];
        Percentiles {
            median: self.latencies[n / 2],
            p95: at(0.95),
            p99: at(0.99),
        }
    }

    /// Latency at `quantile` from the HDR histogram (microsecond precision).
    pub fn histogram_quantile(&self, quantile: f64) -> Duration {
        if self.histogram.len() == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.histogram.value_at_quantile(quantile))
    }

    /// Throughput windows sorted by start time.
    pub fn throughput_buckets(&self) -> Vec<ThroughputBucket> {
        self.buckets
            .iter()
            .map(|(&start, &count)| ThroughputBucket {
                start,
                count,
                per_second: count as f64 / self.bucket_width_secs as f64,
            })
            .collect()
    }

    pub fn latency_min(&self) -> Duration {
        self.latency_min.unwrap_or_default()
    }

    pub fn latency_max(&self) -> Duration {
        self.latency_max.unwrap_or_default()
    }

    pub fn latency_mean(&self) -> Duration {
        if self.success == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.latency_sum.as_nanos() / u128::from(self.success)) as u64)
    }

    /// Number of latency samples kept for percentiles.
    pub fn samples(&self) -> usize {
        self.latencies.len()
    }

    pub fn count_for_kind(&self, kind: MessageType) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn count_for_room(&self, room_id: &str) -> u64 {
        self.by_room.get(room_id).copied().unwrap_or(0)
    }

    pub fn rooms(&self) -> usize {
        self.by_room.len()
    }

    /// Collector lifetime: start to drain, or start to now while running.
    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    /// Successful requests per second over the collector lifetime.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.success as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Generate final test results.
    pub fn results(
        &mut self,
        config_name: String,
        concurrency: usize,
        prediction: Option<LittlesLaw>,
    ) -> TestResults {
        let percentiles = self.percentiles();
        let throughput = self.throughput();
        let mean = self.latency_mean();
        let kind_counts = MessageType::ALL
            .iter()
            .map(|kind| (kind.to_string(), self.count_for_kind(*kind)))
            .collect();

        TestResults {
            timestamp: Utc::now().to_rfc3339(),
            config_name,
            duration_secs: self.duration().as_secs_f64(),
            total_requests: self.total,
            successful_requests: self.success,
            failed_requests: self.fail,
            connections: self.connections,
            retries: self.retries,
            requests_per_second: throughput,
            latency_mean: millis(mean),
            latency_min: millis(self.latency_min()),
            latency_max: millis(self.latency_max()),
            latency_p50: millis(percentiles.median),
            latency_p75: millis(self.histogram_quantile(0.75)),
            latency_p90: millis(self.histogram_quantile(0.90)),
            latency_p95: millis(percentiles.p95),
            latency_p99: millis(percentiles.p99),
            latency_p999: millis(self.histogram_quantile(0.999)),
            kind_counts,
            rooms: self.rooms(),
            throughput_buckets: self.throughput_buckets(),
            concurrency,
            observed_concurrency: LittlesLaw::implied_concurrency(throughput, mean),
            prediction,
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Final test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub timestamp: String,
    pub config_name: String,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub connections: u64,
    pub retries: u64,
    pub requests_per_second: f64,

    // Latency (ms)
    pub latency_mean: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_p50: f64,
    pub latency_p75: f64,
    pub latency_p90: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub latency_p999: f64,

    // Distribution
    pub kind_counts: BTreeMap<String, u64>,
    pub rooms: usize,
    pub throughput_buckets: Vec<ThroughputBucket>,

    // Little's Law
    pub concurrency: usize,
    pub observed_concurrency: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<LittlesLaw>,
}

impl TestResults {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64 * 100.0
    }
}

/// Producer handle for outcome records. Cheap to clone, one per worker.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    tx: mpsc::Sender<OutcomeRecord>,
}

impl MetricsRecorder {
    pub async fn record(&self, record: OutcomeRecord) {
        if self.tx.send(record).await.is_err() {
            warn!("Collector is gone, dropping outcome record");
        }
    }

    pub async fn record_connection(&self, request: &Request) {
        self.record(OutcomeRecord::connection(request)).await;
    }

    pub async fn record_retry(&self, request: &Request) {
        self.record(OutcomeRecord::retry(request)).await;
    }
}

/// Single consumer that owns [`Statistics`] while the test runs.
pub struct MetricsCollector {
    tx: mpsc::Sender<OutcomeRecord>,
    handle: JoinHandle<Statistics>,
}

impl MetricsCollector {
    /// Start the collector, opening the telemetry CSV if one is configured.
    pub fn start(config: &MetricsConfig) -> Result<Self> {
        let sink = config
            .telemetry_csv
            .as_ref()
            .map(TelemetrySink::create)
            .transpose()?;
        Self::spawn(config, sink, None)
    }

    /// Start the collector with an explicit sink and progress bar.
    pub fn spawn(
        config: &MetricsConfig,
        sink: Option<TelemetrySink>,
        progress: Option<ProgressBar>,
    ) -> Result<Self> {
        let stats = Statistics::new(config.bucket_width_secs)?;
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));
        let handle = tokio::spawn(consume(rx, stats, sink, progress));
        Ok(Self { tx, handle })
    }

    /// A producer handle for one worker.
    pub fn recorder(&self) -> MetricsRecorder {
        MetricsRecorder {
            tx: self.tx.clone(),
        }
    }

    /// Close the intake and wait for the drained, finalized statistics.
    ///
    /// Returns once every outstanding [`MetricsRecorder`] has been dropped.
    pub async fn finish(self) -> Result<Statistics> {
        let Self { tx, handle } = self;
        drop(tx);
        handle
            .await
            .map_err(|e| HarnessError::Collector(e.to_string()))
    }
}

async fn consume(
    mut rx: mpsc::Receiver<OutcomeRecord>,
    mut stats: Statistics,
    mut sink: Option<TelemetrySink>,
    progress: Option<ProgressBar>,
) -> Statistics {
    while let Some(record) = rx.recv().await {
        stats.ingest(&record);
        if record.status.is_bookkeeping() {
            continue;
        }

        if let Some(pb) = &progress {
            pb.inc(1);
        }
        if let Some(writer) = sink.as_mut() {
            if let Err(e) = writer.write(&record) {
                warn!(error = %e, "Telemetry write failed, disabling sink");
                sink = None;
            }
        }
    }

    if let Some(mut writer) = sink {
        if let Err(e) = writer.flush() {
            warn!(error = %e, "Telemetry flush failed");
        }
    }
    stats.finish();
    debug!(total = stats.total, "Collector drained");
    stats
}
