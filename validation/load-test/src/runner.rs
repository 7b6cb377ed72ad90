//! Load test orchestration.
//!
//! Wires the pipeline together: generator -> bounded queue -> worker pool
//! -> collector. The runner waits for the pool, then closes and drains the
//! collector before building results.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::TestConfig;
use crate::connection::{Connector, WsConnector};
use crate::generator::WorkloadGenerator;
use crate::metrics::{MetricsCollector, TestResults};
use crate::pool::{RetryPolicy, WorkerPool};
use crate::telemetry::TelemetrySink;
use crate::warmup::{self, LittlesLaw};

/// Executes one load test scenario.
pub struct LoadRunner {
    config: TestConfig,
    connector: Arc<dyn Connector>,
    show_progress: bool,
}

impl LoadRunner {
    /// Create a new load runner talking WebSocket to the configured service.
    pub fn new(config: TestConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.service_address.clone()));
        Self {
            config,
            connector,
            show_progress: true,
        }
    }

    /// Replace the transport.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Run the load test.
    pub async fn run(&self) -> anyhow::Result<TestResults> {
        let config = &self.config;
        config.validate()?;

        let prediction = match &config.warmup {
            Some(warmup) => self.warmup(warmup.messages_per_worker).await,
            None => None,
        };

        info!(
            name = %config.name,
            address = %config.service_address,
            workers = config.workers,
            messages = config.total_messages,
            "Starting main phase"
        );

        let sink = config
            .metrics
            .telemetry_csv
            .as_ref()
            .map(TelemetrySink::create)
            .transpose()
            .context("Failed to create telemetry sink")?;
        let pb = self.progress_bar()?;
        let collector = MetricsCollector::spawn(&config.metrics, sink, Some(pb.clone()))?;

        let generator = WorkloadGenerator::new(config.workload.clone());
        let (generator_handle, queue) = generator.spawn(config.total_messages);

        let pool = WorkerPool::new(config.workers, self.connector.clone())
            .with_retry_policy(RetryPolicy::from(&config.retry))
            .with_status_policy(config.status_policy);

        let wall = Instant::now();
        let summary = pool.run(queue, collector.recorder()).await;
        let wall = wall.elapsed();

        let generated = generator_handle.await.context("Generator task failed")?;
        let mut stats = collector.finish().await?;
        pb.finish_with_message("Complete!");

        info!(
            generated,
            processed = summary.processed,
            wall_secs = wall.as_secs_f64(),
            "Main phase complete"
        );

        Ok(stats.results(config.name.clone(), config.workers, prediction))
    }

    async fn warmup(&self, messages_per_worker: u64) -> Option<LittlesLaw> {
        info!(
            workers = self.config.workers,
            messages_per_worker, "Starting warmup phase"
        );
        let report = warmup::run(
            self.connector.clone(),
            self.config.workers,
            messages_per_worker,
            self.config.retry.io_timeout(),
        )
        .await;

        let prediction = report.prediction();
        if let Some(law) = &prediction {
            info!(
                workers = law.concurrency,
                estimated_rtt_secs = law.estimated_rtt_secs,
                predicted_throughput = law.predicted_throughput,
                "Little's Law prediction"
            );
        }
        prediction
    }

    fn progress_bar(&self) -> anyhow::Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new(self.config.total_messages);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} msgs {per_sec} {msg}")?
                .progress_chars("##-"),
        );
        Ok(pb)
    }
}
