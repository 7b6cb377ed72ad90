//! Load testing harness for the WebSocket chat service.
//!
//! This crate provides tools to:
//! - Generate a synthetic chat workload with per-user JOIN/TEXT/LEAVE lifecycles
//! - Drive it through a pool of workers holding per-room connections
//! - Collect latency percentiles, throughput windows and per-message telemetry
//! - Predict throughput from a warmup round trip measurement (Little's Law)
//! - Output results in multiple formats (console, JSON, CSV)

pub mod config;
pub mod connection;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod pool;
pub mod report;
pub mod request;
pub mod runner;
pub mod telemetry;
pub mod warmup;

pub use config::{MetricsConfig, RetryConfig, StatusPolicy, TestConfig, WorkloadConfig};
pub use connection::{Connection, Connector, WsConnector};
pub use error::{HarnessError, TransportError};
pub use generator::{UserState, WorkloadGenerator};
pub use metrics::{
    MetricsCollector, MetricsRecorder, OutcomeRecord, OutcomeStatus, Statistics, TestResults,
};
pub use pool::{PoolSummary, RetryPolicy, WorkerPool};
pub use report::ResultsReport;
pub use request::Request;
pub use runner::LoadRunner;
pub use telemetry::TelemetrySink;
pub use warmup::LittlesLaw;
