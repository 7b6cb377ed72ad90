//! Per-request CSV telemetry.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::SecondsFormat;

use crate::error::{HarnessError, Result};
use crate::metrics::OutcomeRecord;

/// Column names, in order.
pub const HEADER: [&str; 5] = ["timestamp", "messageType", "latency_ms", "statusCode", "roomId"];

/// Writes one row per request outcome.
pub struct TelemetrySink {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

impl TelemetrySink {
    /// Create (or truncate) a CSV file, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path).map_err(|e| {
            HarnessError::Telemetry(format!("cannot create {}: {}", path.display(), e))
        })?;
        Self::from_writer(BufWriter::new(file))
    }

    /// Wrap any writer and emit the header row.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Result<Self> {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        let mut writer = csv::Writer::from_writer(boxed);
        writer.write_record(HEADER)?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, record: &OutcomeRecord) -> csv::Result<()> {
        let latency_ms = record.latency.as_nanos() as f64 / 1_000_000.0;
        self.writer.write_record([
            record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.kind.to_string(),
            format!("{:.3}", latency_ms),
            record.status.to_string(),
            record.room_id.clone(),
        ])
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
