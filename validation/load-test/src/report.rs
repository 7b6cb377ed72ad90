//! Results reporting and formatting.

use crate::metrics::TestResults;
use crate::warmup::LittlesLaw;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(results: &TestResults) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.config_name)]);

        table.add_row(vec!["Duration:", &format!("{:.2}s", results.duration_secs)]);
        table.add_row(vec!["Total Messages:", &results.total_requests.to_string()]);
        table.add_row(vec!["Successful:", &results.successful_requests.to_string()]);
        table.add_row(vec!["Failed:", &results.failed_requests.to_string()]);
        table.add_row(vec!["Success Rate:", &format!("{:.1}%", results.success_rate())]);
        table.add_row(vec![
            "Throughput:",
            &format!("{:.2} msg/s", results.requests_per_second),
        ]);
        table.add_row(vec!["Connections:", &results.connections.to_string()]);
        table.add_row(vec!["Retries:", &results.retries.to_string()]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "min / mean / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.2} / {:.2} / {:.2}",
                results.latency_min, results.latency_mean, results.latency_max
            ),
        ]);
        table.add_row(vec!["", "p50 / p90 / p95 / p99 / p99.9"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.2} / {:.2} / {:.2} / {:.2} / {:.2}",
                results.latency_p50,
                results.latency_p90,
                results.latency_p95,
                results.latency_p99,
                results.latency_p999
            ),
        ]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Message Types", "count (share)"]);
        for (kind, count, share) in Self::type_distribution(results) {
            table.add_row(vec![kind, format!("{} ({:.1}%)", count, share)]);
        }

        if !results.throughput_buckets.is_empty() {
            table.add_row(vec!["", ""]);
            table.add_row(vec!["Throughput (msg/s)", "per window"]);
            for bucket in &results.throughput_buckets {
                let label = bucket
                    .start_time()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| bucket.start.to_string());
                table.add_row(vec![label, format!("{:.1}", bucket.per_second)]);
            }
        }

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Little's Law", ""]);
        table.add_row(vec!["Workers (L):", &results.concurrency.to_string()]);
        table.add_row(vec![
            "Observed L = λ·W:",
            &format!("{:.2}", results.observed_concurrency),
        ]);
        if let Some(law) = &results.prediction {
            for (label, value) in Self::prediction_rows(law, results.requests_per_second) {
                table.add_row(vec![label, value]);
            }
        }

        table.to_string()
    }

    /// Successful messages per type with their share of all successes.
    pub fn type_distribution(results: &TestResults) -> Vec<(String, u64, f64)> {
        let successes: u64 = results.kind_counts.values().sum();
        results
            .kind_counts
            .iter()
            .map(|(kind, &count)| {
                let share = if successes > 0 {
                    count as f64 / successes as f64 * 100.0
                } else {
                    0.0
                };
                (kind.clone(), count, share)
            })
            .collect()
    }

    fn prediction_rows(law: &LittlesLaw, observed: f64) -> Vec<(String, String)> {
        vec![
            (
                "Estimated RTT (W):".to_string(),
                format!("{:.5}s", law.estimated_rtt_secs),
            ),
            (
                "Predicted λ = L / W:".to_string(),
                format!("{:.2} msg/s", law.predicted_throughput),
            ),
            (
                "Observed / Predicted:".to_string(),
                format!("{:.1}%", law.accuracy(observed) * 100.0),
            ),
        ]
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &TestResults) -> String {
        format!(
            "{},{},{:.2},{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{},{}",
            results.timestamp,
            results.config_name,
            results.duration_secs,
            results.total_requests,
            results.successful_requests,
            results.failed_requests,
            results.requests_per_second,
            results.latency_mean,
            results.latency_p50,
            results.latency_p95,
            results.latency_p99,
            results.connections,
            results.retries
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,config,duration,total,success,fail,rps,mean,p50,p95,p99,connections,retries"
    }
}
