//! Sink that prints each metric line to stdout.

use async_trait::async_trait;
use std::io::Write;

use chainmetrics_core::{Metric, MetricSink, WriteFailure};

pub struct StdoutSink;

#[async_trait]
impl MetricSink for StdoutSink {
    async fn write(&self, metrics: &[Metric]) -> Result<(), WriteFailure> {
        let mut out = std::io::stdout().lock();
        for (i, m) in metrics.iter().enumerate() {
            if let Err(e) = writeln!(out, "{m}") {
                return Err(WriteFailure {
                    failed_indices: (i..metrics.len()).collect(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}
