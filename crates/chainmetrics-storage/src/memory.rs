//! In-memory metric sink.
//!
//! Keeps every written point in RAM. Useful for tests and dry runs that
//! don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chainmetrics_core::{Metric, MetricSink, WriteFailure};

/// In-memory metric storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemorySink {
    metrics: Mutex<Vec<Metric>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every point written so far, in write order.
    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Points for one metric key (e.g. `"totalSupply"`), oldest first.
    pub fn series(&self, name: &str) -> Vec<Metric> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Most recent point for `name` with exactly `labels`.
    pub fn latest(&self, name: &str, labels: &BTreeMap<String, String>) -> Option<Metric> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|m| m.name == name && &m.labels == labels)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl MetricSink for InMemorySink {
    async fn write(&self, metrics: &[Metric]) -> Result<(), WriteFailure> {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(metrics);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, Utc};

    fn point(name: &str, network: &str, value: i64, ts: i64) -> Metric {
        Metric {
            name: name.to_string(),
            labels: BTreeMap::from([("network".to_string(), network.to_string())]),
            value: BigDecimal::from(value),
            timestamp: DateTime::<Utc>::from_timestamp(ts, 0).unwrap(),
            block_number: Some(ts as u64),
        }
    }

    #[tokio::test]
    async fn write_and_query_series() {
        let sink = InMemorySink::new();
        sink.write(&[point("totalSupply", "mainnet", 1, 100), point("paused", "mainnet", 0, 100)])
            .await
            .unwrap();
        sink.write(&[point("totalSupply", "mainnet", 2, 112)]).await.unwrap();

        assert_eq!(sink.len(), 3);
        let supply = sink.series("totalSupply");
        assert_eq!(supply.len(), 2);
        assert_eq!(supply[1].value, BigDecimal::from(2));
    }

    #[tokio::test]
    async fn latest_matches_labels() {
        let sink = InMemorySink::new();
        sink.write(&[
            point("totalSupply", "mainnet", 1, 100),
            point("totalSupply", "arbitrum", 7, 101),
            point("totalSupply", "mainnet", 3, 102),
        ])
        .await
        .unwrap();

        let labels = BTreeMap::from([("network".to_string(), "mainnet".to_string())]);
        assert_eq!(sink.latest("totalSupply", &labels).unwrap().value, BigDecimal::from(3));

        sink.clear();
        assert!(sink.is_empty());
        assert!(sink.latest("totalSupply", &labels).is_none());
    }
}
