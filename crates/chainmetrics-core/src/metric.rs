use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One time-series point. The terminal artifact of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metric {
    pub name: String,
    /// Ordered so that series identity is stable across cycles.
    pub labels: BTreeMap<String, String>,
    pub value: BigDecimal,
    pub timestamp: DateTime<Utc>,
    pub block_number: Option<u64>,
}

impl Metric {
    /// Labels rendered as `k=v,k=v`, sorted by key.
    pub fn label_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{{{}}} {} @ {}",
            self.name,
            self.label_string(),
            self.value.normalized(),
            self.timestamp.to_rfc3339()
        )
    }
}
