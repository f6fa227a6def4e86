//! Decoded results → metric records.
//!
//! - [`MethodExporter`]: one field of one method → one metric
//! - [`DerivedMetric`]: two operands of the same cycle → one metric
//! - [`ContractExporter`]: every exporter of a contract, composed from
//!   descriptors alone

pub mod contract;
pub mod derived;
pub mod method;

use serde::Deserialize;

use crate::metric::Metric;

pub use contract::{ContractExporter, SKIP_METHODS};
pub use derived::{DerivedMetric, MathOp, Operand, SkipReason, SkipReport};
pub use method::{FieldSelector, MethodExporter, Selected};

/// What to do when a metric needs decimals nobody knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownScalePolicy {
    /// Suppress the metric and report a skip.
    #[default]
    Skip,
    /// Emit the raw integer.
    Unscaled,
}

/// Metrics produced in one export pass plus everything that was skipped.
#[derive(Debug, Clone, Default)]
pub struct ExportBatch {
    pub metrics: Vec<Metric>,
    pub skips: Vec<SkipReport>,
}

impl ExportBatch {
    pub fn extend(&mut self, other: ExportBatch) {
        self.metrics.extend(other.metrics);
        self.skips.extend(other.skips);
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.skips.is_empty()
    }
}
