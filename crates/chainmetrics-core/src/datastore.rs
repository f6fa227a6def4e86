//! The time-series sink boundary and non-blocking write dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::WriteFailure;
use crate::metric::Metric;

/// Persists metric points.
///
/// Implementations report which rows failed; the core never retries.
#[async_trait]
pub trait MetricSink: Send + Sync + 'static {
    async fn write(&self, metrics: &[Metric]) -> Result<(), WriteFailure>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Result of one spawned write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub cycle: u64,
    pub attempted: usize,
    pub failure: Option<WriteFailure>,
}

impl WriteOutcome {
    pub fn written(&self) -> usize {
        self.attempted
            - self
                .failure
                .as_ref()
                .map_or(0, |f| f.failed_indices.len().min(self.attempted))
    }
}

/// Hands batches to a sink on background tasks so a slow datastore never
/// delays the next cycle.
#[derive(Clone)]
pub struct SinkDispatcher {
    sink: Arc<dyn MetricSink>,
    outcomes: Option<mpsc::UnboundedSender<WriteOutcome>>,
}

impl SinkDispatcher {
    pub fn new(sink: Arc<dyn MetricSink>) -> Self {
        Self { sink, outcomes: None }
    }

    /// Also publish every outcome on `tx`.
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<WriteOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// Spawns the write. The handle may be awaited or dropped.
    pub fn dispatch(&self, cycle: u64, metrics: Vec<Metric>) -> JoinHandle<WriteOutcome> {
        let sink = self.sink.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let attempted = metrics.len();
            let failure = if metrics.is_empty() {
                None
            } else {
                sink.write(&metrics).await.err()
            };
            match &failure {
                None => debug!(sink = sink.name(), cycle, written = attempted, "metrics written"),
                Some(f) => {
                    let failed: Vec<&str> = f
                        .failed_indices
                        .iter()
                        .filter_map(|i| metrics.get(*i).map(|m| m.name.as_str()))
                        .collect();
                    error!(
                        sink = sink.name(),
                        cycle,
                        attempted,
                        failed = f.failed_indices.len(),
                        keys = ?failed,
                        reason = %f.reason,
                        "metric write failed"
                    );
                }
            }
            let outcome = WriteOutcome {
                cycle,
                attempted,
                failure,
            };
            if let Some(tx) = outcomes {
                // receiver may be gone
                let _ = tx.send(outcome.clone());
            }
            outcome
        })
    }
}

impl std::fmt::Debug for SinkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDispatcher")
            .field("sink", &self.sink.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn metric(name: &str) -> Metric {
        Metric {
            name: name.into(),
            labels: BTreeMap::new(),
            value: BigDecimal::from(1),
            timestamp: Utc::now(),
            block_number: None,
        }
    }

    #[derive(Default)]
    struct Recording {
        batches: Mutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl MetricSink for Recording {
        async fn write(&self, metrics: &[Metric]) -> Result<(), WriteFailure> {
            self.batches.lock().unwrap().push(metrics.to_vec());
            Ok(())
        }
    }

    struct RejectsOdd;

    #[async_trait]
    impl MetricSink for RejectsOdd {
        async fn write(&self, metrics: &[Metric]) -> Result<(), WriteFailure> {
            Err(WriteFailure {
                failed_indices: (0..metrics.len()).filter(|i| i % 2 == 1).collect(),
                reason: "constraint".into(),
            })
        }
    }

    #[tokio::test]
    async fn dispatch_writes_and_reports() {
        let sink = Arc::new(Recording::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = SinkDispatcher::new(sink.clone()).with_outcomes(tx);

        let outcome = dispatcher.dispatch(1, vec![metric("a"), metric("b")]).await.unwrap();
        assert_eq!(outcome.written(), 2);
        assert_eq!(rx.recv().await.unwrap(), outcome);
        assert_eq!(sink.batches.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn partial_failures_are_reported() {
        let dispatcher = SinkDispatcher::new(Arc::new(RejectsOdd));
        let outcome = dispatcher
            .dispatch(7, vec![metric("a"), metric("b"), metric("c")])
            .await
            .unwrap();
        assert_eq!(outcome.failure.as_ref().unwrap().failed_indices, vec![1]);
        assert_eq!(outcome.written(), 2);
    }

    #[tokio::test]
    async fn empty_batches_skip_the_sink() {
        let sink = Arc::new(Recording::default());
        let outcome = SinkDispatcher::new(sink.clone()).dispatch(1, Vec::new()).await.unwrap();
        assert_eq!(outcome.attempted, 0);
        assert!(sink.batches.lock().unwrap().is_empty());
    }
}
