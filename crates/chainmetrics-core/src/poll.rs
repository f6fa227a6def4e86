//! Periodic cycles: process → export → derive → dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ExportPlan;
use crate::contract::Contract;
use crate::datastore::{SinkDispatcher, WriteOutcome};
use crate::error::MethodFailure;
use crate::exporter::{ContractExporter, DerivedMetric, ExportBatch, SkipReport, UnknownScalePolicy};
use crate::metric::Metric;
use crate::node::{BlockContext, NodeClient};
use crate::processor::{DecodedResult, Processor};
use crate::scale::ScaleResolver;

/// A method that produced no value this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMethod {
    pub contract: String,
    pub method: String,
    pub failure: MethodFailure,
}

/// What happened in one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub block: Option<BlockContext>,
    pub results: Vec<DecodedResult>,
    pub metrics: usize,
    pub skips: Vec<SkipReport>,
    pub failures: Vec<FailedMethod>,
    pub elapsed: Duration,
}

pub struct Poller {
    processor: Processor,
    contracts: Vec<Contract>,
    exporters: Vec<ContractExporter>,
    derived: Vec<DerivedMetric>,
    resolver: ScaleResolver,
    unknown_scale: UnknownScalePolicy,
    dispatcher: SinkDispatcher,
    interval: Duration,
    reports: Option<mpsc::UnboundedSender<CycleReport>>,
    cycle: AtomicU64,
}

impl Poller {
    pub fn new(processor: Processor, resolver: ScaleResolver, dispatcher: SinkDispatcher, interval: Duration) -> Self {
        Self {
            processor,
            contracts: Vec::new(),
            exporters: Vec::new(),
            derived: Vec::new(),
            resolver,
            unknown_scale: UnknownScalePolicy::default(),
            dispatcher,
            interval,
            reports: None,
            cycle: AtomicU64::new(0),
        }
    }

    /// Wires a poller from a validated plan. Plan overrides are layered on
    /// top of `resolver`.
    pub fn from_plan(
        plan: &ExportPlan,
        node: Arc<dyn NodeClient>,
        mut resolver: ScaleResolver,
        dispatcher: SinkDispatcher,
    ) -> Self {
        for (address, decimals) in &plan.overrides {
            resolver = resolver.with_override(*address, *decimals);
        }
        let processor = Processor::new(node, plan.processor.clone());
        let mut poller = Self::new(processor, resolver, dispatcher, plan.interval)
            .with_unknown_scale(plan.unknown_scale);
        for (contract, exporter) in plan.contracts.iter().zip(&plan.exporters) {
            poller = poller.with_contract(contract.clone(), exporter.clone());
        }
        for d in &plan.derived {
            poller = poller.with_derived(d.clone());
        }
        poller
    }

    pub fn with_contract(mut self, contract: Contract, exporter: ContractExporter) -> Self {
        self.contracts.push(contract);
        self.exporters.push(exporter);
        self
    }

    pub fn with_derived(mut self, metric: DerivedMetric) -> Self {
        self.derived.push(metric);
        self
    }

    pub fn with_unknown_scale(mut self, policy: UnknownScalePolicy) -> Self {
        self.unknown_scale = policy;
        self
    }

    /// Also publish every report on `tx`.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<CycleReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one cycle and returns its report and metrics without writing.
    pub async fn collect(&self) -> (CycleReport, Vec<Metric>) {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let started = tokio::time::Instant::now();

        let results = self.processor.run_cycle(&self.contracts).await;

        let mut batch = ExportBatch::default();
        for exporter in &self.exporters {
            batch.extend(exporter.export(&results.results, &self.resolver, self.unknown_scale));
        }
        for derived in &self.derived {
            match derived.evaluate(&results.results, &self.resolver, self.unknown_scale) {
                Ok(metric) => batch.metrics.push(metric),
                Err(skip) => {
                    warn!(cycle, key = %skip.key, reason = %skip.reason, "derived metric skipped");
                    batch.skips.push(skip);
                }
            }
        }

        let failures: Vec<FailedMethod> = results
            .results
            .iter()
            .filter_map(|r| {
                r.outcome.as_ref().err().map(|failure| FailedMethod {
                    contract: r.contract.clone(),
                    method: r.method.name.clone(),
                    failure: failure.clone(),
                })
            })
            .collect();
        for f in &failures {
            error!(cycle, contract = %f.contract, method = %f.method, reason = f.failure.reason(), error = %f.failure, "method failed");
        }

        let report = CycleReport {
            cycle,
            block: results.block,
            metrics: batch.metrics.len(),
            skips: batch.skips,
            failures,
            results: results.results,
            elapsed: started.elapsed(),
        };
        info!(
            cycle,
            block = report.block.map(|b| b.number),
            methods = report.results.len(),
            failed = report.failures.len(),
            metrics = report.metrics,
            skipped = report.skips.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "cycle complete"
        );
        (report, batch.metrics)
    }

    /// Runs one cycle and spawns the write. The partial successful subset
    /// is written even when some methods failed.
    pub async fn run_once(&self) -> (CycleReport, JoinHandle<WriteOutcome>) {
        let (report, metrics) = self.collect().await;
        let write = self.dispatcher.dispatch(report.cycle, metrics);
        if let Some(tx) = &self.reports {
            let _ = tx.send(report.clone());
        }
        (report, write)
    }

    /// Runs a cycle every `interval` until `shutdown` flips to `true`.
    ///
    /// Writes are not awaited, so a slow sink never delays the next cycle.
    /// Shutdown abandons a cycle that is still reading from the node.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            contracts = self.contracts.len(),
            derived = self.derived.len(),
            interval_s = self.interval.as_secs(),
            "poller started"
        );
        let stop = stop_requested(&mut shutdown);
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut stop => break,
            }
            tokio::select! {
                // the write task is detached; the dispatcher reports its outcome
                _ = self.run_once() => {}
                _ = &mut stop => break,
            }
        }
        info!("poller stopping");
    }
}

/// Resolves once `shutdown` holds `true` or its sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
