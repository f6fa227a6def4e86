//! Executes contract methods against a node, with retry and bounded concurrency.
//!
//! Per method: send the precomputed calldata, retry transient node failures
//! with backoff, then decode the return bytes against the method's output
//! shape. A method's failure is recorded in its own [`DecodedResult`] and
//! never aborts its siblings.
//!
//! Concurrency is bounded by a semaphore; a permit is held only while a
//! single call attempt is in flight, never across backoff sleeps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::abi::{decode_output, DecodedValue};
use crate::clock::{Clock, TokioClock};
use crate::contract::{Contract, ContractMethod};
use crate::error::{MethodFailure, NodeError};
use crate::node::{BlockContext, BlockTag, NodeClient};
use crate::policy::{RetryConfig, RetryPolicy};

/// Which block a cycle's calls are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// One head read per cycle; every call is pinned to that height.
    #[default]
    Pinned,
    /// One head read per contract; calls run at `latest` and are tagged
    /// with the observed head.
    Latest,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub retry: RetryConfig,
    /// Maximum node calls in flight at once.
    pub concurrency: usize,
    /// Per-attempt timeout.
    pub call_timeout: Duration,
    /// Whole-cycle deadline; methods still running when it passes are
    /// cancelled and reported as `DeadlineExceeded`.
    pub cycle_deadline: Option<Duration>,
    pub block_mode: BlockMode,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            concurrency: 8,
            call_timeout: Duration::from_secs(10),
            cycle_deadline: None,
            block_mode: BlockMode::Pinned,
        }
    }
}

/// The outcome of one method in one cycle.
#[derive(Debug, Clone)]
pub struct DecodedResult {
    pub contract: String,
    pub method: Arc<ContractMethod>,
    /// Block the value was read at, if known.
    pub block: Option<BlockContext>,
    pub outcome: Result<DecodedValue, MethodFailure>,
    /// Node call attempts made (0 if the method never reached the node).
    pub attempts: u32,
    /// When the outcome was settled; the fallback metric timestamp.
    pub observed_at: DateTime<Utc>,
}

impl DecodedResult {
    /// Block timestamp if known, else the observation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.block.map(|b| b.timestamp).unwrap_or(self.observed_at)
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// All results of one cycle, grouped in contract order.
#[derive(Debug, Clone, Default)]
pub struct CycleResults {
    /// The pinned head, in [`BlockMode::Pinned`].
    pub block: Option<BlockContext>,
    pub results: Vec<DecodedResult>,
}

impl CycleResults {
    pub fn successes(&self) -> impl Iterator<Item = &DecodedResult> {
        self.results.iter().filter(|r| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DecodedResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }
}

/// How a contract batch should pick its block.
#[derive(Debug, Clone)]
enum Head {
    /// Already resolved (pinned) or failed to resolve.
    Pinned(Result<BlockContext, (NodeError, u32)>),
    /// Read the head for this batch, call at `latest`.
    PerContract,
}

pub struct Processor {
    node: Arc<dyn NodeClient>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    limiter: Arc<Semaphore>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(node: Arc<dyn NodeClient>, config: ProcessorConfig) -> Self {
        Self {
            node,
            retry: RetryPolicy::new(config.retry.clone()),
            clock: Arc::new(TokioClock),
            limiter: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Runs every method of one contract. Results are in registration order.
    pub async fn run(&self, contract: &Contract) -> Vec<DecodedResult> {
        let deadline = self.deadline();
        let head = match self.config.block_mode {
            BlockMode::Pinned => match self.within(deadline, self.read_head(contract.name())).await {
                Some(head) => Head::Pinned(head),
                None => return self.all_expired(contract),
            },
            BlockMode::Latest => Head::PerContract,
        };
        self.run_contract(contract, head, deadline).await
    }

    /// Runs all contracts concurrently.
    pub async fn run_cycle(&self, contracts: &[Contract]) -> CycleResults {
        let deadline = self.deadline();

        let (block, head) = match self.config.block_mode {
            BlockMode::Pinned => match self.within(deadline, self.read_head("*")).await {
                Some(head) => (head.as_ref().ok().copied(), Head::Pinned(head)),
                None => {
                    let results = contracts.iter().flat_map(|c| self.all_expired(c)).collect();
                    return CycleResults { block: None, results };
                }
            },
            BlockMode::Latest => (None, Head::PerContract),
        };

        let batches = join_all(
            contracts
                .iter()
                .map(|c| self.run_contract(c, head.clone(), deadline)),
        )
        .await;

        CycleResults {
            block,
            results: batches.into_iter().flatten().collect(),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.cycle_deadline.map(|d| Instant::now() + d)
    }

    /// `None` if the deadline passed first.
    async fn within<T>(&self, deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
            None => Some(fut.await),
        }
    }

    fn deadline_ms(&self) -> u64 {
        self.config
            .cycle_deadline
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    fn all_expired(&self, contract: &Contract) -> Vec<DecodedResult> {
        warn!(contract = contract.name(), "cycle deadline passed before the head was read");
        contract
            .methods()
            .iter()
            .map(|m| DecodedResult {
                contract: contract.name().to_string(),
                observed_at: self.clock.now(),
                method: m.clone(),
                block: None,
                outcome: Err(MethodFailure::DeadlineExceeded { ms: self.deadline_ms() }),
                attempts: 0,
            })
            .collect()
    }

    async fn read_head(&self, contract: &str) -> Result<BlockContext, (NodeError, u32)> {
        let (result, attempts) = self
            .retrying(contract, "head", || self.node.block_context(BlockTag::Latest))
            .await;
        result.map_err(|e| (e, attempts))
    }

    async fn run_contract(
        &self,
        contract: &Contract,
        head: Head,
        deadline: Option<Instant>,
    ) -> Vec<DecodedResult> {
        let (block, tag) = match head {
            Head::Pinned(Ok(ctx)) => (Some(ctx), BlockTag::Number(ctx.number)),
            Head::Pinned(Err((source, attempts))) => {
                error!(contract = contract.name(), error = %source, "head unavailable, skipping contract");
                return contract
                    .methods()
                    .iter()
                    .map(|m| DecodedResult {
                        contract: contract.name().to_string(),
                        observed_at: self.clock.now(),
                        method: m.clone(),
                        block: None,
                        outcome: Err(MethodFailure::Node {
                            source: source.clone(),
                            attempts,
                        }),
                        attempts,
                    })
                    .collect();
            }
            Head::PerContract => match self.within(deadline, self.read_head(contract.name())).await {
                Some(Ok(ctx)) => (Some(ctx), BlockTag::Latest),
                Some(Err((e, _))) => {
                    warn!(contract = contract.name(), error = %e, "head unavailable, results will be untagged");
                    (None, BlockTag::Latest)
                }
                None => return self.all_expired(contract),
            },
        };

        join_all(contract.methods().iter().map(|method| async move {
            match self.within(deadline, self.run_method(contract.name(), method, tag)).await {
                Some((outcome, attempts)) => DecodedResult {
                    contract: contract.name().to_string(),
                    observed_at: self.clock.now(),
                    method: method.clone(),
                    block,
                    outcome,
                    attempts,
                },
                None => {
                    warn!(
                        contract = contract.name(),
                        method = %method.name,
                        deadline_ms = self.deadline_ms(),
                        "cycle deadline exceeded, call cancelled"
                    );
                    DecodedResult {
                        contract: contract.name().to_string(),
                        observed_at: self.clock.now(),
                        method: method.clone(),
                        block,
                        outcome: Err(MethodFailure::DeadlineExceeded { ms: self.deadline_ms() }),
                        attempts: 0,
                    }
                }
            }
        }))
        .await
    }

    async fn run_method(
        &self,
        contract: &str,
        method: &ContractMethod,
        tag: BlockTag,
    ) -> (Result<DecodedValue, MethodFailure>, u32) {
        let (result, attempts) = self
            .retrying(contract, &method.name, || {
                self.node.call(method.address, method.calldata.clone(), tag)
            })
            .await;

        let outcome = match result {
            Ok(bytes) => decode(contract, method, &bytes),
            Err(source) => Err(MethodFailure::Node { source, attempts }),
        };
        (outcome, attempts)
    }

    /// Bounded retry loop. Returns the final result and the attempts made.
    async fn retrying<T, F, Fut>(&self, contract: &str, method: &str, mut op: F) -> (Result<T, NodeError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.attempt(&mut op).await;
            match result {
                Ok(value) => {
                    debug!(contract, method, attempt, "call succeeded");
                    return (Ok(value), attempt);
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.next_delay(attempt).unwrap_or_default();
                    warn!(
                        contract,
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying node call"
                    );
                    self.clock.sleep(delay).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(contract, method, attempts = attempt, error = %e, "retries exhausted");
                    } else {
                        warn!(contract, method, attempt, error = %e, "node call failed, not retryable");
                    }
                    return (Err(e), attempt);
                }
            }
        }
    }

    /// One attempt: holds a permit for the duration of the call only.
    async fn attempt<T, F, Fut>(&self, op: &mut F) -> Result<T, NodeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| NodeError::protocol("call limiter closed"))?;
        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::timeout(format!(
                "no response within {}ms",
                self.config.call_timeout.as_millis()
            ))),
        }
    }
}

fn decode(contract: &str, method: &ContractMethod, bytes: &Bytes) -> Result<DecodedValue, MethodFailure> {
    decode_output(&method.output, bytes).map_err(|e| {
        warn!(contract, method = %method.name, error = %e, "malformed return data");
        MethodFailure::Decode(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, NodeErrorKind};
    use crate::policy::FixedJitter;
    use alloy_primitives::{address, Address};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TOKEN: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");

    fn word(v: u64) -> Bytes {
        let mut w = [0u8; 32];
        w[24..].copy_from_slice(&v.to_be_bytes());
        Bytes::from(w.to_vec())
    }

    fn ctx(number: u64) -> BlockContext {
        BlockContext {
            number,
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    /// Replies per selector from a script; the last reply repeats.
    #[derive(Default)]
    struct ScriptedNode {
        scripts: Mutex<HashMap<[u8; 4], VecDeque<Result<Bytes, NodeError>>>>,
        calls: Mutex<Vec<([u8; 4], BlockTag)>>,
        head: Mutex<VecDeque<Result<BlockContext, NodeError>>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedNode {
        fn script(self, selector: [u8; 4], replies: Vec<Result<Bytes, NodeError>>) -> Self {
            self.scripts.lock().unwrap().insert(selector, replies.into());
            self
        }

        fn calls_to(&self, selector: [u8; 4]) -> usize {
            self.calls.lock().unwrap().iter().filter(|(s, _)| *s == selector).count()
        }
    }

    #[async_trait]
    impl NodeClient for ScriptedNode {
        async fn call(&self, _address: Address, calldata: Bytes, block: BlockTag) -> Result<Bytes, NodeError> {
            let selector: [u8; 4] = calldata[..4].try_into().unwrap();
            self.calls.lock().unwrap().push((selector, block));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&selector).expect("unscripted selector");
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }

        async fn block_context(&self, _block: BlockTag) -> Result<BlockContext, NodeError> {
            let mut head = self.head.lock().unwrap();
            if head.len() > 1 {
                head.pop_front().unwrap()
            } else {
                head.front().cloned().unwrap_or(Ok(ctx(100)))
            }
        }
    }

    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }

        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp(0, 0).unwrap()
        }
    }

    fn config() -> ProcessorConfig {
        ProcessorConfig {
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
                multiplier: 2.0,
                jitter_fraction: 0.0,
            },
            ..Default::default()
        }
    }

    fn processor(node: Arc<ScriptedNode>, config: ProcessorConfig, clock: Arc<RecordingClock>) -> Processor {
        let retry = RetryPolicy::with_jitter(config.retry.clone(), Arc::new(FixedJitter(0.0)));
        Processor::new(node, config)
            .with_clock(clock)
            .with_retry_policy(retry)
    }

    fn pair() -> Contract {
        let mut c = Contract::new("pair", TOKEN);
        c.describe("totalSupply", "totalSupply()", "uint256").unwrap();
        c.describe("decimals", "decimals()", "uint8").unwrap();
        c
    }

    fn sel(sig: &str) -> [u8; 4] {
        crate::abi::selector(sig)
    }

    #[tokio::test]
    async fn retries_timeouts_then_succeeds() {
        let node = Arc::new(
            ScriptedNode::default()
                .script(
                    sel("totalSupply()"),
                    vec![
                        Err(NodeError::timeout("t1")),
                        Err(NodeError::timeout("t2")),
                        Ok(word(42)),
                    ],
                )
                .script(sel("decimals()"), vec![Ok(word(18))]),
        );
        let clock = Arc::new(RecordingClock::default());
        let p = processor(node.clone(), config(), clock.clone());

        let results = p.run(&pair()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].method.name, "totalSupply");
        assert!(results[0].is_ok());
        assert_eq!(results[0].attempts, 3);
        assert_eq!(
            *clock.sleeps.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(results[0].block, Some(ctx(100)));
    }

    #[tokio::test]
    async fn exhausted_retries_do_not_affect_siblings() {
        let node = Arc::new(
            ScriptedNode::default()
                .script(sel("totalSupply()"), vec![Err(NodeError::connection_failed("refused"))])
                .script(sel("decimals()"), vec![Ok(word(18))]),
        );
        let p = processor(node.clone(), config(), Arc::new(RecordingClock::default()));

        let results = p.run(&pair()).await;
        match &results[0].outcome {
            Err(MethodFailure::Node { source, attempts }) => {
                assert_eq!(source.kind, NodeErrorKind::ConnectionFailed);
                assert_eq!(*attempts, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(results[1].is_ok());
        assert_eq!(node.calls_to(sel("totalSupply()")), 4);
    }

    #[tokio::test]
    async fn reverts_and_decode_errors_are_not_retried() {
        let node = Arc::new(
            ScriptedNode::default()
                .script(sel("totalSupply()"), vec![Err(NodeError::reverted("execution reverted"))])
                .script(sel("decimals()"), vec![Ok(Bytes::from(vec![0u8; 8]))]),
        );
        let clock = Arc::new(RecordingClock::default());
        let p = processor(node.clone(), config(), clock.clone());

        let results = p.run(&pair()).await;
        assert_eq!(results[0].attempts, 1);
        assert_eq!(results[0].outcome.as_ref().unwrap_err().reason(), "reverted");
        assert_eq!(
            results[1].outcome,
            Err(MethodFailure::Decode(DecodeError::ShortReturn { expected: 32, got: 8 }))
        );
        assert_eq!(node.calls_to(sel("decimals()")), 1);
        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pinned_mode_calls_at_head_height() {
        let node = Arc::new(
            ScriptedNode::default()
                .script(sel("totalSupply()"), vec![Ok(word(1))])
                .script(sel("decimals()"), vec![Ok(word(18))]),
        );
        let p = processor(node.clone(), config(), Arc::new(RecordingClock::default()));
        let cycle = p.run_cycle(&[pair(), pair()]).await;
        assert_eq!(cycle.block, Some(ctx(100)));
        assert_eq!(cycle.results.len(), 4);
        assert!(node
            .calls
            .lock()
            .unwrap()
            .iter()
            .all(|(_, tag)| *tag == BlockTag::Number(100)));
    }

    #[tokio::test]
    async fn latest_mode_tags_results_with_observed_head() {
        let node = Arc::new(
            ScriptedNode::default()
                .script(sel("totalSupply()"), vec![Ok(word(1))])
                .script(sel("decimals()"), vec![Ok(word(18))]),
        );
        node.head.lock().unwrap().extend([Ok(ctx(7)), Ok(ctx(8))]);
        let cfg = ProcessorConfig {
            block_mode: BlockMode::Latest,
            ..config()
        };
        let p = processor(node.clone(), cfg, Arc::new(RecordingClock::default()));
        let cycle = p.run_cycle(&[pair(), pair()]).await;
        assert_eq!(cycle.block, None);
        let heights: Vec<u64> = cycle.results.iter().map(|r| r.block.unwrap().number).collect();
        assert!(heights.contains(&7) && heights.contains(&8));
        assert!(node.calls.lock().unwrap().iter().all(|(_, tag)| *tag == BlockTag::Latest));
    }

    #[tokio::test]
    async fn pinned_head_failure_fails_every_method() {
        let node = Arc::new(
            ScriptedNode::default()
                .script(sel("totalSupply()"), vec![Ok(word(1))])
                .script(sel("decimals()"), vec![Ok(word(18))]),
        );
        node.head.lock().unwrap().push_back(Err(NodeError::protocol("bad block")));
        let p = processor(node.clone(), config(), Arc::new(RecordingClock::default()));
        let results = p.run(&pair()).await;
        assert!(results.iter().all(|r| r.outcome.as_ref().unwrap_err().reason() == "protocol"));
        assert_eq!(node.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_is_respected() {
        let mut node = ScriptedNode::default();
        node.delay = Some(Duration::from_millis(50));
        let mut contract = Contract::new("many", TOKEN);
        for i in 0..5 {
            let sig = format!("m{i}()");
            contract.describe(&format!("m{i}"), &sig, "uint256").unwrap();
            node = node.script(sel(&sig), vec![Ok(word(i))]);
        }
        let node = Arc::new(node);
        let cfg = ProcessorConfig {
            concurrency: 2,
            ..config()
        };
        let p = processor(node.clone(), cfg, Arc::new(RecordingClock::default()));
        let results = p.run(&contract).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(node.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_spans_the_whole_cycle() {
        let mut node = ScriptedNode::default();
        node.delay = Some(Duration::from_millis(50));
        let mut contracts = Vec::new();
        for c in 0..3u64 {
            let mut contract = Contract::new(format!("c{c}"), TOKEN);
            for m in 0..3u64 {
                let sig = format!("c{c}m{m}()");
                contract.describe(&format!("m{m}"), &sig, "uint256").unwrap();
                node = node.script(sel(&sig), vec![Ok(word(c * 10 + m))]);
            }
            contracts.push(contract);
        }
        let node = Arc::new(node);

        for mode in [BlockMode::Pinned, BlockMode::Latest] {
            node.max_in_flight.store(0, Ordering::SeqCst);
            let cfg = ProcessorConfig {
                concurrency: 2,
                block_mode: mode,
                ..config()
            };
            let p = processor(node.clone(), cfg, Arc::new(RecordingClock::default()));
            let cycle = p.run_cycle(&contracts).await;
            assert_eq!(cycle.results.len(), 9);
            assert!(cycle.results.iter().all(|r| r.is_ok()));
            assert_eq!(node.max_in_flight.load(Ordering::SeqCst), 2, "{mode:?}");
        }
        assert_eq!(node.calls.lock().unwrap().len(), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_slow_methods() {
        let mut node = ScriptedNode::default()
            .script(sel("totalSupply()"), vec![Ok(word(1))])
            .script(sel("decimals()"), vec![Ok(word(18))]);
        node.delay = Some(Duration::from_secs(5));
        let node = Arc::new(node);
        let cfg = ProcessorConfig {
            cycle_deadline: Some(Duration::from_secs(1)),
            ..config()
        };
        let p = processor(node.clone(), cfg, Arc::new(RecordingClock::default()));
        let results = p.run(&pair()).await;
        assert!(results
            .iter()
            .all(|r| r.outcome == Err(MethodFailure::DeadlineExceeded { ms: 1000 })));
        // cancelled calls released their permits
        assert_eq!(p.limiter.available_permits(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_retried() {
        let mut node = ScriptedNode::default()
            .script(sel("totalSupply()"), vec![Ok(word(1))])
            .script(sel("decimals()"), vec![Ok(word(18))]);
        node.delay = Some(Duration::from_secs(2));
        let node = Arc::new(node);
        let cfg = ProcessorConfig {
            call_timeout: Duration::from_secs(1),
            retry: RetryConfig {
                max_retries: 1,
                ..config().retry
            },
            ..config()
        };
        let p = processor(node.clone(), cfg, Arc::new(RecordingClock::default()));
        let results = p.run(&pair()).await;
        match &results[0].outcome {
            Err(MethodFailure::Node { source, attempts }) => {
                assert_eq!(source.kind, NodeErrorKind::Timeout);
                assert_eq!(*attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
