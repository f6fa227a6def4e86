//! Exporter configuration: loading, validation and expansion into a plan.
//!
//! Configuration is JSON or YAML, chosen by file extension. Validation
//! collects every problem before failing, so one run reports them all.
//!
//! ```yaml
//! version: "0.1"
//! network: mainnet
//! chain_id: 1
//! poll: { interval: 1h, concurrency: 4, block_mode: pinned }
//! contracts:
//!   - name: dai
//!     address: "0x6B175474E89094C44Da98b954EedeAC495271d0F"
//!     scale: auto
//!     methods:
//!       - signature: totalSupply()
//!         returns: uint256
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::abi::{parse_selector, Signature};
use crate::contract::{Contract, MethodOptions};
use crate::error::ConfigError;
use crate::exporter::{
    ContractExporter, DerivedMetric, FieldSelector, MathOp, MethodExporter, Operand, UnknownScalePolicy,
};
use crate::policy::RetryConfig;
use crate::processor::{BlockMode, ProcessorConfig};
use crate::scale::ScaleSpec;
use crate::tokenlist::TokenListEntry;

pub const CONFIG_VERSION: &str = "0.1";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    pub version: String,
    pub network: String,
    pub chain_id: u64,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub unknown_scale: UnknownScalePolicy,
    #[serde(default)]
    pub log: LogSettings,
    /// Static token metadata, merged under any remote list.
    #[serde(default)]
    pub tokens: Vec<TokenSeed>,
    #[serde(default)]
    pub token_list: Option<TokenListSource>,
    pub contracts: Vec<ContractConfig>,
    #[serde(default)]
    pub derived: Vec<DerivedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// e.g. `"1h"`, `"1d12h"`, `"30s"`.
    pub interval: String,
    pub concurrency: usize,
    pub deadline: Option<String>,
    pub call_timeout: String,
    pub block_mode: BlockMode,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: "1h".into(),
            concurrency: 8,
            deadline: None,
            call_timeout: "10s".into(),
            block_mode: BlockMode::Pinned,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub level: Option<String>,
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenSeed {
    pub address: String,
    pub decimals: u32,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenListSource {
    pub url: String,
    #[serde(default = "default_token_refresh")]
    pub refresh: String,
}

fn default_true() -> bool {
    true
}

fn default_token_refresh() -> String {
    "1d".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractConfig {
    pub name: String,
    pub address: String,
    /// Default scale for methods that set none.
    #[serde(default)]
    pub scale: Option<ScaleSpec>,
    /// Decimals override for this address.
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub methods: Vec<MethodConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodConfig {
    /// Defaults to the function name in `signature`.
    #[serde(default)]
    pub name: Option<String>,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub returns: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub scale: Option<ScaleSpec>,
    #[serde(default)]
    pub selector: Option<String>,
    /// Explicit exports. When absent every field is exported.
    #[serde(default)]
    pub export: Option<Vec<ExportConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub scale: Option<ScaleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedConfig {
    pub key: String,
    pub op: MathOp,
    pub left: OperandConfig,
    pub right: OperandConfig,
    /// Inputs read at different heights are skipped unless this is false.
    #[serde(default = "default_true")]
    pub require_same_block: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Either `{contract, method, field?, scale?}` or `{constant}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperandConfig {
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub scale: Option<ScaleSpec>,
    #[serde(default)]
    pub constant: Option<serde_json::Value>,
}

/// Everything a poller needs, built from a validated config.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub network: String,
    pub chain_id: u64,
    pub interval: Duration,
    pub processor: ProcessorConfig,
    pub unknown_scale: UnknownScalePolicy,
    pub contracts: Vec<Contract>,
    pub exporters: Vec<ContractExporter>,
    pub derived: Vec<DerivedMetric>,
    pub overrides: HashMap<Address, u32>,
    pub tokens: Vec<TokenListEntry>,
    pub token_list: Option<(String, Duration)>,
}

impl ExportPlan {
    /// One line per exported series, for operators.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (contract, exporter) in self.contracts.iter().zip(&self.exporters) {
            for e in exporter.exporters() {
                let signature = contract
                    .method(e.method_name())
                    .map(|m| m.signature.as_str())
                    .unwrap_or_default();
                lines.push(format!(
                    "{}.{} <- {} @ {} (scale: {})",
                    contract.name(),
                    e.key(),
                    signature,
                    contract.address(),
                    e.scale()
                ));
            }
        }
        for d in &self.derived {
            let [l, r] = d.operands();
            lines.push(format!("{} <- {l} {} {r}", d.key(), d.op()));
        }
        lines
    }
}

impl ExporterConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(ConfigError::UnsupportedFormat(display)),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build().map(|_| ())
    }

    /// Validates everything and expands the config into an [`ExportPlan`].
    pub fn build(&self) -> Result<ExportPlan, ConfigError> {
        let mut problems = Vec::new();

        if self.version != CONFIG_VERSION {
            problems.push(format!(
                "unsupported version '{}': expected '{CONFIG_VERSION}'",
                self.version
            ));
        }
        if self.network.trim().is_empty() {
            problems.push("network must not be empty".into());
        }
        if self.poll.concurrency == 0 {
            problems.push("poll.concurrency must be at least 1".into());
        }
        let interval = collect(&mut problems, "poll.interval", parse_interval(&self.poll.interval));
        let call_timeout = collect(&mut problems, "poll.call_timeout", parse_interval(&self.poll.call_timeout));
        let deadline = self
            .poll
            .deadline
            .as_deref()
            .and_then(|d| collect(&mut problems, "poll.deadline", parse_interval(d)));
        if self.retry.multiplier < 1.0 {
            problems.push("retry.multiplier must be >= 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            problems.push("retry.jitter_fraction must be within 0.0..=1.0".into());
        }

        let token_list = self.token_list.as_ref().and_then(|src| {
            collect(&mut problems, "token_list.refresh", parse_interval(&src.refresh))
                .map(|every| (src.url.clone(), every))
        });

        let mut tokens = Vec::new();
        for seed in &self.tokens {
            match seed.address.parse::<Address>() {
                Ok(address) => tokens.push(TokenListEntry {
                    address,
                    decimals: seed.decimals,
                    symbol: seed.symbol.clone(),
                    name: seed.name.clone(),
                    chain_id: self.chain_id,
                }),
                Err(e) => problems.push(format!("token '{}': invalid address '{}': {e}", seed.symbol, seed.address)),
            }
        }

        let mut contracts = Vec::new();
        let mut exporters = Vec::new();
        let mut overrides = HashMap::new();
        let mut names = HashSet::new();

        for cfg in &self.contracts {
            if !names.insert(cfg.name.as_str()) {
                problems.push(format!("duplicate contract name '{}'", cfg.name));
                continue;
            }
            let address = match cfg.address.parse::<Address>() {
                Ok(a) => a,
                Err(e) => {
                    problems.push(format!("contract '{}': invalid address '{}': {e}", cfg.name, cfg.address));
                    continue;
                }
            };
            if cfg.methods.is_empty() {
                problems.push(format!("contract '{}' has no methods", cfg.name));
            }
            if let Some(d) = cfg.decimals {
                overrides.insert(address, d);
            }
            let (contract, exporter) = build_contract(cfg, address, &self.network, &mut problems);
            contracts.push(contract);
            exporters.push(exporter);
        }

        let mut derived = Vec::new();
        let mut keys = HashSet::new();
        for cfg in &self.derived {
            if !keys.insert(cfg.key.as_str()) {
                problems.push(format!("duplicate derived metric '{}'", cfg.key));
                continue;
            }
            let left = build_operand(&cfg.key, "left", &cfg.left, &contracts, &mut problems);
            let right = build_operand(&cfg.key, "right", &cfg.right, &contracts, &mut problems);
            let (Some(left), Some(right)) = (left, right) else {
                continue;
            };
            match DerivedMetric::new(cfg.key.clone(), cfg.op, left, right, cfg.require_same_block) {
                Ok(mut metric) => {
                    metric = metric.with_label("network", self.network.clone());
                    for (k, v) in &cfg.labels {
                        metric = metric.with_label(k.clone(), v.clone());
                    }
                    derived.push(metric);
                }
                Err(e) => problems.push(format!("derived '{}': {e}", cfg.key)),
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }

        Ok(ExportPlan {
            network: self.network.clone(),
            chain_id: self.chain_id,
            interval: interval.unwrap_or_default(),
            processor: ProcessorConfig {
                retry: self.retry.clone(),
                concurrency: self.poll.concurrency,
                call_timeout: call_timeout.unwrap_or_default(),
                cycle_deadline: deadline,
                block_mode: self.poll.block_mode,
            },
            unknown_scale: self.unknown_scale,
            contracts,
            exporters,
            derived,
            overrides,
            tokens,
            token_list,
        })
    }
}

fn collect<T>(problems: &mut Vec<String>, what: &str, result: Result<T, String>) -> Option<T> {
    result.map_err(|e| problems.push(format!("{what}: {e}"))).ok()
}

fn build_contract(
    cfg: &ContractConfig,
    address: Address,
    network: &str,
    problems: &mut Vec<String>,
) -> (Contract, ContractExporter) {
    let mut contract = Contract::new(cfg.name.clone(), address);
    for (k, v) in &cfg.labels {
        contract = contract.with_label(k.clone(), v.clone());
    }

    // explicit exports are attached after every method is registered
    let mut explicit = Vec::new();
    let mut generic_skip = HashSet::new();

    for m in &cfg.methods {
        let name = match &m.name {
            Some(n) => n.clone(),
            None => match Signature::parse(&m.signature) {
                Ok(sig) => sig.name,
                Err(e) => {
                    problems.push(format!("contract '{}': {e}", cfg.name));
                    continue;
                }
            },
        };
        let selector = match m.selector.as_deref().map(parse_selector).transpose() {
            Ok(s) => s,
            Err(e) => {
                problems.push(format!("contract '{}' method '{name}': {e}", cfg.name));
                continue;
            }
        };
        let options = MethodOptions {
            args: m.args.clone(),
            fields: m.fields.clone(),
            scale: m.scale.or(cfg.scale).unwrap_or_default(),
            selector,
        };
        match contract.describe_with(&name, &m.signature, &m.returns, options) {
            Ok(method) => {
                if let Some(exports) = &m.export {
                    generic_skip.insert(name.clone());
                    explicit.push((method, exports.clone()));
                }
            }
            Err(e) => problems.push(format!("contract '{}' method '{name}': {e}", cfg.name)),
        }
    }

    // generic expansion over methods without an explicit export list
    let mut exporter = ContractExporter::new(&contract, network);
    for e in ContractExporter::generic(&contract, network).exporters() {
        if !generic_skip.contains(e.method_name()) {
            exporter.add(e.clone());
        }
    }

    for (method, exports) in explicit {
        for export in exports {
            let field = FieldSelector::parse(&export.field);
            let scale = export.scale.unwrap_or(method.scale);
            match MethodExporter::new(&method, field, scale, export.key.clone()) {
                Ok(e) => exporter.add(e),
                Err(e) => problems.push(format!("contract '{}' method '{}': {e}", cfg.name, method.name)),
            }
        }
    }

    let mut seen = HashSet::new();
    for e in exporter.exporters() {
        if !seen.insert(e.key().to_string()) {
            problems.push(format!("contract '{}': duplicate metric key '{}'", cfg.name, e.key()));
        }
    }

    (contract, exporter)
}

fn build_operand(
    key: &str,
    side: &str,
    cfg: &OperandConfig,
    contracts: &[Contract],
    problems: &mut Vec<String>,
) -> Option<Operand> {
    let mut fail = |reason: String| {
        problems.push(format!("derived '{key}' {side}: {reason}"));
        None
    };
    match (&cfg.constant, &cfg.contract, &cfg.method) {
        (Some(value), None, None) => {
            let text = match value {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                other => return fail(format!("constant must be a number, got {other}")),
            };
            match text.parse::<BigDecimal>() {
                Ok(v) => Some(Operand::Constant(v)),
                Err(e) => fail(format!("invalid constant '{text}': {e}")),
            }
        }
        (None, Some(contract), Some(method)) => {
            let Some(c) = contracts.iter().find(|c| c.name() == contract) else {
                return fail(format!("unknown contract '{contract}'"));
            };
            let Some(m) = c.method(method) else {
                return fail(format!("unknown method '{contract}.{method}'"));
            };
            let scale = cfg.scale.unwrap_or(m.scale);
            match MethodExporter::new(m, FieldSelector::parse(&cfg.field), scale, None) {
                Ok(exporter) => Some(Operand::Method {
                    contract: contract.clone(),
                    exporter,
                }),
                Err(e) => fail(e.to_string()),
            }
        }
        _ => fail("set either `constant` or both `contract` and `method`".into()),
    }
}

/// Parses durations like `"500ms"`, `"30s"`, `"5m"`, `"1h"`, `"1d12h"`, `"2w"`.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(format!("invalid duration '{s}': expected a number at '{rest}'"));
        }
        let (num, tail) = rest.split_at(digits);
        let unit_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let (unit, tail) = tail.split_at(unit_len);
        let n: u64 = num
            .parse()
            .map_err(|_| format!("invalid duration '{s}': number too large"))?;
        let part = match unit {
            "ms" => Duration::from_millis(n),
            "s" => Duration::from_secs(n),
            "m" => Duration::from_secs(n.saturating_mul(60)),
            "h" => Duration::from_secs(n.saturating_mul(3_600)),
            "d" => Duration::from_secs(n.saturating_mul(86_400)),
            "w" => Duration::from_secs(n.saturating_mul(604_800)),
            "" => return Err(format!("invalid duration '{s}': missing unit after {n}")),
            other => return Err(format!("invalid duration '{s}': unknown unit '{other}'")),
        };
        total = total.saturating_add(part);
        rest = tail;
    }
    if total.is_zero() {
        return Err(format!("invalid duration '{s}': must be greater than zero"));
    }
    Ok(total)
}

/// Serde adapter for human-readable durations.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_interval(&s).map_err(serde::de::Error::custom)
    }
}
