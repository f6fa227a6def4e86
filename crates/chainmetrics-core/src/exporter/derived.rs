//! Metrics computed from two operands of the same cycle.
//!
//! A derived metric is only emitted when every input it needs succeeded.
//! Anything else produces a [`SkipReport`] naming the cause; a missing or
//! failed input is never substituted with zero.

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::Deserialize;
use thiserror::Error;

use crate::error::ContractError;
use crate::exporter::method::MethodExporter;
use crate::metric::Metric;
use crate::node::BlockContext;
use crate::processor::DecodedResult;
use crate::scale::ScaleResolver;

use super::UnknownScalePolicy;

/// Largest exponent accepted by [`MathOp::Pow`].
pub const MAX_EXPONENT: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Pow,
}

impl fmt::Display for MathOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Pow => "**",
        };
        f.write_str(s)
    }
}

impl MathOp {
    pub fn apply(&self, left: &BigDecimal, right: &BigDecimal) -> Result<BigDecimal, SkipReason> {
        match self {
            Self::Add => Ok(left + right),
            Self::Sub => Ok(left - right),
            Self::Mul => Ok(left * right),
            Self::Div => {
                if right.is_zero() {
                    return Err(SkipReason::DivisionByZero);
                }
                Ok(left / right)
            }
            Self::FloorDiv => {
                if right.is_zero() {
                    return Err(SkipReason::DivisionByZero);
                }
                Ok(floor_div(left, right))
            }
            Self::Pow => pow(left, right),
        }
    }
}

fn floor_div(left: &BigDecimal, right: &BigDecimal) -> BigDecimal {
    let quotient = left / right;
    let truncated = quotient.with_scale(0);
    if truncated != quotient && quotient.is_negative() {
        truncated - BigDecimal::from(1)
    } else {
        truncated
    }
}

fn pow(base: &BigDecimal, exponent: &BigDecimal) -> Result<BigDecimal, SkipReason> {
    let unsupported = || SkipReason::UnsupportedExponent {
        exponent: exponent.to_string(),
    };
    let whole = exponent.with_scale(0);
    if whole != *exponent || exponent.is_negative() {
        return Err(unsupported());
    }
    let n = whole
        .to_u32()
        .filter(|n| *n <= MAX_EXPONENT)
        .ok_or_else(unsupported)?;
    let mut acc = BigDecimal::from(1);
    for _ in 0..n {
        acc = &acc * base;
    }
    Ok(acc)
}

/// One side of a derived metric.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A field of a method result in the same cycle.
    Method {
        contract: String,
        exporter: MethodExporter,
    },
    Constant(BigDecimal),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method { contract, exporter } => write!(f, "{contract}.{}", exporter.key()),
            Self::Constant(v) => write!(f, "{}", v.normalized()),
        }
    }
}

/// Why a metric was not emitted this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("input {contract}.{method} failed: {reason}")]
    FailedInput {
        contract: String,
        method: String,
        reason: String,
    },

    #[error("input {contract}.{method} has no result this cycle")]
    MissingInput { contract: String, method: String },

    #[error("inputs read at different blocks: {left:?} vs {right:?}")]
    BlockMismatch { left: Option<u64>, right: Option<u64> },

    #[error("division by zero")]
    DivisionByZero,

    #[error("unsupported exponent {exponent}: must be an integer in 0..={MAX_EXPONENT}")]
    UnsupportedExponent { exponent: String },

    #[error("no scale factor known for {address}")]
    UnknownScale { address: Address },
}

/// A skipped metric and the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReport {
    pub key: String,
    pub reason: SkipReason,
}

impl fmt::Display for SkipReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped '{}': {}", self.key, self.reason)
    }
}

/// An operand resolved against a cycle.
struct Input {
    value: BigDecimal,
    block: Option<BlockContext>,
    result_timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct DerivedMetric {
    key: String,
    op: MathOp,
    left: Operand,
    right: Operand,
    require_same_block: bool,
    labels: BTreeMap<String, String>,
}

impl DerivedMetric {
    /// At least one operand must read a method.
    pub fn new(
        key: impl Into<String>,
        op: MathOp,
        left: Operand,
        right: Operand,
        require_same_block: bool,
    ) -> Result<Self, ContractError> {
        let key = key.into();
        let reads_method = |o: &Operand| matches!(o, Operand::Method { .. });
        if !reads_method(&left) && !reads_method(&right) {
            return Err(ContractError::InvalidArguments {
                method: key,
                reason: "a derived metric needs at least one method operand".into(),
            });
        }
        Ok(Self {
            key,
            op,
            left,
            right,
            require_same_block,
            labels: BTreeMap::new(),
        })
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn op(&self) -> MathOp {
        self.op
    }

    pub fn operands(&self) -> [&Operand; 2] {
        [&self.left, &self.right]
    }

    /// Computes the metric from this cycle's results.
    pub fn evaluate(
        &self,
        results: &[DecodedResult],
        resolver: &ScaleResolver,
        unknown_scale: UnknownScalePolicy,
    ) -> Result<Metric, SkipReport> {
        self.compute(results, resolver, unknown_scale)
            .map_err(|reason| SkipReport {
                key: self.key.clone(),
                reason,
            })
    }

    fn compute(
        &self,
        results: &[DecodedResult],
        resolver: &ScaleResolver,
        unknown_scale: UnknownScalePolicy,
    ) -> Result<Metric, SkipReason> {
        let left = resolve(&self.left, results, resolver, unknown_scale)?;
        let right = resolve(&self.right, results, resolver, unknown_scale)?;

        let blocks: Vec<Option<BlockContext>> = [&left, &right]
            .into_iter()
            .flatten()
            .map(|i| i.block)
            .collect();
        if self.require_same_block && blocks.len() == 2 {
            let (l, r) = (blocks[0].map(|b| b.number), blocks[1].map(|b| b.number));
            if l.is_none() || l != r {
                return Err(SkipReason::BlockMismatch { left: l, right: r });
            }
        }

        let l = left.as_ref().map_or_else(|| constant(&self.left), |i| i.value.clone());
        let r = right.as_ref().map_or_else(|| constant(&self.right), |i| i.value.clone());
        let value = self.op.apply(&l, &r)?;

        // newest input wins for the timestamp
        let latest = [&left, &right]
            .into_iter()
            .flatten()
            .max_by_key(|i| (i.block.map(|b| b.number), i.result_timestamp));
        let (timestamp, block_number) = match latest {
            Some(i) => (
                i.block.map(|b| b.timestamp).unwrap_or(i.result_timestamp),
                i.block.map(|b| b.number),
            ),
            None => return Err(SkipReason::MissingInput {
                contract: String::new(),
                method: String::new(),
            }),
        };

        let mut labels = self.labels.clone();
        labels.insert("derived".to_string(), format!("{} {} {}", self.left, self.op, self.right));
        Ok(Metric {
            name: self.key.clone(),
            labels,
            value,
            timestamp,
            block_number,
        })
    }
}

fn constant(op: &Operand) -> BigDecimal {
    match op {
        Operand::Constant(v) => v.clone(),
        Operand::Method { .. } => BigDecimal::zero(),
    }
}

/// `Ok(None)` for constants.
fn resolve(
    operand: &Operand,
    results: &[DecodedResult],
    resolver: &ScaleResolver,
    unknown_scale: UnknownScalePolicy,
) -> Result<Option<Input>, SkipReason> {
    let Operand::Method { contract, exporter } = operand else {
        return Ok(None);
    };
    let missing = || SkipReason::MissingInput {
        contract: contract.clone(),
        method: exporter.method_name().to_string(),
    };
    let result = results
        .iter()
        .find(|r| r.contract == *contract && r.method.name == exporter.method_name())
        .ok_or_else(missing)?;

    if let Err(failure) = &result.outcome {
        return Err(SkipReason::FailedInput {
            contract: contract.clone(),
            method: exporter.method_name().to_string(),
            reason: failure.to_string(),
        });
    }

    let factor = match resolver.resolve(exporter.scale(), &result.method.address, exporter.int_type()) {
        Ok(f) => f,
        Err(e) => match unknown_scale {
            UnknownScalePolicy::Skip => return Err(SkipReason::UnknownScale { address: e.address }),
            UnknownScalePolicy::Unscaled => None,
        },
    };
    let value = exporter.value(result, factor).ok_or_else(missing)?;

    Ok(Some(Input {
        value,
        block: result.block,
        result_timestamp: result.observed_at,
    }))
}
