//! One decoded method value → one metric.

use std::collections::BTreeMap;
use std::fmt;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use crate::abi::{DecodedValue, OutputShape, ValueType};
use crate::contract::ContractMethod;
use crate::error::ContractError;
use crate::int::IntType;
use crate::metric::Metric;
use crate::processor::DecodedResult;
use crate::scale::{ScaleFactor, ScaleSpec};

/// Which part of a decoded value a metric reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldSelector {
    /// The scalar itself.
    Whole,
    /// A tuple field by position.
    Index(usize),
    /// A tuple field by name.
    Name(String),
    /// The number of elements of an array.
    Length,
}

impl FieldSelector {
    /// Parses `""`, `"length"`, a position or a field name.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" => Self::Whole,
            "length" => Self::Length,
            s => s
                .parse::<usize>()
                .map(Self::Index)
                .unwrap_or_else(|_| Self::Name(s.to_string())),
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => Ok(()),
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Name(n) => write!(f, ".{n}"),
            Self::Length => write!(f, ".length"),
        }
    }
}

/// A selected numeric value and the integer type it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    pub raw: BigInt,
    /// `None` for bools and array lengths.
    pub ty: Option<IntType>,
}

/// Exports one field of one method as a metric series.
#[derive(Debug, Clone)]
pub struct MethodExporter {
    key: String,
    method_name: String,
    field: FieldSelector,
    /// Resolved tuple position for `Index` / `Name`.
    position: Option<usize>,
    scale: ScaleSpec,
    value_type: Option<ValueType>,
    labels: BTreeMap<String, String>,
}

impl MethodExporter {
    /// Validates `field` against the method's output shape.
    ///
    /// `key` defaults to the method name plus the field suffix
    /// (`getReserves.reserve0`, `slot0[1]`, `getTicks.length`).
    pub fn new(
        method: &ContractMethod,
        field: FieldSelector,
        scale: ScaleSpec,
        key: Option<String>,
    ) -> Result<Self, ContractError> {
        let invalid = |reason: String| ContractError::UnsupportedOutput {
            ty: method.output.to_string(),
            reason,
        };

        let (position, value_type) = match (&method.output, &field) {
            (OutputShape::Scalar(t), FieldSelector::Whole) => (None, Some(*t)),
            (OutputShape::Tuple { types, .. }, FieldSelector::Index(i)) => {
                let t = types
                    .get(*i)
                    .ok_or_else(|| invalid(format!("field {i} out of range for '{}'", method.name)))?;
                (Some(*i), Some(*t))
            }
            (OutputShape::Tuple { types, .. }, FieldSelector::Name(n)) => {
                let i = method
                    .output
                    .field_index(n)
                    .ok_or_else(|| invalid(format!("'{}' has no field named '{n}'", method.name)))?;
                (Some(i), Some(types[i]))
            }
            (OutputShape::Array(_), FieldSelector::Length) => (None, None),
            (_, field) => {
                return Err(invalid(format!(
                    "field selector '{field}' does not apply to '{}'",
                    method.name
                )))
            }
        };

        let key = key.unwrap_or_else(|| format!("{}{}", method.name, field));
        let mut labels = BTreeMap::new();
        labels.insert("address".to_string(), method.address.to_checksum(None));
        labels.insert("method".to_string(), method.name.clone());

        Ok(Self {
            key,
            method_name: method.name.clone(),
            field,
            position,
            scale,
            value_type,
            labels,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn field(&self) -> &FieldSelector {
        &self.field
    }

    pub fn scale(&self) -> ScaleSpec {
        self.scale
    }

    /// Integer type of the selected value, used for `auto` scaling.
    pub fn int_type(&self) -> Option<IntType> {
        match self.value_type {
            Some(ValueType::Int(t)) => Some(t),
            _ => None,
        }
    }

    /// Adds or replaces a label. `contract`/`network` are set by the owner.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Picks the configured field out of a decoded value.
    pub fn select(&self, value: &DecodedValue) -> Option<Selected> {
        let one = |v: &crate::abi::Value| Selected {
            raw: v.to_bigint(),
            ty: v.int_type(),
        };
        match (value, &self.field) {
            (DecodedValue::Scalar(v), FieldSelector::Whole) => Some(one(v)),
            (DecodedValue::Tuple(vs), FieldSelector::Index(_) | FieldSelector::Name(_)) => {
                self.position.and_then(|i| vs.get(i)).map(one)
            }
            (DecodedValue::Array(vs), FieldSelector::Length) => Some(Selected {
                raw: BigInt::from(vs.len()),
                ty: None,
            }),
            _ => None,
        }
    }

    /// Scaled value of the configured field, if the call succeeded.
    /// Bools and array lengths are counts, never scaled.
    pub fn value(&self, result: &DecodedResult, scale: Option<ScaleFactor>) -> Option<BigDecimal> {
        let decoded = result.outcome.as_ref().ok()?;
        let selected = self.select(decoded)?;
        Some(match (scale, selected.ty) {
            (Some(f), Some(_)) => f.apply_bigint(&selected.raw),
            _ => BigDecimal::from(selected.raw),
        })
    }

    /// Exactly one metric for a successful result, none for a failed one.
    pub fn export(&self, result: &DecodedResult, scale: Option<ScaleFactor>) -> Vec<Metric> {
        let Some(value) = self.value(result, scale) else {
            return Vec::new();
        };
        let mut labels = self.labels.clone();
        labels
            .entry("contract".to_string())
            .or_insert_with(|| result.contract.clone());
        vec![Metric {
            name: self.key.clone(),
            labels,
            value,
            timestamp: result.timestamp(),
            block_number: result.block.map(|b| b.number),
        }]
    }
}
