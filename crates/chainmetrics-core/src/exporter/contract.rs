//! Per-contract composition of method exporters.

use std::collections::BTreeMap;

use tracing::warn;

use crate::abi::OutputShape;
use crate::contract::{Contract, ContractMethod};
use crate::error::ContractError;
use crate::processor::DecodedResult;
use crate::scale::ScaleResolver;

use super::method::{FieldSelector, MethodExporter};
use super::{ExportBatch, SkipReason, SkipReport, UnknownScalePolicy};

/// Methods the generic expansion never exports on its own: metadata, or
/// values too large or unscalable to be useful as a series.
pub const SKIP_METHODS: &[&str] = &[
    "decimals",
    "eip712Domain",
    "metadata",
    "MAX_UINT",
    "UINT_MAX_VALUE",
    "getReserves",
    "reserve0",
    "reserve1",
    "price0CumulativeLast",
    "price1CumulativeLast",
    "kLast",
    "currentCumulativePrices",
    "reserve0CumulativeLast",
    "reserve1CumulativeLast",
    "lastObservation",
    "DELEGATE_PROTOCOL_SWAP_FEES_SENTINEL",
];

/// Every exporter attached to one contract.
#[derive(Debug, Clone)]
pub struct ContractExporter {
    contract: String,
    labels: BTreeMap<String, String>,
    exporters: Vec<MethodExporter>,
}

impl ContractExporter {
    /// No exporters yet; add them with [`ContractExporter::add`].
    pub fn new(contract: &Contract, network: &str) -> Self {
        let mut labels = contract.labels().clone();
        labels.insert("contract".to_string(), contract.name().to_string());
        labels.insert("network".to_string(), network.to_string());
        Self {
            contract: contract.name().to_string(),
            labels,
            exporters: Vec::new(),
        }
    }

    /// Exports every field of every method not in [`SKIP_METHODS`]:
    /// scalars as one metric, tuples as one per field, arrays as their length.
    pub fn generic(contract: &Contract, network: &str) -> Self {
        let mut this = Self::new(contract, network);
        for method in contract.methods() {
            if SKIP_METHODS.contains(&method.name.as_str()) {
                continue;
            }
            for field in expand_fields(method) {
                match MethodExporter::new(method, field, method.scale, None) {
                    Ok(exporter) => this.exporters.push(exporter),
                    Err(e) => warn!(contract = contract.name(), method = %method.name, error = %e, "cannot export field"),
                }
            }
        }
        this
    }

    pub fn add(&mut self, exporter: MethodExporter) {
        self.exporters.push(exporter);
    }

    /// Builds and adds an exporter for one field of `method`.
    pub fn export_field(
        &mut self,
        method: &ContractMethod,
        field: FieldSelector,
        key: Option<String>,
    ) -> Result<(), ContractError> {
        self.add(MethodExporter::new(method, field, method.scale, key)?);
        Ok(())
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn exporters(&self) -> &[MethodExporter] {
        &self.exporters
    }

    /// Exports this contract's share of a cycle's results.
    ///
    /// Failed results produce no metrics (they are reported as method
    /// failures by the caller). Unresolvable scales follow `unknown_scale`.
    pub fn export(
        &self,
        results: &[DecodedResult],
        resolver: &ScaleResolver,
        unknown_scale: UnknownScalePolicy,
    ) -> ExportBatch {
        let mut batch = ExportBatch::default();
        for result in results.iter().filter(|r| r.contract == self.contract && r.is_ok()) {
            for exporter in self
                .exporters
                .iter()
                .filter(|e| e.method_name() == result.method.name)
            {
                let factor = match resolver.resolve(exporter.scale(), &result.method.address, exporter.int_type()) {
                    Ok(f) => f,
                    Err(e) => match unknown_scale {
                        UnknownScalePolicy::Unscaled => None,
                        UnknownScalePolicy::Skip => {
                            warn!(contract = %self.contract, key = exporter.key(), error = %e, "skipping metric");
                            batch.skips.push(SkipReport {
                                key: exporter.key().to_string(),
                                reason: SkipReason::UnknownScale { address: e.address },
                            });
                            continue;
                        }
                    },
                };
                for mut metric in exporter.export(result, factor) {
                    for (k, v) in &self.labels {
                        metric.labels.insert(k.clone(), v.clone());
                    }
                    batch.metrics.push(metric);
                }
            }
        }
        batch
    }
}

fn expand_fields(method: &ContractMethod) -> Vec<FieldSelector> {
    match &method.output {
        OutputShape::Scalar(_) => vec![FieldSelector::Whole],
        OutputShape::Tuple { names, .. } => names
            .iter()
            .enumerate()
            .map(|(i, name)| match name {
                Some(n) => FieldSelector::Name(n.clone()),
                None => FieldSelector::Index(i),
            })
            .collect(),
        OutputShape::Array(_) => vec![FieldSelector::Length],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{DecodedValue, Value};
    use crate::contract::MethodOptions;
    use crate::int::{EvmInt, IntType};
    use crate::scale::ScaleSpec;
    use crate::tokenlist::TokenList;
    use alloy_primitives::{address, Address};
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, Utc};
    use num_bigint::BigInt;
    use std::sync::Arc;

    const TOKEN: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");

    fn contract() -> Contract {
        let mut c = Contract::new("dai", TOKEN).with_label("protocol", "maker");
        let opts = MethodOptions {
            scale: ScaleSpec::Auto,
            ..Default::default()
        };
        c.describe_with("totalSupply", "totalSupply()", "uint256", opts).unwrap();
        c.describe("decimals", "decimals()", "uint8").unwrap();
        c.describe_with(
            "slot",
            "slot()",
            "(uint256,int24)",
            MethodOptions {
                fields: vec!["price".into(), String::new()],
                ..Default::default()
            },
        )
        .unwrap();
        c.describe("ids", "ids()", "uint256[]").unwrap();
        c
    }

    fn ok(c: &Contract, name: &str, value: DecodedValue) -> DecodedResult {
        DecodedResult {
            contract: c.name().to_string(),
            method: c.method(name).unwrap().clone(),
            block: None,
            outcome: Ok(value),
            attempts: 1,
            observed_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn u256(v: u64) -> Value {
        Value::Int(EvmInt::new(IntType::UINT256, BigInt::from(v)).unwrap())
    }

    #[test]
    fn generic_expansion_covers_every_shape_and_skips_metadata() {
        let exporter = ContractExporter::generic(&contract(), "mainnet");
        let keys: Vec<_> = exporter.exporters().iter().map(|e| e.key()).collect();
        assert_eq!(keys, ["totalSupply", "slot.price", "slot[1]", "ids.length"]);
    }

    #[test]
    fn exports_with_contract_labels_and_resolved_scale() {
        let c = contract();
        let exporter = ContractExporter::generic(&c, "mainnet");
        let resolver = ScaleResolver::new(Arc::new(TokenList::empty(1))).with_override(TOKEN, 18);
        let results = vec![
            ok(&c, "totalSupply", DecodedValue::Scalar(u256(2_500_000_000_000_000_000))),
            ok(&c, "ids", DecodedValue::Array(vec![u256(1), u256(2)])),
        ];
        let batch = exporter.export(&results, &resolver, UnknownScalePolicy::Skip);
        assert!(batch.skips.is_empty());
        assert_eq!(batch.metrics.len(), 2);
        let supply = &batch.metrics[0];
        assert_eq!(supply.value, "2.5".parse::<BigDecimal>().unwrap());
        assert_eq!(supply.labels["network"], "mainnet");
        assert_eq!(supply.labels["protocol"], "maker");
        assert_eq!(supply.labels["contract"], "dai");
        assert_eq!(batch.metrics[1].value, BigDecimal::from(2));
    }

    #[test]
    fn unknown_scale_skips_or_emits_raw() {
        let c = contract();
        let exporter = ContractExporter::generic(&c, "mainnet");
        let resolver = ScaleResolver::new(Arc::new(TokenList::empty(1)));
        let results = vec![ok(&c, "totalSupply", DecodedValue::Scalar(u256(7)))];

        let skipped = exporter.export(&results, &resolver, UnknownScalePolicy::Skip);
        assert!(skipped.metrics.is_empty());
        assert_eq!(skipped.skips[0].reason, SkipReason::UnknownScale { address: TOKEN });

        let raw = exporter.export(&results, &resolver, UnknownScalePolicy::Unscaled);
        assert_eq!(raw.metrics[0].value, BigDecimal::from(7));
    }

    #[test]
    fn explicit_exports_include_skip_listed_methods() {
        let c = contract();
        let mut exporter = ContractExporter::new(&c, "mainnet");
        exporter
            .export_field(c.method("decimals").unwrap(), FieldSelector::Whole, Some("dai_decimals".into()))
            .unwrap();
        let ty = IntType::uint(8).unwrap();
        let results = vec![ok(
            &c,
            "decimals",
            DecodedValue::Scalar(Value::Int(EvmInt::new(ty, BigInt::from(18)).unwrap())),
        )];
        let resolver = ScaleResolver::new(Arc::new(TokenList::empty(1)));
        let batch = exporter.export(&results, &resolver, UnknownScalePolicy::Skip);
        assert_eq!(batch.metrics[0].name, "dai_decimals");
        assert_eq!(batch.metrics[0].value, BigDecimal::from(18));
    }
}
