//! Contract and method descriptors.
//!
//! A [`Contract`] is a named set of [`ContractMethod`]s sharing one address.
//! Descriptors are validated and fully encoded at registration, then shared
//! immutably with the processor via `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes};

use crate::abi::{build_calldata, OutputShape, Signature};
use crate::error::{ContractError, DuplicateMethodError};
use crate::scale::ScaleSpec;

/// One read-only call and the layout of its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMethod {
    /// Name the method is registered under (usually the function name).
    pub name: String,
    pub address: Address,
    /// Canonical `name(types)` signature.
    pub signature: String,
    pub selector: [u8; 4],
    /// Selector plus encoded static arguments.
    pub calldata: Bytes,
    pub args: Vec<String>,
    pub output: OutputShape,
    pub scale: ScaleSpec,
}

/// Optional parts of a method registration.
#[derive(Debug, Clone, Default)]
pub struct MethodOptions {
    pub args: Vec<String>,
    pub fields: Vec<String>,
    pub scale: ScaleSpec,
    pub selector: Option<[u8; 4]>,
}

#[derive(Debug, Clone)]
pub struct Contract {
    name: String,
    address: Address,
    labels: BTreeMap<String, String>,
    methods: Vec<Arc<ContractMethod>>,
}

impl Contract {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            labels: BTreeMap::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Methods in registration order.
    pub fn methods(&self) -> &[Arc<ContractMethod>] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&Arc<ContractMethod>> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Registers a no-argument, unscaled method.
    pub fn describe(
        &mut self,
        name: &str,
        signature: &str,
        returns: &str,
    ) -> Result<Arc<ContractMethod>, ContractError> {
        self.describe_with(name, signature, returns, MethodOptions::default())
    }

    pub fn describe_with(
        &mut self,
        name: &str,
        signature: &str,
        returns: &str,
        options: MethodOptions,
    ) -> Result<Arc<ContractMethod>, ContractError> {
        if self.method(name).is_some() {
            return Err(DuplicateMethodError {
                contract: self.name.clone(),
                method: name.to_string(),
            }
            .into());
        }

        let sig = Signature::parse(signature)?;
        let output = OutputShape::parse(returns)?.with_names(&options.fields)?;
        let encoded = sig.encode_args(&options.args)?;
        let selector = options.selector.unwrap_or_else(|| sig.selector());

        let method = Arc::new(ContractMethod {
            name: name.to_string(),
            address: self.address,
            signature: sig.canonical(),
            selector,
            calldata: build_calldata(selector, &encoded),
            args: options.args,
            output,
            scale: options.scale,
        });
        self.methods.push(method.clone());
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const PAIR: Address = address!("B4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc");

    #[test]
    fn describe_builds_calldata() {
        let mut c = Contract::new("usdc_weth", PAIR);
        let m = c
            .describe_with(
                "balanceOf",
                "balanceOf(address)",
                "uint256",
                MethodOptions {
                    args: vec![PAIR.to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(&m.calldata[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(m.calldata.len(), 36);
        assert_eq!(m.address, PAIR);
    }

    #[test]
    fn duplicate_names_fail() {
        let mut c = Contract::new("pair", PAIR);
        c.describe("totalSupply", "totalSupply()", "uint256").unwrap();
        let err = c.describe("totalSupply", "totalSupply()", "uint256").unwrap_err();
        assert_eq!(
            err,
            ContractError::Duplicate(DuplicateMethodError {
                contract: "pair".into(),
                method: "totalSupply".into(),
            })
        );
        assert_eq!(c.methods().len(), 1);
    }

    #[test]
    fn keeps_registration_order() {
        let mut c = Contract::new("pair", PAIR);
        c.describe("getReserves", "getReserves()", "(uint112,uint112,uint32)").unwrap();
        c.describe("totalSupply", "totalSupply()", "uint256").unwrap();
        let names: Vec<_> = c.methods().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["getReserves", "totalSupply"]);
    }

    #[test]
    fn selector_override_is_used() {
        let mut c = Contract::new("pair", PAIR);
        let m = c
            .describe_with(
                "custom",
                "custom()",
                "uint256",
                MethodOptions {
                    selector: Some([1, 2, 3, 4]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(m.calldata.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_unsupported_outputs() {
        let mut c = Contract::new("pair", PAIR);
        assert!(matches!(
            c.describe("token0", "token0()", "address"),
            Err(ContractError::UnsupportedOutput { .. })
        ));
    }
}
