//! Raw on-chain integers to exact human-scaled decimals.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use serde::{Deserialize, Deserializer};

use crate::error::{ArithmeticError, UnknownScaleError};
use crate::int::{EvmInt, IntType};
use crate::tokenlist::TokenListResolver;

/// A decimal exponent: scaled = raw / 10^decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScaleFactor {
    pub decimals: u32,
}

impl ScaleFactor {
    pub const fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    /// Scales an arbitrary integer. Exact.
    pub fn apply_bigint(&self, raw: &BigInt) -> BigDecimal {
        BigDecimal::new(raw.clone(), i64::from(self.decimals))
    }
}

/// `raw / 10^decimals`, exactly.
pub fn apply(value: &EvmInt, factor: ScaleFactor) -> BigDecimal {
    factor.apply_bigint(value.as_bigint())
}

/// Inverse of [`apply`]. Fails if `value * 10^decimals` is not an integer.
pub fn unscale(value: &BigDecimal, factor: ScaleFactor) -> Result<BigInt, ArithmeticError> {
    let shifted = value * BigDecimal::new(BigInt::from(1), -i64::from(factor.decimals));
    let truncated = shifted.with_scale(0);
    if truncated != shifted {
        return Err(ArithmeticError::NotIntegral {
            value: value.to_string(),
            decimals: factor.decimals,
        });
    }
    let (digits, _) = truncated.into_bigint_and_exponent();
    Ok(digits)
}

/// How a method's value should be scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleSpec {
    /// Emit the raw integer.
    #[default]
    None,
    /// A fixed number of decimals.
    Decimals(u32),
    /// The decimals of the method's own contract. Only applied to 256-bit
    /// integers; narrower widths are left unscaled.
    Auto,
    /// The decimals of another token.
    Token(Address),
}

impl FromStr for ScaleSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" | "none" | "false" => Ok(Self::None),
            "auto" | "true" => Ok(Self::Auto),
            _ if s.starts_with("0x") => s
                .parse::<Address>()
                .map(Self::Token)
                .map_err(|e| format!("invalid scale token address '{s}': {e}")),
            _ => s
                .parse::<u32>()
                .map(Self::Decimals)
                .map_err(|_| format!("invalid scale '{s}': expected none, auto, decimals or a token address")),
        }
    }
}

impl fmt::Display for ScaleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Decimals(d) => write!(f, "{d}"),
            Self::Auto => write!(f, "auto"),
            Self::Token(a) => write!(f, "{a}"),
        }
    }
}

impl<'de> Deserialize<'de> for ScaleSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Num(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(Self::Auto),
            Raw::Bool(false) => Ok(Self::None),
            Raw::Num(d) => Ok(Self::Decimals(d)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Resolves decimals from explicit overrides, then the token list.
#[derive(Clone)]
pub struct ScaleResolver {
    tokens: Arc<dyn TokenListResolver>,
    overrides: HashMap<Address, u32>,
}

impl ScaleResolver {
    pub fn new(tokens: Arc<dyn TokenListResolver>) -> Self {
        Self {
            tokens,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, address: Address, decimals: u32) -> Self {
        self.overrides.insert(address, decimals);
        self
    }

    pub fn resolve_scale_factor(&self, address: &Address) -> Result<ScaleFactor, UnknownScaleError> {
        if let Some(d) = self.overrides.get(address) {
            return Ok(ScaleFactor::new(*d));
        }
        self.tokens
            .lookup(address)
            .map(|entry| ScaleFactor::new(entry.decimals))
            .ok_or(UnknownScaleError { address: *address })
    }

    /// The factor to apply for `spec` on a value of type `ty` read from
    /// `contract`. `Ok(None)` means "emit unscaled".
    pub fn resolve(
        &self,
        spec: ScaleSpec,
        contract: &Address,
        ty: Option<IntType>,
    ) -> Result<Option<ScaleFactor>, UnknownScaleError> {
        match spec {
            ScaleSpec::None => Ok(None),
            ScaleSpec::Decimals(d) => Ok(Some(ScaleFactor::new(d))),
            ScaleSpec::Auto => match ty {
                Some(t) if t.bits == 256 => self.resolve_scale_factor(contract).map(Some),
                _ => Ok(None),
            },
            ScaleSpec::Token(token) => self.resolve_scale_factor(&token).map(Some),
        }
    }
}

impl fmt::Debug for ScaleResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleResolver")
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenlist::{TokenList, TokenListEntry};
    use alloy_primitives::address;

    const TOKEN: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");

    fn resolver() -> ScaleResolver {
        let list = TokenList::new(
            1,
            vec![TokenListEntry {
                address: TOKEN,
                decimals: 18,
                symbol: "DAI".into(),
                name: None,
                chain_id: 1,
            }],
        );
        ScaleResolver::new(Arc::new(list))
    }

    #[test]
    fn apply_is_exact() {
        let raw = EvmInt::new(IntType::UINT256, BigInt::from(1_500_000_000_000_000_000u64)).unwrap();
        let scaled = apply(&raw, ScaleFactor::new(18));
        assert_eq!(scaled, "1.5".parse::<BigDecimal>().unwrap());
        assert_eq!(scaled.normalized().to_string(), "1.5");
    }

    #[test]
    fn unscale_inverts_apply() {
        for (raw, d) in [(0i64, 0u32), (1, 18), (-123456789, 6), (10, 1), (i64::MAX, 30)] {
            let v = EvmInt::new(IntType::INT256, BigInt::from(raw)).unwrap();
            let f = ScaleFactor::new(d);
            assert_eq!(unscale(&apply(&v, f), f).unwrap(), BigInt::from(raw));
        }
    }

    #[test]
    fn unscale_rejects_fractions() {
        let v: BigDecimal = "0.0000001".parse().unwrap();
        assert!(matches!(
            unscale(&v, ScaleFactor::new(6)),
            Err(ArithmeticError::NotIntegral { .. })
        ));
    }

    #[test]
    fn override_beats_token_list() {
        let r = resolver().with_override(TOKEN, 8);
        assert_eq!(r.resolve_scale_factor(&TOKEN).unwrap().decimals, 8);
    }

    #[test]
    fn unknown_address_is_an_error() {
        let other = address!("0000000000000000000000000000000000000001");
        assert_eq!(
            resolver().resolve_scale_factor(&other).unwrap_err(),
            UnknownScaleError { address: other }
        );
    }

    #[test]
    fn auto_only_scales_256_bit() {
        let r = resolver();
        assert_eq!(
            r.resolve(ScaleSpec::Auto, &TOKEN, Some(IntType::UINT256)).unwrap(),
            Some(ScaleFactor::new(18))
        );
        assert_eq!(r.resolve(ScaleSpec::Auto, &TOKEN, Some(IntType::uint(112).unwrap())).unwrap(), None);
        assert_eq!(r.resolve(ScaleSpec::Auto, &TOKEN, None).unwrap(), None);
    }

    #[test]
    fn parses_scale_specs() {
        assert_eq!("auto".parse::<ScaleSpec>().unwrap(), ScaleSpec::Auto);
        assert_eq!("6".parse::<ScaleSpec>().unwrap(), ScaleSpec::Decimals(6));
        assert_eq!(
            "0x6B175474E89094C44Da98b954EedeAC495271d0F".parse::<ScaleSpec>().unwrap(),
            ScaleSpec::Token(TOKEN)
        );
        assert!("seven".parse::<ScaleSpec>().is_err());

        let from_yaml: Vec<ScaleSpec> = serde_yaml::from_str("[true, false, 18, auto, none]").unwrap();
        assert_eq!(
            from_yaml,
            vec![ScaleSpec::Auto, ScaleSpec::None, ScaleSpec::Decimals(18), ScaleSpec::Auto, ScaleSpec::None]
        );
    }
}
