//! Method signatures, output shapes and the return-data decoder.
//!
//! # How it works
//! - Selector = keccak256(canonical signature)[..4]
//! - Static call arguments are coerced from strings and ABI-encoded once
//! - Outputs are restricted to integers and bools, laid out as a single
//!   value, a flat tuple, or a dynamic array

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Bytes};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::error::{ContractError, DecodeError};
use crate::int::{EvmInt, IntType, WORD_SIZE};

/// Element type of a supported output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int(IntType),
    Bool,
}

impl ValueType {
    fn from_dyn(ty: &DynSolType) -> Option<Self> {
        match ty {
            DynSolType::Uint(bits) => IntType::uint(*bits as u16).ok().map(Self::Int),
            DynSolType::Int(bits) => IntType::int(*bits as u16).ok().map(Self::Int),
            DynSolType::Bool => Some(Self::Bool),
            _ => None,
        }
    }

    fn decode(&self, word: &[u8]) -> Result<Value, DecodeError> {
        match self {
            Self::Int(ty) => EvmInt::decode(word, *ty).map(Value::Int),
            Self::Bool => {
                if word.len() != WORD_SIZE {
                    return Err(DecodeError::WordLength { got: word.len() });
                }
                let (high, last) = word.split_at(WORD_SIZE - 1);
                if high.iter().any(|b| *b != 0) || last[0] > 1 {
                    return Err(DecodeError::InvalidBool {
                        word: hex::encode(word),
                    });
                }
                Ok(Value::Bool(last[0] == 1))
            }
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(ty) => write!(f, "{ty}"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// Layout of a method's return data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    Scalar(ValueType),
    /// Ordered field types with optional names (same length as `types`).
    Tuple {
        types: Vec<ValueType>,
        names: Vec<Option<String>>,
    },
    Array(ValueType),
}

impl OutputShape {
    /// Parses a Solidity type string such as `uint256`,
    /// `(uint112,uint112,uint32)` or `int24[]`.
    pub fn parse(ty: &str) -> Result<Self, ContractError> {
        let unsupported = |reason: &str| ContractError::UnsupportedOutput {
            ty: ty.to_string(),
            reason: reason.to_string(),
        };
        let parsed = DynSolType::parse(ty.trim()).map_err(|e| unsupported(&e.to_string()))?;

        match &parsed {
            DynSolType::Tuple(fields) => {
                if fields.is_empty() {
                    return Err(unsupported("empty tuple"));
                }
                let types = fields
                    .iter()
                    .map(|f| {
                        ValueType::from_dyn(f).ok_or_else(|| {
                            unsupported("tuple fields must be integers or bools")
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                // A one-field tuple is just a scalar return.
                if types.len() == 1 {
                    return Ok(Self::Scalar(types[0]));
                }
                let names = vec![None; types.len()];
                Ok(Self::Tuple { types, names })
            }
            DynSolType::Array(inner) => ValueType::from_dyn(inner)
                .map(Self::Array)
                .ok_or_else(|| unsupported("array elements must be integers or bools")),
            other => ValueType::from_dyn(other)
                .map(Self::Scalar)
                .ok_or_else(|| unsupported("only integers, bools, flat tuples and arrays are supported")),
        }
    }

    /// Attaches field names to a tuple shape. Extra or missing names are an error.
    pub fn with_names(self, names: &[String]) -> Result<Self, ContractError> {
        if names.is_empty() {
            return Ok(self);
        }
        match self {
            Self::Tuple { types, .. } if types.len() == names.len() => {
                let names = names
                    .iter()
                    .map(|n| (!n.is_empty()).then(|| n.clone()))
                    .collect();
                Ok(Self::Tuple { types, names })
            }
            Self::Tuple { types, .. } => Err(ContractError::UnsupportedOutput {
                ty: format!("tuple of {}", types.len()),
                reason: format!("{} field names given", names.len()),
            }),
            other => Err(ContractError::UnsupportedOutput {
                ty: other.to_string(),
                reason: "field names only apply to tuple outputs".into(),
            }),
        }
    }

    /// Minimum number of bytes a well-formed return must carry.
    pub fn head_size(&self) -> usize {
        match self {
            Self::Scalar(_) | Self::Array(_) => WORD_SIZE,
            Self::Tuple { types, .. } => WORD_SIZE * types.len(),
        }
    }

    /// Index of a named tuple field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        match self {
            Self::Tuple { names, .. } => names
                .iter()
                .position(|n| n.as_deref() == Some(name)),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(t) => write!(f, "{t}"),
            Self::Tuple { types, .. } => {
                let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
            Self::Array(t) => write!(f, "{t}[]"),
        }
    }
}

/// A single decoded element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(EvmInt),
    Bool(bool),
}

impl Value {
    /// Numeric view; bools map to 0 / 1.
    pub fn to_bigint(&self) -> BigInt {
        match self {
            Self::Int(v) => v.to_bigint(),
            Self::Bool(b) => BigInt::from(u8::from(*b)),
        }
    }

    pub fn int_type(&self) -> Option<IntType> {
        match self {
            Self::Int(v) => Some(v.ty()),
            Self::Bool(_) => None,
        }
    }
}

/// A decoded return value mirroring its [`OutputShape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    Scalar(Value),
    Tuple(Vec<Value>),
    Array(Vec<Value>),
}

/// Decodes raw return data against `shape`.
pub fn decode_output(shape: &OutputShape, data: &[u8]) -> Result<DecodedValue, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::EmptyReturn);
    }
    let expected = shape.head_size();
    if data.len() < expected {
        return Err(DecodeError::ShortReturn {
            expected,
            got: data.len(),
        });
    }

    match shape {
        OutputShape::Scalar(ty) => ty.decode(&data[..WORD_SIZE]).map(DecodedValue::Scalar),
        OutputShape::Tuple { types, .. } => types
            .iter()
            .zip(data.chunks_exact(WORD_SIZE))
            .map(|(ty, word)| ty.decode(word))
            .collect::<Result<Vec<_>, _>>()
            .map(DecodedValue::Tuple),
        OutputShape::Array(ty) => {
            let offset = read_usize(&data[..WORD_SIZE]).ok_or_else(|| invalid_offset(data, 0))?;
            let len_end = offset
                .checked_add(WORD_SIZE)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| invalid_offset(data, 0))?;
            let len_word = &data[offset..len_end];
            let length = read_usize(len_word)
                .filter(|n| {
                    n.checked_mul(WORD_SIZE)
                        .and_then(|bytes| bytes.checked_add(len_end))
                        .is_some_and(|end| end <= data.len())
                })
                .ok_or_else(|| DecodeError::InvalidLength {
                    length: BigInt::from_bytes_be(num_bigint::Sign::Plus, len_word).to_string(),
                })?;
            data[len_end..len_end + length * WORD_SIZE]
                .chunks_exact(WORD_SIZE)
                .map(|word| ty.decode(word))
                .collect::<Result<Vec<_>, _>>()
                .map(DecodedValue::Array)
        }
    }
}

fn read_usize(word: &[u8]) -> Option<usize> {
    BigInt::from_bytes_be(num_bigint::Sign::Plus, word).to_usize()
}

fn invalid_offset(data: &[u8], at: usize) -> DecodeError {
    DecodeError::InvalidOffset {
        offset: BigInt::from_bytes_be(num_bigint::Sign::Plus, &data[at..at + WORD_SIZE]).to_string(),
        len: data.len(),
    }
}

/// A parsed `name(type,...)` function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<DynSolType>,
}

impl Signature {
    pub fn parse(signature: &str) -> Result<Self, ContractError> {
        let invalid = |reason: &str| ContractError::InvalidSignature {
            signature: signature.to_string(),
            reason: reason.to_string(),
        };
        let compact: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
        let open = compact.find('(').ok_or_else(|| invalid("missing '('"))?;
        if !compact.ends_with(')') {
            return Err(invalid("missing closing ')'"));
        }
        let name = &compact[..open];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("invalid method name"));
        }
        let inner = &compact[open + 1..compact.len() - 1];
        let params = if inner.is_empty() {
            Vec::new()
        } else {
            match DynSolType::parse(&format!("({inner})")) {
                Ok(DynSolType::Tuple(types)) => types,
                Ok(other) => vec![other],
                Err(e) => return Err(invalid(&e.to_string())),
            }
        };
        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    /// `name(type1,type2)` with canonical type names (`uint` → `uint256`).
    pub fn canonical(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| p.sol_type_name().into_owned())
            .collect();
        format!("{}({})", self.name, params.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        selector(&self.canonical())
    }

    /// Coerces `args` against the parameter types and ABI-encodes them.
    pub fn encode_args(&self, args: &[String]) -> Result<Vec<u8>, ContractError> {
        let invalid = |reason: String| ContractError::InvalidArguments {
            method: self.name.clone(),
            reason,
        };
        if args.len() != self.params.len() {
            return Err(invalid(format!(
                "expected {} argument(s), got {}",
                self.params.len(),
                args.len()
            )));
        }
        if args.is_empty() {
            return Ok(Vec::new());
        }
        let values = self
            .params
            .iter()
            .zip(args)
            .map(|(ty, arg)| {
                ty.coerce_str(arg)
                    .map_err(|e| invalid(format!("'{arg}' is not a valid {}: {e}", ty.sol_type_name())))
            })
            .collect::<Result<Vec<DynSolValue>, _>>()?;
        Ok(DynSolValue::Tuple(values).abi_encode_params())
    }
}

/// First four bytes of keccak256 over the signature text.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Full calldata: selector followed by encoded arguments.
pub fn build_calldata(selector: [u8; 4], encoded_args: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(4 + encoded_args.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(encoded_args);
    Bytes::from(out)
}

/// Parses a `0x`-prefixed 4-byte selector override.
pub fn parse_selector(s: &str) -> Result<[u8; 4], ContractError> {
    let raw = hex::decode(s.trim_start_matches("0x"))
        .map_err(|_| ContractError::InvalidSelector(s.to_string()))?;
    raw.try_into()
        .map_err(|_| ContractError::InvalidSelector(s.to_string()))
}
