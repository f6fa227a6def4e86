//! Fixed-width EVM integers backed by arbitrary precision.
//!
//! Every `uintN` / `intN` value read from the chain is held as an [`EvmInt`]:
//! the declared type plus a `BigInt` that is guaranteed to fit that type.
//! Nothing is ever converted through a float.

use std::fmt;
use std::str::FromStr;

use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};

use crate::error::{ArithmeticError, DecodeError, TypeMismatchError};

/// Size of one ABI word in bytes.
pub const WORD_SIZE: usize = 32;

/// An EVM integer type: width in bits and signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntType {
    pub bits: u16,
    pub signed: bool,
}

impl IntType {
    pub const UINT256: IntType = IntType { bits: 256, signed: false };
    pub const INT256: IntType = IntType { bits: 256, signed: true };

    /// Builds a validated type. Widths must be a multiple of 8 in `8..=256`.
    pub fn new(bits: u16, signed: bool) -> Result<Self, DecodeError> {
        let ty = Self { bits, signed };
        ty.validate()?;
        Ok(ty)
    }

    pub fn uint(bits: u16) -> Result<Self, DecodeError> {
        Self::new(bits, false)
    }

    pub fn int(bits: u16) -> Result<Self, DecodeError> {
        Self::new(bits, true)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        if self.bits == 0 || self.bits > 256 || self.bits % 8 != 0 {
            return Err(DecodeError::UnsupportedWidth { bits: self.bits });
        }
        Ok(())
    }

    /// Number of significant bytes in the word.
    pub fn byte_len(&self) -> usize {
        usize::from(self.bits / 8)
    }

    pub fn min_value(&self) -> BigInt {
        if self.signed {
            -(BigInt::one() << (self.bits as usize - 1))
        } else {
            BigInt::zero()
        }
    }

    pub fn max_value(&self) -> BigInt {
        if self.signed {
            (BigInt::one() << (self.bits as usize - 1)) - 1
        } else {
            (BigInt::one() << self.bits as usize) - 1
        }
    }

    /// Whether `value` is representable in this type.
    pub fn contains(&self, value: &BigInt) -> bool {
        *value >= self.min_value() && *value <= self.max_value()
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signed {
            write!(f, "int{}", self.bits)
        } else {
            write!(f, "uint{}", self.bits)
        }
    }
}

impl FromStr for IntType {
    type Err = DecodeError;

    /// Parses `uint256`, `int24`, and the bare aliases `uint` / `int`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (signed, rest) = if let Some(rest) = s.strip_prefix("uint") {
            (false, rest)
        } else if let Some(rest) = s.strip_prefix("int") {
            (true, rest)
        } else {
            return Err(DecodeError::UnsupportedWidth { bits: 0 });
        };
        let bits = if rest.is_empty() {
            256
        } else {
            rest.parse::<u16>()
                .map_err(|_| DecodeError::UnsupportedWidth { bits: 0 })?
        };
        Self::new(bits, signed)
    }
}

/// An immutable integer of a specific EVM type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvmInt {
    ty: IntType,
    raw: BigInt,
}

impl EvmInt {
    /// Returns `None` if `raw` does not fit `ty`.
    pub fn new(ty: IntType, raw: BigInt) -> Option<Self> {
        (ty.validate().is_ok() && ty.contains(&raw)).then_some(Self { ty, raw })
    }

    pub fn ty(&self) -> IntType {
        self.ty
    }

    /// The exact value.
    pub fn to_bigint(&self) -> BigInt {
        self.raw.clone()
    }

    pub fn as_bigint(&self) -> &BigInt {
        &self.raw
    }

    /// Decodes one ABI word.
    ///
    /// The bytes above the type's width must be a clean zero extension
    /// (unsigned) or sign extension (signed).
    pub fn decode(word: &[u8], ty: IntType) -> Result<Self, DecodeError> {
        if word.len() != WORD_SIZE {
            return Err(DecodeError::WordLength { got: word.len() });
        }
        ty.validate()?;

        let split = WORD_SIZE - ty.byte_len();
        let (padding, body) = word.split_at(split);

        let raw = if ty.signed {
            let negative = body[0] & 0x80 != 0;
            let fill = if negative { 0xff } else { 0x00 };
            if padding.iter().any(|b| *b != fill) {
                return Err(DecodeError::OutOfRange { ty });
            }
            BigInt::from_signed_bytes_be(body)
        } else {
            if padding.iter().any(|b| *b != 0) {
                return Err(DecodeError::OutOfRange { ty });
            }
            BigInt::from_bytes_be(Sign::Plus, body)
        };

        Ok(Self { ty, raw })
    }

    /// Encodes to one ABI word. Exact inverse of [`EvmInt::decode`].
    pub fn encode(&self) -> [u8; WORD_SIZE] {
        let negative = self.raw.sign() == Sign::Minus;
        let mut word = if negative { [0xffu8; WORD_SIZE] } else { [0u8; WORD_SIZE] };
        let bytes = if self.ty.signed {
            self.raw.to_signed_bytes_be()
        } else {
            self.raw.magnitude().to_bytes_be()
        };
        // Minimal encodings never exceed the word for in-range values, but
        // unsigned 256-bit maxima fill it exactly.
        let bytes = &bytes[bytes.len().saturating_sub(WORD_SIZE)..];
        word[WORD_SIZE - bytes.len()..].copy_from_slice(bytes);
        word
    }

    pub fn checked_add(&self, other: &EvmInt) -> Result<EvmInt, ArithmeticError> {
        self.combine(other, "add", |a, b| a + b)
    }

    pub fn checked_sub(&self, other: &EvmInt) -> Result<EvmInt, ArithmeticError> {
        self.combine(other, "sub", |a, b| a - b)
    }

    pub fn checked_mul(&self, other: &EvmInt) -> Result<EvmInt, ArithmeticError> {
        self.combine(other, "mul", |a, b| a * b)
    }

    fn combine(
        &self,
        other: &EvmInt,
        op: &'static str,
        f: impl FnOnce(&BigInt, &BigInt) -> BigInt,
    ) -> Result<EvmInt, ArithmeticError> {
        if self.ty != other.ty {
            return Err(TypeMismatchError {
                left: self.ty,
                right: other.ty,
            }
            .into());
        }
        let raw = f(&self.raw, &other.raw);
        if !self.ty.contains(&raw) {
            return Err(ArithmeticError::Overflow { ty: self.ty, op });
        }
        Ok(EvmInt { ty: self.ty, raw })
    }
}

impl fmt::Display for EvmInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_types() -> Vec<IntType> {
        (1..=32u16)
            .flat_map(|n| [IntType::uint(n * 8).unwrap(), IntType::int(n * 8).unwrap()])
            .collect()
    }

    #[test]
    fn round_trip_boundaries_for_every_width() {
        for ty in all_types() {
            let mut samples = vec![ty.min_value(), ty.max_value(), BigInt::zero(), BigInt::one()];
            if ty.signed {
                samples.push(BigInt::from(-1));
            }
            for raw in samples {
                let v = EvmInt::new(ty, raw.clone()).unwrap();
                let word = v.encode();
                let back = EvmInt::decode(&word, ty).unwrap();
                assert_eq!(back, v, "{ty} {raw}");
            }
        }
    }

    #[test]
    fn negative_int24_is_sign_extended() {
        let ty = IntType::int(24).unwrap();
        let v = EvmInt::new(ty, BigInt::from(-887272)).unwrap();
        let word = v.encode();
        assert!(word[..29].iter().all(|b| *b == 0xff));
        assert_eq!(EvmInt::decode(&word, ty).unwrap().to_bigint(), BigInt::from(-887272));
    }

    #[test]
    fn rejects_dirty_padding() {
        let mut word = [0u8; 32];
        word[0] = 1;
        word[31] = 5;
        let err = EvmInt::decode(&word, IntType::uint(8).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { .. }));

        // positive int8 with 0xff padding is not a valid sign extension
        let mut word = [0xffu8; 32];
        word[31] = 0x05;
        let err = EvmInt::decode(&word, IntType::int(8).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { .. }));
    }

    #[test]
    fn rejects_wrong_word_length() {
        let err = EvmInt::decode(&[0u8; 31], IntType::UINT256).unwrap_err();
        assert_eq!(err, DecodeError::WordLength { got: 31 });
    }

    #[test]
    fn rejects_unsupported_width() {
        assert!(IntType::uint(12).is_err());
        assert!(IntType::uint(264).is_err());
        assert!("uint7".parse::<IntType>().is_err());
        assert_eq!("uint".parse::<IntType>().unwrap(), IntType::UINT256);
        assert_eq!("int24".parse::<IntType>().unwrap().to_string(), "int24");
    }

    #[test]
    fn checked_arithmetic() {
        let u8t = IntType::uint(8).unwrap();
        let a = EvmInt::new(u8t, BigInt::from(200)).unwrap();
        let b = EvmInt::new(u8t, BigInt::from(55)).unwrap();
        assert_eq!(a.checked_add(&b).unwrap().to_bigint(), BigInt::from(255));

        let one = EvmInt::new(u8t, BigInt::one()).unwrap();
        let max = a.checked_add(&b).unwrap();
        assert!(matches!(
            max.checked_add(&one),
            Err(ArithmeticError::Overflow { op: "add", .. })
        ));
        assert!(matches!(b.checked_sub(&a), Err(ArithmeticError::Overflow { .. })));
        assert!(matches!(a.checked_mul(&b), Err(ArithmeticError::Overflow { .. })));
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let a = EvmInt::new(IntType::UINT256, BigInt::one()).unwrap();
        let b = EvmInt::new(IntType::INT256, BigInt::one()).unwrap();
        assert!(matches!(a.checked_add(&b), Err(ArithmeticError::TypeMismatch(_))));
    }

    #[test]
    fn new_rejects_out_of_range() {
        assert!(EvmInt::new(IntType::uint(8).unwrap(), BigInt::from(256)).is_none());
        assert!(EvmInt::new(IntType::UINT256, BigInt::from(-1)).is_none());
    }
}
