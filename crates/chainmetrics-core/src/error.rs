//! Error types for the contract-to-metric pipeline.
//!
//! Each stage has its own error so operators can tell "couldn't read the
//! chain" apart from "couldn't scale" and "couldn't persist".

use alloy_primitives::Address;
use thiserror::Error;

use crate::int::IntType;

/// Malformed on-chain return data. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected a 32-byte ABI word, got {got} bytes")]
    WordLength { got: usize },

    #[error("unsupported integer width {bits}: must be a multiple of 8 in 8..=256")]
    UnsupportedWidth { bits: u16 },

    #[error("word is not a valid {ty}: high bits are not a clean {}", if .ty.signed { "sign extension" } else { "zero padding" })]
    OutOfRange { ty: IntType },

    #[error("empty return data (the call likely reverted or the target has no code)")]
    EmptyReturn,

    #[error("return data too short: need {expected} bytes, got {got}")]
    ShortReturn { expected: usize, got: usize },

    #[error("invalid bool word: {word}")]
    InvalidBool { word: String },

    #[error("invalid dynamic offset {offset} for {len}-byte return data")]
    InvalidOffset { offset: String, len: usize },

    #[error("array length {length} does not fit in the return data")]
    InvalidLength { length: String },
}

/// Two integers of different width or signedness were combined.
///
/// Only reachable through misuse; a correct configuration never mixes types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type mismatch: {left} vs {right}")]
pub struct TypeMismatchError {
    pub left: IntType,
    pub right: IntType,
}

/// Checked integer arithmetic failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),

    #[error("{op} overflowed {ty}")]
    Overflow { ty: IntType, op: &'static str },

    #[error("{value} is not an integer at {decimals} decimals")]
    NotIntegral { value: String, decimals: u32 },
}

/// No decimals could be resolved for a contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no scale factor known for {address}: not in the token list and no override configured")]
pub struct UnknownScaleError {
    pub address: Address,
}

/// Token-list fetch or parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenListError {
    #[error("failed to fetch token list: {0}")]
    Fetch(String),

    #[error("failed to parse token list: {0}")]
    Parse(String),
}

/// Classification of a node failure, used to decide retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeErrorKind {
    Timeout,
    RateLimited,
    Reverted,
    ConnectionFailed,
    /// Any other JSON-RPC or response-shape failure.
    Protocol,
}

impl std::fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate-limited"),
            Self::Reverted => write!(f, "reverted"),
            Self::ConnectionFailed => write!(f, "connection-failed"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

/// Errors reported by a [`NodeClient`](crate::node::NodeClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn new(kind: NodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::RateLimited, message)
    }

    pub fn reverted(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::Reverted, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::ConnectionFailed, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::Protocol, message)
    }

    /// Returns `true` if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            NodeErrorKind::Timeout | NodeErrorKind::RateLimited | NodeErrorKind::ConnectionFailed
        )
    }
}

/// Why a single method produced no value in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodFailure {
    #[error("node error after {attempts} attempt(s): {source}")]
    Node {
        #[source]
        source: NodeError,
        attempts: u32,
    },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("cycle deadline of {ms}ms exceeded")]
    DeadlineExceeded { ms: u64 },
}

impl MethodFailure {
    /// Short machine-friendly reason, used as a log field and skip label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Node { source, .. } => match source.kind {
                NodeErrorKind::Timeout => "timeout",
                NodeErrorKind::RateLimited => "rate_limited",
                NodeErrorKind::Reverted => "reverted",
                NodeErrorKind::ConnectionFailed => "connection_failed",
                NodeErrorKind::Protocol => "protocol",
            },
            Self::Decode(_) => "decode",
            Self::DeadlineExceeded { .. } => "deadline",
        }
    }
}

/// A sink could not persist some or all of a batch. Not retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to persist {} metric(s): {reason}", .failed_indices.len())]
pub struct WriteFailure {
    /// Indices into the batch passed to `write`.
    pub failed_indices: Vec<usize>,
    pub reason: String,
}

impl WriteFailure {
    /// Every metric in a batch of `len` failed.
    pub fn all(len: usize, reason: impl Into<String>) -> Self {
        Self {
            failed_indices: (0..len).collect(),
            reason: reason.into(),
        }
    }
}

/// A method name was registered twice on the same contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("method '{method}' already registered on contract '{contract}'")]
pub struct DuplicateMethodError {
    pub contract: String,
    pub method: String,
}

/// Errors raised while building contract descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateMethodError),

    #[error("invalid signature '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("unsupported output type '{ty}': {reason}")]
    UnsupportedOutput { ty: String, reason: String },

    #[error("invalid arguments for '{method}': {reason}")]
    InvalidArguments { method: String, reason: String },

    #[error("invalid selector '{0}': expected 4 bytes of hex")]
    InvalidSelector(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("config file must be .json, .yaml or .yml: {0}")]
    UnsupportedFormat(String),

    #[error("config validation failed:\n- {}", .0.join("\n- "))]
    Invalid(Vec<String>),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(NodeError::timeout("t").is_retryable());
        assert!(NodeError::rate_limited("429").is_retryable());
        assert!(NodeError::connection_failed("refused").is_retryable());
        assert!(!NodeError::reverted("execution reverted").is_retryable());
        assert!(!NodeError::protocol("bad json").is_retryable());
    }

    #[test]
    fn write_failure_all_indices() {
        let f = WriteFailure::all(3, "db down");
        assert_eq!(f.failed_indices, vec![0, 1, 2]);
        assert_eq!(f.to_string(), "failed to persist 3 metric(s): db down");
    }

    #[test]
    fn invalid_config_lists_every_problem() {
        let e = ConfigError::Invalid(vec!["a".into(), "b".into()]);
        assert_eq!(e.to_string(), "config validation failed:\n- a\n- b");
    }
}
