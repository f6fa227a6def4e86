//! The node client boundary.

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::NodeError;

/// Block a call is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Height and timestamp of the block results were read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Read-only access to an EVM node.
///
/// # Object Safety
/// The trait is object-safe and is shared as `Arc<dyn NodeClient>`.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// `eth_call` of `calldata` against `address` at `block`.
    async fn call(&self, address: Address, calldata: Bytes, block: BlockTag) -> Result<Bytes, NodeError>;

    /// Number and timestamp of `block`.
    async fn block_context(&self, block: BlockTag) -> Result<BlockContext, NodeError>;
}
