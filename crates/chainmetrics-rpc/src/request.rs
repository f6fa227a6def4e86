//! JSON-RPC 2.0 wire types and the two calls the exporter needs.

use alloy_primitives::{Address, Bytes};
use chainmetrics_core::node::BlockTag;
use chainmetrics_core::NodeErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }

    /// `eth_call` with `{to, data}` at `block`.
    pub fn eth_call(id: u64, to: Address, data: &Bytes, block: BlockTag) -> Self {
        Self::new(
            id,
            "eth_call",
            vec![json!({ "to": to, "data": data }), block_param(block)],
        )
    }

    /// `eth_getBlockByNumber` without transaction bodies.
    pub fn get_block(id: u64, block: BlockTag) -> Self {
        Self::new(id, "eth_getBlockByNumber", vec![block_param(block), Value::Bool(false)])
    }
}

fn block_param(block: BlockTag) -> Value {
    match block {
        BlockTag::Latest => Value::String("latest".into()),
        BlockTag::Number(n) => Value::String(format!("{n:#x}")),
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl JsonRpcError {
    /// Maps node error codes and messages onto retry classes.
    ///
    /// Providers disagree on codes, so messages are checked too.
    pub fn kind(&self) -> NodeErrorKind {
        let msg = self.message.to_ascii_lowercase();
        if self.code == 3 || msg.contains("revert") || msg.contains("invalid opcode") {
            NodeErrorKind::Reverted
        } else if matches!(self.code, -32005 | -32029 | 429) || is_rate_limit_message(&msg) {
            NodeErrorKind::RateLimited
        } else if msg.contains("timeout") || msg.contains("timed out") {
            NodeErrorKind::Timeout
        } else {
            NodeErrorKind::Protocol
        }
    }
}

/// Provider phrasings for a spent request budget. A bare "exceeded" is not
/// enough: "gas limit exceeded" and similar are execution errors.
fn is_rate_limit_message(msg: &str) -> bool {
    const PHRASES: [&str; 7] = [
        "rate limit",
        "ratelimit",
        "too many requests",
        "request count exceeded",
        "request limit exceeded",
        "capacity exceeded",
        "quota",
    ];
    PHRASES.iter().any(|p| msg.contains(p))
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Returns `true` if this is a successful response (has result, no error).
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// The result value, or the error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}
