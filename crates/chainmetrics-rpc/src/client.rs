//! HTTP JSON-RPC node client backed by `reqwest`.
//!
//! One HTTP request per call. Failures are classified into
//! [`NodeErrorKind`] so the processor can decide what to retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use chainmetrics_core::{BlockContext, BlockTag, NodeClient, NodeError, NodeErrorKind};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Configuration for [`HttpNodeClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
    /// `None` disables client-side rate limiting.
    pub rate_limiter: Option<RateLimiterConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            rate_limiter: Some(RateLimiterConfig::default()),
        }
    }
}

pub struct HttpNodeClient {
    url: String,
    http: reqwest::Client,
    rate_limiter: Option<RateLimiter>,
    next_id: AtomicU64,
}

impl HttpNodeClient {
    /// Create a client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NodeError::protocol(format!("building HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            rate_limiter: config.rate_limiter.map(RateLimiter::new),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, req: &JsonRpcRequest) -> Result<Value, NodeError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(status, method = %req.method, url = %self.url, "non-success HTTP status");
            return Err(NodeError::new(classify_status(status), format!("HTTP {status}: {body}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| NodeError::protocol(format!("invalid JSON-RPC response: {e}")))?;

        body.into_result().map_err(|err| {
            let mut message = err.message.clone();
            if let Some(Value::String(data)) = &err.data {
                message = format!("{message} ({data})");
            }
            NodeError::new(err.kind(), format!("{} (code {})", message, err.code))
        })
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn call(&self, address: Address, calldata: Bytes, block: BlockTag) -> Result<Bytes, NodeError> {
        let req = JsonRpcRequest::eth_call(self.id(), address, &calldata, block);
        let result = self.send(&req).await?;
        parse_bytes(&result)
    }

    async fn block_context(&self, block: BlockTag) -> Result<BlockContext, NodeError> {
        let req = JsonRpcRequest::get_block(self.id(), block);
        let result = self.send(&req).await?;
        parse_block(&result)
    }
}

fn transport_error(e: reqwest::Error) -> NodeError {
    let kind = if e.is_timeout() {
        NodeErrorKind::Timeout
    } else if e.is_connect() || e.is_request() {
        NodeErrorKind::ConnectionFailed
    } else {
        NodeErrorKind::Protocol
    };
    NodeError::new(kind, e.to_string())
}

/// Retry class for a non-2xx HTTP status.
pub fn classify_status(status: u16) -> NodeErrorKind {
    match status {
        429 => NodeErrorKind::RateLimited,
        408 | 504 => NodeErrorKind::Timeout,
        502 | 503 => NodeErrorKind::ConnectionFailed,
        _ => NodeErrorKind::Protocol,
    }
}

fn parse_bytes(v: &Value) -> Result<Bytes, NodeError> {
    let s = v
        .as_str()
        .ok_or_else(|| NodeError::protocol(format!("expected hex string, got {v}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| NodeError::protocol(format!("invalid hex in eth_call result: {e}")))
}

fn parse_quantity(v: Option<&Value>, field: &str) -> Result<u64, NodeError> {
    let s = v
        .and_then(Value::as_str)
        .ok_or_else(|| NodeError::protocol(format!("block is missing `{field}`")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| NodeError::protocol(format!("invalid `{field}` {s}: {e}")))
}

fn parse_block(v: &Value) -> Result<BlockContext, NodeError> {
    if v.is_null() {
        return Err(NodeError::protocol("block not found"));
    }
    let number = parse_quantity(v.get("number"), "number")?;
    let secs = parse_quantity(v.get("timestamp"), "timestamp")?;
    let timestamp = i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .ok_or_else(|| NodeError::protocol(format!("block timestamp {secs} out of range")))?;
    Ok(BlockContext { number, timestamp })
}
