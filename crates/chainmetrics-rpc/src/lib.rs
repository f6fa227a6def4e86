//! # chainmetrics-rpc
//!
//! HTTP JSON-RPC implementation of [`chainmetrics_core::NodeClient`] and an
//! HTTP [`chainmetrics_core::TokenListLoader`].
//!
//! The client performs exactly one request per call and classifies failures
//! into [`chainmetrics_core::NodeErrorKind`]; retry and backoff live in the
//! processor.

pub mod client;
pub mod rate_limiter;
pub mod request;
pub mod tokenlist;

pub use client::{HttpClientConfig, HttpNodeClient};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use tokenlist::HttpTokenListLoader;
