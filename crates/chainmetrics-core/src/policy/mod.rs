//! Retry policy for node calls.

pub mod retry;

pub use retry::{FixedJitter, JitterSource, RetryConfig, RetryPolicy, XorShiftJitter};
