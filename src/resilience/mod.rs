//! Resilience Module - Circuit Breaker, Retries, Bounded Blocking Calls

mod bounded;
mod circuit_breaker;
mod retry;

pub use bounded::{block_on_bounded, BoundedCallError};
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use retry::{with_retry_async, RetryConfig};
