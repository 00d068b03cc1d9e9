//! Call protection and retry primitives.
//!
//! - [`backoff`]: delay computation per retry strategy.
//! - [`retry`]: the retry orchestrator wrapping an operation with bounded,
//!   backed-off attempts.
//! - [`circuit_breaker`], [`rate_limiter`], [`cache`]: per-dependency call
//!   guards, composed by [`guard::ServiceGuard`].
//! - [`fallback`]: ordered fallback chain of strategies.

pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod fallback;
pub mod guard;
pub mod rate_limiter;
pub mod retry;

pub use backoff::Backoff;
pub use cache::ResponseCache;
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use fallback::{FallbackChain, FallbackError};
pub use guard::{GuardError, GuardRegistry, ServiceGuard};
pub use rate_limiter::TokenBucket;
pub use retry::{RetryError, RetryObserver, RetryOrchestrator, RetryPolicy};
