//! Headless browser sessions.
//!
//! [`driver`] defines the port a browser backend implements (autoflow-infra
//! ships a process-backed one). [`pool::BrowserPool`] owns the live sessions
//! and enforces per-owner, memory and idle limits.

pub mod driver;
pub mod error;
pub mod pool;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use driver::{
    BoxBrowserDriver, BoxBrowserInstance, BrowserDriver, BrowserInstance, ExtractRequest,
    LaunchOptions, PageInfo,
};
pub use error::BrowserError;
pub use pool::BrowserPool;
pub use session::BrowserSession;
