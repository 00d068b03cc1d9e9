//! Webhook server: router, handlers and error mapping.

pub mod error;
pub mod response;
pub mod router;
pub mod webhook;
