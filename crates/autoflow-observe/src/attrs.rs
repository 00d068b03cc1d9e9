//! Span names used by the `autoflow` binary.
//!
//! Keeping them in one place lets the OTel exporter and log queries agree on
//! what each entry point is called.

/// An inbound `POST /webhooks/{token}` request.
pub const SPAN_WEBHOOK: &str = "handle_webhook";

/// A run started from the command line.
pub const SPAN_MANUAL_RUN: &str = "manual_run";

/// The lifetime of `autoflow serve`.
pub const SPAN_SERVE: &str = "serve";
