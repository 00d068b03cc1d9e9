//! Observability setup for Autoflow: tracing subscriber, optional
//! OpenTelemetry export, and shared span attribute names.

pub mod attrs;
pub mod tracing_setup;
