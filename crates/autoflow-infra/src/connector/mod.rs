//! Connectors for source and destination steps.

pub mod http;

pub use http::{API_CONNECTOR, HttpConnector, register_http_connector};
