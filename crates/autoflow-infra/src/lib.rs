//! Infrastructure layer for Autoflow.
//!
//! Implements the ports defined in `autoflow-core`: SQLite repositories and
//! audit log, the process-backed browser driver and the HTTP connector. Also
//! resolves the data directory and loads `config.toml`.

pub mod browser;
pub mod config;
pub mod connector;
pub mod sqlite;
