//! Step executors.
//!
//! A step's `type` tag selects a [`StepExecutor`] from the frozen
//! [`StepRegistry`]. The five built-in executors live in their own modules;
//! [`connector`] is the port external connector modules plug into, and
//! [`files`] and [`script`] are the sandboxed file store and expression
//! engine the executors share.

pub mod action;
pub mod connector;
pub mod destination;
pub mod executor;
pub mod files;
pub mod filter;
pub mod interface;
pub mod records;
pub mod registry;
pub mod script;
pub mod source;

pub use connector::{BoxConnector, Connector, ConnectorError, ConnectorRequest, ConnectorSet, GuardedConnector};
pub use executor::{BoxStepExecutor, StepError, StepExecutor, StepOutput, ValidationResult};
pub use files::{FileFormat, FileStore};
pub use registry::{BuiltinSteps, StepRegistry, StepRegistryBuilder};
pub use script::ScriptEngine;
