//! Event bus for live execution progress.
//!
//! Distributes `AutomationEvent` messages to all subscribers via a
//! `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
