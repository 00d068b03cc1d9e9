//! Browser backends.

pub mod process;

pub use process::{ProcessBrowserDriver, ProcessBrowserInstance};
