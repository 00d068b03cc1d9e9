//! Browser backend port.
//!
//! A [`BrowserDriver`] launches isolated browser instances; each
//! [`BrowserInstance`] drives one page. Both traits use RPITIT, and the pool
//! holds them through the object-safe `BoxBrowserDriver` / `BoxBrowserInstance`
//! wrappers:
//! 1. `*Dyn` traits with boxed futures
//! 2. blanket impls for every implementor of the RPITIT trait
//! 3. `Box*` structs delegating to the `dyn` object

use std::future::Future;
use std::pin::Pin;

use autoflow_types::config::BrowserSettings;
use serde::{Deserialize, Serialize};

use super::error::BrowserError;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrowserError>> + Send + 'a>>;

/// How a browser instance is configured at launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Hard limit for a single navigation.
    pub navigation_timeout_ms: u64,
    /// URL substrings whose requests are aborted.
    pub blocked_url_patterns: Vec<String>,
    /// Browser subsystems switched off (extensions, GPU, sync, audio...).
    pub disabled_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl LaunchOptions {
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self {
            headless: true,
            viewport_width: settings.viewport_width,
            viewport_height: settings.viewport_height,
            navigation_timeout_ms: settings.navigation_timeout_ms,
            blocked_url_patterns: settings.blocked_url_patterns.clone(),
            disabled_features: [
                "extensions",
                "gpu",
                "background-networking",
                "sync",
                "translate",
                "default-apps",
                "audio",
                "notifications",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            user_agent: None,
        }
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_settings(&BrowserSettings::default())
    }
}

/// Page state after a navigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// What to pull out of the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub selector: String,
    /// Attribute to read; `None` reads the text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Return every match instead of the first.
    #[serde(default)]
    pub all: bool,
}

// ---------------------------------------------------------------------------
// RPITIT traits
// ---------------------------------------------------------------------------

pub trait BrowserDriver: Send + Sync {
    type Instance: BrowserInstance + 'static;

    fn launch(
        &self,
        options: &LaunchOptions,
    ) -> impl Future<Output = Result<Self::Instance, BrowserError>> + Send;
}

/// One isolated browser with a single page.
///
/// Operations do not enforce timeouts themselves; the pool's session wrapper
/// bounds every call.
pub trait BrowserInstance: Send + Sync {
    fn navigate(&self, url: &str) -> impl Future<Output = Result<PageInfo, BrowserError>> + Send;

    fn click(&self, selector: &str) -> impl Future<Output = Result<(), BrowserError>> + Send;

    fn type_text(
        &self,
        selector: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    fn extract(
        &self,
        request: &ExtractRequest,
    ) -> impl Future<Output = Result<serde_json::Value, BrowserError>> + Send;

    /// Resolve once `selector` is present.
    fn wait_for(&self, selector: &str) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// PNG screenshot, base64 encoded.
    fn screenshot(&self, full_page: bool) -> impl Future<Output = Result<String, BrowserError>> + Send;

    fn execute_script(
        &self,
        script: &str,
        args: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, BrowserError>> + Send;

    /// JS heap usage in bytes.
    fn memory_usage(&self) -> impl Future<Output = Result<u64, BrowserError>> + Send;

    /// Whether the underlying process is still running.
    fn is_alive(&self) -> bool;

    fn close(&self) -> impl Future<Output = Result<(), BrowserError>> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe wrappers
// ---------------------------------------------------------------------------

pub trait BrowserDriverDyn: Send + Sync {
    fn launch_boxed<'a>(&'a self, options: &'a LaunchOptions) -> BoxFut<'a, BoxBrowserInstance>;
}

impl<T: BrowserDriver> BrowserDriverDyn for T {
    fn launch_boxed<'a>(&'a self, options: &'a LaunchOptions) -> BoxFut<'a, BoxBrowserInstance> {
        Box::pin(async move { self.launch(options).await.map(BoxBrowserInstance::new) })
    }
}

pub struct BoxBrowserDriver {
    inner: Box<dyn BrowserDriverDyn>,
}

impl BoxBrowserDriver {
    pub fn new<T: BrowserDriver + 'static>(driver: T) -> Self {
        Self {
            inner: Box::new(driver),
        }
    }

    pub async fn launch(&self, options: &LaunchOptions) -> Result<BoxBrowserInstance, BrowserError> {
        self.inner.launch_boxed(options).await
    }
}

impl std::fmt::Debug for BoxBrowserDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBrowserDriver").finish_non_exhaustive()
    }
}

pub trait BrowserInstanceDyn: Send + Sync {
    fn navigate_boxed<'a>(&'a self, url: &'a str) -> BoxFut<'a, PageInfo>;
    fn click_boxed<'a>(&'a self, selector: &'a str) -> BoxFut<'a, ()>;
    fn type_text_boxed<'a>(&'a self, selector: &'a str, text: &'a str) -> BoxFut<'a, ()>;
    fn extract_boxed<'a>(&'a self, request: &'a ExtractRequest) -> BoxFut<'a, serde_json::Value>;
    fn wait_for_boxed<'a>(&'a self, selector: &'a str) -> BoxFut<'a, ()>;
    fn screenshot_boxed(&self, full_page: bool) -> BoxFut<'_, String>;
    fn execute_script_boxed<'a>(
        &'a self,
        script: &'a str,
        args: &'a serde_json::Value,
    ) -> BoxFut<'a, serde_json::Value>;
    fn memory_usage_boxed(&self) -> BoxFut<'_, u64>;
    fn is_alive(&self) -> bool;
    fn close_boxed(&self) -> BoxFut<'_, ()>;
}

impl<T: BrowserInstance> BrowserInstanceDyn for T {
    fn navigate_boxed<'a>(&'a self, url: &'a str) -> BoxFut<'a, PageInfo> {
        Box::pin(self.navigate(url))
    }

    fn click_boxed<'a>(&'a self, selector: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.click(selector))
    }

    fn type_text_boxed<'a>(&'a self, selector: &'a str, text: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.type_text(selector, text))
    }

    fn extract_boxed<'a>(&'a self, request: &'a ExtractRequest) -> BoxFut<'a, serde_json::Value> {
        Box::pin(self.extract(request))
    }

    fn wait_for_boxed<'a>(&'a self, selector: &'a str) -> BoxFut<'a, ()> {
        Box::pin(self.wait_for(selector))
    }

    fn screenshot_boxed(&self, full_page: bool) -> BoxFut<'_, String> {
        Box::pin(self.screenshot(full_page))
    }

    fn execute_script_boxed<'a>(
        &'a self,
        script: &'a str,
        args: &'a serde_json::Value,
    ) -> BoxFut<'a, serde_json::Value> {
        Box::pin(self.execute_script(script, args))
    }

    fn memory_usage_boxed(&self) -> BoxFut<'_, u64> {
        Box::pin(self.memory_usage())
    }

    fn is_alive(&self) -> bool {
        BrowserInstance::is_alive(self)
    }

    fn close_boxed(&self) -> BoxFut<'_, ()> {
        Box::pin(self.close())
    }
}

/// Type-erased browser instance.
pub struct BoxBrowserInstance {
    inner: Box<dyn BrowserInstanceDyn>,
}

impl BoxBrowserInstance {
    pub fn new<T: BrowserInstance + 'static>(instance: T) -> Self {
        Self {
            inner: Box::new(instance),
        }
    }

    pub async fn navigate(&self, url: &str) -> Result<PageInfo, BrowserError> {
        self.inner.navigate_boxed(url).await
    }

    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.inner.click_boxed(selector).await
    }

    pub async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.inner.type_text_boxed(selector, text).await
    }

    pub async fn extract(&self, request: &ExtractRequest) -> Result<serde_json::Value, BrowserError> {
        self.inner.extract_boxed(request).await
    }

    pub async fn wait_for(&self, selector: &str) -> Result<(), BrowserError> {
        self.inner.wait_for_boxed(selector).await
    }

    pub async fn screenshot(&self, full_page: bool) -> Result<String, BrowserError> {
        self.inner.screenshot_boxed(full_page).await
    }

    pub async fn execute_script(
        &self,
        script: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError> {
        self.inner.execute_script_boxed(script, args).await
    }

    pub async fn memory_usage(&self) -> Result<u64, BrowserError> {
        self.inner.memory_usage_boxed().await
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    pub async fn close(&self) -> Result<(), BrowserError> {
        self.inner.close_boxed().await
    }
}

impl std::fmt::Debug for BoxBrowserInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBrowserInstance")
            .field("alive", &self.is_alive())
            .finish()
    }
}
