//! In-memory browser driver for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::driver::{BrowserDriver, BrowserInstance, ExtractRequest, LaunchOptions, PageInfo};
use super::error::BrowserError;

/// Shared knobs and counters for every instance a `FakeDriver` launches.
#[derive(Debug, Default)]
pub struct FakeState {
    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub memory_bytes: AtomicU64,
    pub fail_launch: AtomicBool,
    /// Delay applied to every launch, to widen race windows.
    pub launch_delay_ms: AtomicU64,
    /// Delay applied to `navigate`.
    pub navigate_delay_ms: AtomicU64,
    /// Selectors that exist on the page, with their text.
    pub elements: Mutex<HashMap<String, String>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub clicked: Mutex<Vec<String>>,
    pub last_options: Mutex<Option<LaunchOptions>>,
    pub instances: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeState {
    pub fn with_elements(pairs: &[(&str, &str)]) -> Arc<Self> {
        let state = Arc::new(Self::default());
        {
            let mut elements = state.elements.lock().unwrap();
            for (selector, text) in pairs {
                elements.insert(selector.to_string(), text.to_string());
            }
        }
        state
    }

    /// Simulate every launched process dying.
    pub fn crash_all(&self) {
        for alive in self.instances.lock().unwrap().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    pub state: Arc<FakeState>,
}

impl FakeDriver {
    pub fn new(state: Arc<FakeState>) -> Self {
        Self { state }
    }
}

pub struct FakeInstance {
    state: Arc<FakeState>,
    alive: Arc<AtomicBool>,
    url: Mutex<String>,
}

impl BrowserDriver for FakeDriver {
    type Instance = FakeInstance;

    async fn launch(&self, options: &LaunchOptions) -> Result<FakeInstance, BrowserError> {
        let delay = self.state.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(BrowserError::Launch("driver binary missing".into()));
        }
        *self.state.last_options.lock().unwrap() = Some(options.clone());
        self.state.launched.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.state.instances.lock().unwrap().push(Arc::clone(&alive));
        Ok(FakeInstance {
            state: Arc::clone(&self.state),
            alive,
            url: Mutex::new("about:blank".into()),
        })
    }
}

impl FakeInstance {
    fn check(&self) -> Result<(), BrowserError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrowserError::Protocol("pipe closed".into()))
        }
    }

    fn element(&self, selector: &str) -> Result<String, BrowserError> {
        self.state
            .elements
            .lock()
            .unwrap()
            .get(selector)
            .cloned()
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
    }
}

impl BrowserInstance for FakeInstance {
    async fn navigate(&self, url: &str) -> Result<PageInfo, BrowserError> {
        self.check()?;
        let delay = self.state.navigate_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        *self.url.lock().unwrap() = url.to_string();
        Ok(PageInfo {
            url: url.to_string(),
            title: "Fake page".into(),
            status: Some(200),
        })
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.check()?;
        self.element(selector)?;
        self.state.clicked.lock().unwrap().push(selector.to_string());
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.check()?;
        self.element(selector)?;
        self.state
            .typed
            .lock()
            .unwrap()
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<serde_json::Value, BrowserError> {
        self.check()?;
        let text = self.element(&request.selector)?;
        Ok(if request.all { json!([text]) } else { json!(text) })
    }

    async fn wait_for(&self, selector: &str) -> Result<(), BrowserError> {
        self.check()?;
        self.element(selector).map(|_| ())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<String, BrowserError> {
        self.check()?;
        Ok("iVBORw0KGgo=".into())
    }

    async fn execute_script(
        &self,
        script: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError> {
        self.check()?;
        Ok(json!({ "script": script, "args": args, "url": self.url.lock().unwrap().clone() }))
    }

    async fn memory_usage(&self) -> Result<u64, BrowserError> {
        self.check()?;
        Ok(self.state.memory_bytes.load(Ordering::SeqCst))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::SeqCst);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
