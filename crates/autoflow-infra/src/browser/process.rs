//! Browser driver backed by an external process.
//!
//! The driver executable (a small headless-browser host) speaks
//! line-delimited JSON over stdio. Every request carries an `id` and an `op`;
//! the process answers each with one line:
//!
//! ```text
//! -> {"id":3,"op":"click","selector":"#submit"}
//! <- {"id":3,"ok":true,"result":null}
//! <- {"id":4,"ok":false,"error":{"kind":"not_found","message":"..."}}
//! ```
//!
//! Responses may arrive out of order. When stdout closes the instance is
//! marked dead and every pending request fails with a crash error.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autoflow_core::browser::{BrowserDriver, BrowserError, BrowserInstance, ExtractRequest, LaunchOptions, PageInfo};
use autoflow_types::config::BrowserSettings;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<PendingMap>>;

#[derive(Debug, Deserialize)]
struct DriverResponse {
    id: u64,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<DriverFailure>,
}

#[derive(Debug, Clone, Deserialize)]
struct DriverFailure {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default, rename = "timeoutMs")]
    timeout_ms: Option<u64>,
}

impl DriverFailure {
    fn exited() -> Self {
        Self {
            kind: "crashed".to_string(),
            message: "driver process exited".to_string(),
            timeout_ms: None,
        }
    }

    fn into_error(self, op: &str, params: &Value) -> BrowserError {
        match self.kind.as_str() {
            "not_found" => BrowserError::ElementNotFound(
                params
                    .get("selector")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(self.message),
            ),
            "timeout" => BrowserError::Timeout {
                operation: op.to_string(),
                timeout_ms: self.timeout_ms.unwrap_or(0),
            },
            "navigation" => BrowserError::Navigation(self.message),
            "script" => BrowserError::Script(self.message),
            "crashed" => BrowserError::Crashed(self.message),
            _ => BrowserError::Protocol(format!("{op}: {}", self.message)),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Launches one driver process per browser instance.
#[derive(Debug, Clone)]
pub struct ProcessBrowserDriver {
    command: String,
    args: Vec<String>,
    launch_timeout: Duration,
}

impl ProcessBrowserDriver {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            launch_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &BrowserSettings) -> Self {
        Self::new(settings.driver_command.clone(), settings.driver_args.clone())
            .with_launch_timeout(Duration::from_millis(settings.launch_timeout_ms))
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }
}

impl BrowserDriver for ProcessBrowserDriver {
    type Instance = ProcessBrowserInstance;

    async fn launch(&self, options: &LaunchOptions) -> Result<ProcessBrowserInstance, BrowserError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", self.command)))?;

        let instance = ProcessBrowserInstance::attach(&mut child)?;
        *instance.child.lock().await = Some(child);

        let options = serde_json::to_value(options)
            .map_err(|e| BrowserError::Launch(format!("invalid launch options: {e}")))?;
        let handshake = instance.call("launch", json!({ "options": options }));
        match tokio::time::timeout(self.launch_timeout, handshake).await {
            Ok(Ok(_)) => {
                tracing::debug!(command = %self.command, "browser driver launched");
                Ok(instance)
            }
            Ok(Err(e)) => {
                instance.kill().await;
                Err(BrowserError::Launch(e.to_string()))
            }
            Err(_) => {
                instance.kill().await;
                Err(BrowserError::Launch(format!(
                    "driver did not answer within {}ms",
                    self.launch_timeout.as_millis()
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

pub struct ProcessBrowserInstance {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl ProcessBrowserInstance {
    fn attach(child: &mut Child) -> Result<Self, BrowserError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrowserError::Launch("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrowserError::Launch("driver stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "autoflow::browser::driver", "{line}");
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_responses(stdout, pending.clone(), alive.clone()));

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(None),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader,
        })
    }

    async fn call(&self, op: &str, params: Value) -> Result<Value, BrowserError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrowserError::Crashed(DriverFailure::exited().message));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = match params.clone() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        request.insert("id".to_string(), json!(id));
        request.insert("op".to_string(), json!(op));

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        // The reader may have drained `pending` between the check above and
        // the insert.
        if !self.alive.load(Ordering::SeqCst) {
            lock(&self.pending).remove(&id);
            return Err(BrowserError::Crashed(DriverFailure::exited().message));
        }

        let mut line = Value::Object(request).to_string();
        line.push('\n');
        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            lock(&self.pending).remove(&id);
            return Err(BrowserError::Crashed(format!("driver stdin closed: {e}")));
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failure)) => Err(failure.into_error(op, &params)),
            Err(_) => Err(BrowserError::Crashed(DriverFailure::exited().message)),
        }
    }

    async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "driver process already gone");
            }
        }
        self.reader.abort();
        fail_pending(&self.pending);
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, DriverFailure>>>;

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn fail_pending(pending: &Pending) {
    for (_, tx) in lock(pending).drain() {
        let _ = tx.send(Err(DriverFailure::exited()));
    }
}

async fn read_responses(stdout: tokio::process::ChildStdout, pending: Pending, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response: DriverResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "unparsable line from browser driver");
                        continue;
                    }
                };
                let Some(tx) = lock(&pending).remove(&response.id) else {
                    tracing::debug!(id = response.id, "response for unknown request");
                    continue;
                };
                let outcome = if response.ok {
                    Ok(response.result)
                } else {
                    Err(response.error.unwrap_or(DriverFailure {
                        kind: String::new(),
                        message: "request failed without detail".to_string(),
                        timeout_ms: None,
                    }))
                };
                let _ = tx.send(outcome);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "browser driver stdout failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    fail_pending(&pending);
    tracing::debug!("browser driver stdout closed");
}

impl BrowserInstance for ProcessBrowserInstance {
    async fn navigate(&self, url: &str) -> Result<PageInfo, BrowserError> {
        let result = self.call("navigate", json!({ "url": url })).await?;
        serde_json::from_value(result).map_err(|e| BrowserError::Protocol(format!("navigate: {e}")))
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        self.call("click", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.call("type", json!({ "selector": selector, "text": text }))
            .await
            .map(|_| ())
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<Value, BrowserError> {
        let params = serde_json::to_value(request).map_err(|e| BrowserError::Protocol(e.to_string()))?;
        self.call("extract", params).await
    }

    async fn wait_for(&self, selector: &str) -> Result<(), BrowserError> {
        self.call("waitFor", json!({ "selector": selector })).await.map(|_| ())
    }

    async fn screenshot(&self, full_page: bool) -> Result<String, BrowserError> {
        let result = self.call("screenshot", json!({ "fullPage": full_page })).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol("screenshot: expected base64 string".to_string()))
    }

    async fn execute_script(&self, script: &str, args: &Value) -> Result<Value, BrowserError> {
        self.call("evaluate", json!({ "script": script, "args": args })).await
    }

    async fn memory_usage(&self) -> Result<u64, BrowserError> {
        let result = self.call("metrics", json!({})).await?;
        result
            .get("jsHeapUsedSize")
            .and_then(Value::as_u64)
            .ok_or_else(|| BrowserError::Protocol("metrics: missing jsHeapUsedSize".to_string()))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.is_alive() {
            if let Err(e) = tokio::time::timeout(CLOSE_GRACE, self.call("close", json!({}))).await {
                tracing::debug!(error = %e, "driver ignored close request");
            }
        }
        self.kill().await;
        Ok(())
    }
}

impl Drop for ProcessBrowserInstance {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
