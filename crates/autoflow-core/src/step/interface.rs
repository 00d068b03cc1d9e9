//! `interface` steps: drive a headless browser through the session pool.
//!
//! The first interface step of an attempt opens a session for the
//! automation's owner and stores its id in the context; later steps reuse
//! it. The engine closes the session when the attempt ends.

use std::sync::Arc;
use std::time::Duration;

use autoflow_types::automation::Step;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use super::executor::{StepError, StepExecutor, StepOutput, ValidationResult, check_str, opt_str, require_str, timeout_ms};
use super::records::string_list;
use crate::browser::{BrowserError, BrowserPool, BrowserSession, ExtractRequest};
use crate::resilience::FallbackChain;
use crate::workflow::context::WorkflowContext;

pub const OPERATIONS: [&str; 7] = [
    "navigate",
    "click",
    "type",
    "extract",
    "wait",
    "screenshot",
    "execute_script",
];

pub struct InterfaceExecutor {
    pool: Arc<BrowserPool>,
}

impl InterfaceExecutor {
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self { pool }
    }

    /// The execution's session, opened on first use.
    async fn session(&self, ctx: &mut WorkflowContext) -> Result<Arc<BrowserSession>, StepError> {
        if let Some(id) = ctx.browser_session {
            match self.pool.get(id) {
                Ok(session) => return Ok(session),
                Err(_) => {
                    tracing::warn!(session_id = %id, "execution's browser session is gone, opening a new one");
                    ctx.browser_session = None;
                }
            }
        }
        let id = self.pool.create_session(&ctx.owner_id, None).await?;
        ctx.browser_session = Some(id);
        ctx.info(None, format!("browser session {id} opened"));
        Ok(self.pool.get(id)?)
    }
}

/// `selector` may be a single selector or an ordered fallback list;
/// `selectors` is accepted as an alias.
fn selectors(config: &Value) -> Vec<String> {
    let mut list = string_list(config, "selector");
    list.extend(string_list(config, "selectors"));
    list
}

fn selector_chain<'a, T, F>(selectors: &'a [String], op: F) -> FallbackChain<'a, T, BrowserError>
where
    F: Fn(&'a str) -> BoxFuture<'a, Result<T, BrowserError>> + Clone + Send + 'a,
{
    selectors.iter().fold(FallbackChain::new(), |chain, selector| {
        let op = op.clone();
        chain.push(selector.clone(), move || op(selector))
    })
}

/// Run `chain`, logging every selector that missed. Returns the value and
/// the selector that worked.
async fn run_chain<T>(
    chain: FallbackChain<'_, T, BrowserError>,
    step_id: &str,
    ctx: &mut WorkflowContext,
) -> Result<(T, String), StepError> {
    match chain.run().await {
        Ok(outcome) => {
            if outcome.index > 0 {
                ctx.warn(
                    Some(step_id),
                    format!("fallback selector '{}' used", outcome.strategy),
                );
            }
            Ok((outcome.value, outcome.strategy))
        }
        Err(err) => {
            for (selector, e) in &err.failures {
                ctx.warn(Some(step_id), format!("selector '{selector}' failed: {e}"));
            }
            match err.failures.into_iter().last() {
                Some((_, e)) => Err(StepError::Browser(e)),
                None => Err(StepError::InvalidConfig("'selector' is required".into())),
            }
        }
    }
}

impl StepExecutor for InterfaceExecutor {
    fn step_type(&self) -> &'static str {
        "interface"
    }

    fn validate(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        let needs_selector = |errors: &mut Vec<String>| {
            if selectors(config).is_empty() {
                errors.push("'selector' is required".to_string());
            }
        };
        match opt_str(config, "operation") {
            None => errors.push("'operation' is required".to_string()),
            Some("navigate") => check_str(config, "url", &mut errors),
            Some("click" | "extract") => needs_selector(&mut errors),
            Some("type") => {
                needs_selector(&mut errors);
                if config.get("text").is_none() {
                    errors.push("'text' is required".to_string());
                }
            }
            Some("wait") => {
                if selectors(config).is_empty() && config.get("duration").and_then(Value::as_u64).is_none() {
                    errors.push("wait needs 'selector' or 'duration' (ms)".to_string());
                }
            }
            Some("screenshot") => {}
            Some("execute_script") => check_str(config, "script", &mut errors),
            Some(other) => errors.push(format!("unsupported operation type '{other}'")),
        }
        ValidationResult::from_errors(errors)
    }

    async fn execute(&self, step: &Step, ctx: &mut WorkflowContext, _input: Value) -> Result<StepOutput, StepError> {
        let config = ctx.resolve_value(&step.config);
        let operation = require_str(&config, "operation")?;
        if !OPERATIONS.contains(&operation) {
            return Err(StepError::InvalidConfig(format!("unsupported operation type '{operation}'")));
        }
        let timeout = timeout_ms(&config);
        let session = self.session(ctx).await?;
        tracing::debug!(step_id = %step.id, session_id = %session.id, operation, "browser operation");

        let data = match operation {
            "navigate" => {
                let url = require_str(&config, "url")?;
                let page = session.navigate(url, timeout).await?;
                ctx.info(Some(&step.id), format!("navigated to {}", page.url));
                json!({"url": page.url, "title": page.title, "status": page.status})
            }
            "click" => {
                let list = selectors(&config);
                let chain = selector_chain(&list, |sel| Box::pin(session.click(sel, timeout)));
                let ((), used) = run_chain(chain, &step.id, ctx).await?;
                json!({"clicked": used})
            }
            "type" => {
                let text = config
                    .get("text")
                    .map(crate::workflow::context::value_to_string)
                    .ok_or_else(|| StepError::InvalidConfig("'text' is required".into()))?;
                let list = selectors(&config);
                let chain = selector_chain(&list, |sel| Box::pin(session.type_text(sel, &text, timeout)));
                let ((), used) = run_chain(chain, &step.id, ctx).await?;
                json!({"typed": used})
            }
            "extract" => {
                let attribute = opt_str(&config, "attribute");
                let all = config.get("all").and_then(Value::as_bool).unwrap_or(false);
                let list = selectors(&config);
                let session = &session;
                let chain = selector_chain(&list, |sel| {
                    Box::pin(async move {
                        let request = ExtractRequest {
                            selector: sel.to_string(),
                            attribute: attribute.map(str::to_string),
                            all,
                        };
                        session.extract(&request, timeout).await
                    })
                });
                let (value, _) = run_chain(chain, &step.id, ctx).await?;
                value
            }
            "wait" => {
                let list = selectors(&config);
                if list.is_empty() {
                    let ms = config.get("duration").and_then(Value::as_u64).unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    json!({"waitedMs": ms})
                } else {
                    let chain = selector_chain(&list, |sel| Box::pin(session.wait_for(sel, timeout)));
                    let ((), used) = run_chain(chain, &step.id, ctx).await?;
                    json!({"found": used})
                }
            }
            "screenshot" => {
                let full_page = config.get("fullPage").and_then(Value::as_bool).unwrap_or(false);
                let image = session.screenshot(full_page, timeout).await?;
                json!({"image": image, "encoding": "base64", "fullPage": full_page})
            }
            "execute_script" => {
                let script = require_str(&config, "script")?;
                let args = config.get("args").cloned().unwrap_or(Value::Null);
                session.execute_script(script, &args, timeout).await?
            }
            other => {
                return Err(StepError::InvalidConfig(format!("unsupported operation type '{other}'")));
            }
        };

        Ok(StepOutput::new(data)
            .with_meta("operation", operation)
            .with_meta("sessionId", session.id.to_string()))
    }
}
