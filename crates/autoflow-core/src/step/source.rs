//! `source` steps: where an automation's data comes from.

use std::sync::Arc;

use autoflow_types::automation::Step;
use serde_json::Value;

use super::connector::{ConnectorRequest, ConnectorSet};
use super::executor::{
    StepError, StepExecutor, StepOutput, ValidationResult, check_str, opt_str, require_str,
};
use super::files::{FileFormat, FileStore};
use crate::workflow::context::WorkflowContext;

/// Config keys that may name a connector's resource, in lookup order.
pub(crate) const RESOURCE_KEYS: [&str; 3] = ["resource", "url", "path"];

pub(crate) fn resource_of(config: &Value) -> Option<&str> {
    RESOURCE_KEYS
        .iter()
        .find_map(|key| opt_str(config, key).filter(|s| !s.is_empty()))
}

pub struct SourceExecutor {
    files: Arc<FileStore>,
    connectors: Arc<ConnectorSet>,
}

impl SourceExecutor {
    pub fn new(files: Arc<FileStore>, connectors: Arc<ConnectorSet>) -> Self {
        Self { files, connectors }
    }
}

impl StepExecutor for SourceExecutor {
    fn step_type(&self) -> &'static str {
        "source"
    }

    fn validate(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        match opt_str(config, "sourceType") {
            None => errors.push("'sourceType' is required".to_string()),
            Some("manual") | Some("webhook") => {}
            Some("file") => {
                check_str(config, "path", &mut errors);
                if let Err(e) = FileFormat::detect("", opt_str(config, "format")) {
                    errors.push(e.to_string());
                }
            }
            Some(connector) => {
                if !self.connectors.contains(connector) {
                    errors.push(format!("unsupported source type '{connector}': no connector registered"));
                }
                if resource_of(config).is_none() {
                    errors.push("'resource' is required".to_string());
                }
            }
        }
        ValidationResult::from_errors(errors)
    }

    async fn execute(&self, step: &Step, ctx: &mut WorkflowContext, input: Value) -> Result<StepOutput, StepError> {
        let config = ctx.resolve_value(&step.config);
        let source_type = require_str(&config, "sourceType")?;

        match source_type {
            "manual" => {
                let data = config.get("data").cloned().unwrap_or(Value::Null);
                Ok(StepOutput::new(data).with_meta("sourceType", "manual"))
            }
            "webhook" => {
                let payload = input
                    .get("webhook")
                    .and_then(|w| w.get("payload"))
                    .cloned()
                    .ok_or_else(|| StepError::MissingInput("webhook payload".into()))?;
                Ok(StepOutput::new(payload).with_meta("sourceType", "webhook"))
            }
            "file" => {
                let path = require_str(&config, "path")?;
                let format = FileFormat::detect(path, opt_str(&config, "format"))?;
                let data = self.files.read_value(path, format).await?;
                ctx.info(Some(&step.id), format!("read {path}"));
                Ok(StepOutput::new(data)
                    .with_meta("sourceType", "file")
                    .with_meta("path", path))
            }
            connector_name => {
                let connector = self.connectors.get(connector_name).ok_or_else(|| {
                    StepError::InvalidConfig(format!("unsupported source type '{connector_name}'"))
                })?;
                let resource = resource_of(&config)
                    .ok_or_else(|| StepError::InvalidConfig("'resource' is required".into()))?
                    .to_string();
                tracing::debug!(step_id = %step.id, connector = connector_name, %resource, "reading from connector");
                let request = ConnectorRequest::new(resource.clone(), config.clone());
                let data = connector
                    .read(&request)
                    .await
                    .map_err(|e| StepError::connector(connector_name, e))?;
                ctx.info(Some(&step.id), format!("read {resource} via {connector_name}"));
                Ok(StepOutput::new(data)
                    .with_meta("sourceType", connector_name)
                    .with_meta("resource", resource))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::connector::RecordingConnector;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(Uuid::now_v7(), Uuid::now_v7(), "owner", json!({"folder": "reports"}))
    }

    fn executor(dir: &tempfile::TempDir, conn: Option<Arc<RecordingConnector>>) -> SourceExecutor {
        let mut set = ConnectorSet::new();
        if let Some(conn) = conn {
            set.register("sharepoint", conn);
        }
        SourceExecutor::new(Arc::new(FileStore::new(dir.path())), Arc::new(set))
    }

    #[test]
    fn validation_collects_errors() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, None);
        assert!(exec.validate(&json!({"sourceType": "manual"})).valid);
        assert!(!exec.validate(&json!({})).valid);
        assert_eq!(exec.validate(&json!({"sourceType": "file"})).errors, vec!["'path' is required"]);
        let r = exec.validate(&json!({"sourceType": "smb"}));
        assert_eq!(r.errors.len(), 2);
    }

    #[tokio::test]
    async fn manual_and_webhook_sources() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, None);
        let mut c = ctx();

        let step = Step::new("s", "source", json!({"sourceType": "manual", "data": [1, 2]}));
        let out = exec.execute(&step, &mut c, Value::Null).await.unwrap();
        assert_eq!(out.data, json!([1, 2]));

        let step = Step::new("w", "source", json!({"sourceType": "webhook"}));
        let input = json!({"webhook": {"payload": {"order": 7}, "headers": {}}});
        let out = exec.execute(&step, &mut c, input).await.unwrap();
        assert_eq!(out.data, json!({"order": 7}));

        let err = exec.execute(&step, &mut c, json!({})).await.unwrap_err();
        assert!(matches!(err, StepError::MissingInput(_)));
    }

    #[tokio::test]
    async fn file_source_reads_csv_with_templated_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("reports")).unwrap();
        std::fs::write(dir.path().join("reports/q1.csv"), "id,total\n1,10\n2,20\n").unwrap();
        let exec = executor(&dir, None);
        let mut c = ctx();

        let step = Step::new("f", "source", json!({"sourceType": "file", "path": "{{ input.folder }}/q1.csv"}));
        let out = exec.execute(&step, &mut c, Value::Null).await.unwrap();
        assert_eq!(out.data, json!([{"id": "1", "total": "10"}, {"id": "2", "total": "20"}]));
        assert_eq!(out.metadata["path"], "reports/q1.csv");
    }

    #[tokio::test]
    async fn connector_source_delegates() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Arc::new(RecordingConnector {
            response: json!([{"title": "doc"}]),
            ..Default::default()
        });
        let exec = executor(&dir, Some(Arc::clone(&conn)));
        let mut c = ctx();

        let step = Step::new(
            "sp",
            "source",
            json!({"sourceType": "sharepoint", "resource": "/sites/{{ input.folder }}"}),
        );
        let out = exec.execute(&step, &mut c, Value::Null).await.unwrap();
        assert_eq!(out.data, json!([{"title": "doc"}]));
        assert_eq!(conn.reads.lock().unwrap()[0].resource, "/sites/reports");
    }
}
