//! `destination` steps: where results end up.

use std::sync::Arc;

use autoflow_types::automation::Step;
use serde_json::{Value, json};

use super::connector::{ConnectorRequest, ConnectorSet};
use super::executor::{StepError, StepExecutor, StepOutput, ValidationResult, check_str, opt_str, require_str};
use super::files::{FileFormat, FileStore};
use super::source::resource_of;
use crate::workflow::context::WorkflowContext;

pub struct DestinationExecutor {
    files: Arc<FileStore>,
    connectors: Arc<ConnectorSet>,
}

impl DestinationExecutor {
    pub fn new(files: Arc<FileStore>, connectors: Arc<ConnectorSet>) -> Self {
        Self { files, connectors }
    }
}

impl StepExecutor for DestinationExecutor {
    fn step_type(&self) -> &'static str {
        "destination"
    }

    fn validate(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        match opt_str(config, "destinationType") {
            None => errors.push("'destinationType' is required".to_string()),
            Some("file") => {
                check_str(config, "path", &mut errors);
                if let Err(e) = FileFormat::detect("", opt_str(config, "format")) {
                    errors.push(e.to_string());
                }
            }
            Some(connector) => {
                if !self.connectors.contains(connector) {
                    errors.push(format!("unsupported destination type '{connector}': no connector registered"));
                }
                if connector != "email" && resource_of(config).is_none() {
                    errors.push("'resource' is required".to_string());
                }
            }
        }
        ValidationResult::from_errors(errors)
    }

    async fn execute(&self, step: &Step, ctx: &mut WorkflowContext, input: Value) -> Result<StepOutput, StepError> {
        let config = ctx.resolve_value(&step.config);
        let destination_type = require_str(&config, "destinationType")?;

        if destination_type == "file" {
            let path = require_str(&config, "path")?;
            let format = FileFormat::detect(path, opt_str(&config, "format"))?;
            let bytes = self.files.write_value(path, &input, format).await?;
            ctx.info(Some(&step.id), format!("wrote {bytes} bytes to {path}"));
            return Ok(StepOutput::new(json!({"path": path, "bytes": bytes})).with_meta("destinationType", "file"));
        }

        let connector = self.connectors.get(destination_type).ok_or_else(|| {
            StepError::InvalidConfig(format!("unsupported destination type '{destination_type}'"))
        })?;
        let resource = resource_of(&config).unwrap_or(destination_type).to_string();
        tracing::debug!(step_id = %step.id, connector = destination_type, %resource, "writing to connector");
        let request = ConnectorRequest::new(resource.clone(), config.clone());
        let response = connector
            .write(&request, &input)
            .await
            .map_err(|e| StepError::connector(destination_type, e))?;
        ctx.info(Some(&step.id), format!("delivered to {resource} via {destination_type}"));
        Ok(StepOutput::new(response)
            .with_meta("destinationType", destination_type)
            .with_meta("resource", resource))
    }
}
