//! Error classification taxonomy.
//!
//! Category and severity drive three independent decisions: whether a failure
//! is retried, whether it is persisted to the audit log, and whether it raises
//! an alert.

use serde::{Deserialize, Serialize};

/// Broad origin of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    System,
    User,
    Automation,
    Integration,
    Performance,
    Security,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::System => "system",
            ErrorCategory::User => "user",
            ErrorCategory::Automation => "automation",
            ErrorCategory::Integration => "integration",
            ErrorCategory::Performance => "performance",
            ErrorCategory::Security => "security",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }

    /// High and critical failures go to the durable audit log.
    pub fn is_audited(&self) -> bool {
        *self >= ErrorSeverity::High
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running an error message through the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalysis {
    /// Name of the matched pattern (`unknown` when nothing matched).
    pub error_type: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ErrorAnalysis {
    /// Fallback for messages no pattern recognizes.
    pub fn unknown() -> Self {
        Self {
            error_type: "unknown".to_string(),
            category: ErrorCategory::System,
            severity: ErrorSeverity::Medium,
            retryable: false,
            suggestions: vec!["Check the execution logs for details".to_string()],
        }
    }
}
