//! Ordered pattern table for error classification.

use autoflow_types::classification::{ErrorAnalysis, ErrorCategory, ErrorSeverity};
use regex::{Regex, RegexBuilder};

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    pub name: String,
    pub regex: Regex,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub suggestions: Vec<String>,
}

impl ErrorPattern {
    /// Build a pattern; matching is case-insensitive.
    pub fn new(
        name: &str,
        pattern: &str,
        category: ErrorCategory,
        severity: ErrorSeverity,
        retryable: bool,
        suggestions: &[&str],
    ) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            name: name.to_string(),
            regex,
            category,
            severity,
            retryable,
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn to_analysis(&self) -> ErrorAnalysis {
        ErrorAnalysis {
            error_type: self.name.clone(),
            category: self.category,
            severity: self.severity,
            retryable: self.retryable,
            suggestions: self.suggestions.clone(),
        }
    }
}

/// Maps error messages to an [`ErrorAnalysis`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<ErrorPattern>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Classifier with the built-in table.
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    /// Classifier with a caller-supplied table, evaluated in order.
    pub fn with_patterns(patterns: Vec<ErrorPattern>) -> Self {
        Self { patterns }
    }

    /// Prepend a pattern so it wins over the built-in rows.
    pub fn push_front(&mut self, pattern: ErrorPattern) {
        self.patterns.insert(0, pattern);
    }

    pub fn patterns(&self) -> &[ErrorPattern] {
        &self.patterns
    }

    /// First matching pattern wins. Unmatched messages are
    /// `{system, medium, non-retryable}`.
    pub fn analyze(&self, message: &str) -> ErrorAnalysis {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(message))
            .map(ErrorPattern::to_analysis)
            .unwrap_or_else(ErrorAnalysis::unknown)
    }
}

type Row = (
    &'static str,
    &'static str,
    ErrorCategory,
    ErrorSeverity,
    bool,
    &'static [&'static str],
);

// Order matters: specific rows sit above the generic ones they overlap with
// ("selector not found" before "not found", sandbox before permission).
const DEFAULT_ROWS: &[Row] = &[
    (
        "sandbox_violation",
        r"sandbox|path traversal|escapes? (the )?(file )?store|injection|xss|csrf",
        ErrorCategory::Security,
        ErrorSeverity::Critical,
        false,
        &[
            "Review the step configuration for paths or scripts reaching outside the sandbox",
            "Notify an administrator",
        ],
    ),
    (
        "authentication",
        r"unauthori[sz]ed|authentication failed|invalid credentials|invalid token|\b401\b|\b403\b|forbidden|access denied|permission denied",
        ErrorCategory::Security,
        ErrorSeverity::High,
        false,
        &[
            "Check the credentials configured for the connector",
            "Re-authorize the connection and run again",
        ],
    ),
    (
        "validation",
        r"validation failed|invalid config|invalid input|missing required|is required|unknown step type|unsupported .*type|must be",
        ErrorCategory::User,
        ErrorSeverity::Low,
        false,
        &["Fix the step configuration and save the automation again"],
    ),
    (
        "session_limit",
        r"session limit|too many sessions",
        ErrorCategory::Automation,
        ErrorSeverity::Medium,
        true,
        &["Wait for running executions to finish or raise the per-user session limit"],
    ),
    (
        "browser_crash",
        r"browser (process )?(crashed|exited|disconnected)|page crashed|target closed|driver (process )?(exited|crashed)",
        ErrorCategory::Automation,
        ErrorSeverity::High,
        true,
        &["The browser session will be recreated on retry", "Check host memory if this repeats"],
    ),
    (
        "selector",
        r"selector.*not found|element not found|no such element|no element matches|not visible|not clickable",
        ErrorCategory::Automation,
        ErrorSeverity::Medium,
        true,
        &[
            "Verify the selector against the current page",
            "Add fallback selectors or a wait step before the interaction",
        ],
    ),
    (
        "circuit_open",
        r"circuit breaker (is )?open",
        ErrorCategory::Integration,
        ErrorSeverity::High,
        true,
        &["The remote service failed repeatedly; calls resume after the recovery timeout"],
    ),
    (
        "rate_limit",
        r"rate.?limit|too many requests|\b429\b|throttl",
        ErrorCategory::Integration,
        ErrorSeverity::Medium,
        true,
        &["Reduce how often this automation runs", "Retry after the rate limit window"],
    ),
    (
        "timeout",
        r"timed? ?out|timeout|deadline exceeded",
        ErrorCategory::Performance,
        ErrorSeverity::Medium,
        true,
        &["Increase the step timeout", "Check whether the target is slow or unreachable"],
    ),
    (
        "network",
        r"econnrefused|econnreset|connection (refused|reset|closed|aborted)|network|dns|enotfound|socket hang up|broken pipe|error sending request",
        ErrorCategory::Integration,
        ErrorSeverity::Medium,
        true,
        &["Check network connectivity to the remote service"],
    ),
    (
        "server_error",
        r"\b50[0234]\b|service unavailable|bad gateway|internal server error|gateway timeout",
        ErrorCategory::Integration,
        ErrorSeverity::High,
        true,
        &["The remote service is failing; retry later or contact its operator"],
    ),
    (
        "resource_exhausted",
        r"out of memory|memory limit|\boom\b|no space left|disk full|quota exceeded",
        ErrorCategory::Performance,
        ErrorSeverity::Critical,
        false,
        &["Free resources on the host", "Reduce the amount of data processed per run"],
    ),
    (
        "database",
        r"database|sqlite|constraint failed|deadlock|database is locked",
        ErrorCategory::System,
        ErrorSeverity::High,
        true,
        &["Check the storage backend health"],
    ),
    (
        "not_found",
        r"not found|\b404\b|enoent|no such file",
        ErrorCategory::User,
        ErrorSeverity::Medium,
        false,
        &["Check that the referenced file, record or URL exists"],
    ),
    (
        "script",
        r"expression|script error|parse error|syntax error",
        ErrorCategory::User,
        ErrorSeverity::Medium,
        false,
        &["Fix the custom script and run again"],
    ),
];

fn default_patterns() -> Vec<ErrorPattern> {
    DEFAULT_ROWS
        .iter()
        .filter_map(|(name, pattern, category, severity, retryable, suggestions)| {
            match ErrorPattern::new(name, pattern, *category, *severity, *retryable, suggestions) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::error!(pattern = %name, error = %e, "invalid built-in error pattern");
                    None
                }
            }
        })
        .collect()
}
