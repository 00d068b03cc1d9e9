use thiserror::Error;
use uuid::Uuid;

/// Errors from browser sessions and the pool.
///
/// Messages are worded so the error classifier maps them onto the right
/// category: crashes and closed sessions are retryable automation errors,
/// timeouts are performance errors.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("browser session limit reached for owner '{owner_id}' ({limit} sessions)")]
    SessionLimit { owner_id: String, limit: usize },

    #[error("browser disconnected: session {0} is closed or unknown")]
    SessionClosed(Uuid),

    #[error("browser operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("browser process crashed: {0}")]
    Crashed(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("selector '{0}' not found")]
    ElementNotFound(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassifier;
    use autoflow_types::classification::ErrorCategory;

    #[test]
    fn crash_and_closed_session_classify_as_retryable_automation() {
        let classifier = ErrorClassifier::new();
        for err in [
            BrowserError::Crashed("exit status 139".into()),
            BrowserError::SessionClosed(Uuid::nil()),
        ] {
            let a = classifier.analyze(&err.to_string());
            assert_eq!(a.category, ErrorCategory::Automation, "{err}");
            assert!(a.retryable, "{err}");
        }
    }

    #[test]
    fn timeout_classifies_as_performance() {
        let err = BrowserError::Timeout {
            operation: "click".into(),
            timeout_ms: 5000,
        };
        let a = ErrorClassifier::new().analyze(&err.to_string());
        assert_eq!(a.category, ErrorCategory::Performance);
        assert!(a.retryable);
    }

    #[test]
    fn limit_is_retryable() {
        let err = BrowserError::SessionLimit {
            owner_id: "u1".into(),
            limit: 10,
        };
        assert!(ErrorClassifier::new().analyze(&err.to_string()).retryable);
    }
}
