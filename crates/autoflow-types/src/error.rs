use thiserror::Error;

/// Failure reported by an automation or execution store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("query error: {0}")]
    Query(String),

    /// Update of a row that does not exist.
    #[error("entity not found")]
    NotFound,

    /// Insert of an id that already exists.
    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn conflict_display() {
        let err = RepositoryError::Conflict("execution already terminal".to_string());
        assert_eq!(err.to_string(), "conflict: execution already terminal");
    }
}
