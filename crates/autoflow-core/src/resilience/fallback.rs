//! Ordered fallback chain.
//!
//! Strategies are tried in the order they were added. The first success
//! short-circuits; when every strategy fails, all failures are returned
//! together so the caller can report each one.

use futures_util::future::BoxFuture;

type Strategy<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Every strategy failed.
#[derive(Debug, thiserror::Error)]
#[error("all {} fallback strategies failed: {}", failures.len(), summarize(failures))]
pub struct FallbackError<E: std::fmt::Display> {
    /// `(strategy name, error)` in attempt order.
    pub failures: Vec<(String, E)>,
}

fn summarize<E: std::fmt::Display>(failures: &[(String, E)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl<E: std::fmt::Display> FallbackError<E> {
    /// The error of the last strategy tried.
    pub fn last(&self) -> Option<&E> {
        self.failures.last().map(|(_, e)| e)
    }
}

/// The winning strategy and its value.
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub strategy: String,
    /// Zero-based position of the winning strategy.
    pub index: usize,
    pub value: T,
}

pub struct FallbackChain<'a, T, E> {
    strategies: Vec<(String, Strategy<'a, T, E>)>,
}

impl<'a, T, E: std::fmt::Display> FallbackChain<'a, T, E> {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn push<F>(mut self, name: impl Into<String>, strategy: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a,
    {
        self.strategies.push((name.into(), Box::new(strategy)));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn run(self) -> Result<FallbackOutcome<T>, FallbackError<E>> {
        let mut failures = Vec::new();
        for (index, (name, strategy)) in self.strategies.into_iter().enumerate() {
            match strategy().await {
                Ok(value) => {
                    if index > 0 {
                        tracing::debug!(strategy = %name, index, "fallback strategy succeeded");
                    }
                    return Ok(FallbackOutcome {
                        strategy: name,
                        index,
                        value,
                    });
                }
                Err(e) => {
                    tracing::debug!(strategy = %name, error = %e, "fallback strategy failed");
                    failures.push((name, e));
                }
            }
        }
        Err(FallbackError { failures })
    }
}

impl<'a, T, E: std::fmt::Display> Default for FallbackChain<'a, T, E> {
    fn default() -> Self {
        Self::new()
    }
}
