//! Error types and the provider condition taxonomy.
//!
//! Provider calls fail with a [`ProviderError`]. Higher layers wrap it (with
//! the failing operation name, then with their own context), so call sites
//! never match on the outermost error directly. Instead they ask for the
//! [`Condition`] of an error, which is found by walking the `source()` chain
//! and therefore survives any number of wrapping layers.

use std::error::Error as StdError;

use thiserror::Error;

use crate::retry::RetryableError;
use crate::zone::ZoneError;

/// Boxed error used as the cause of retryable errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors reported by a cloud provider capability.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A lookup by tags or name matched nothing.
    #[error("{kind} not found: {selector}")]
    NotFound { kind: &'static str, selector: String },

    /// A lookup that must be unique matched more than one resource.
    #[error("expected a single {kind} matching {selector}, found {count}")]
    TooManyFound {
        kind: &'static str,
        selector: String,
        count: usize,
    },

    /// The credentials are not allowed to perform the call.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The resource is not in a state that allows the call (busy, locked, not ready).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The provider rejected the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network failure or provider-side outage.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The caller's cancellation token fired before the call completed.
    #[error("request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn not_found(kind: &'static str, selector: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            selector: selector.into(),
        }
    }

    pub fn too_many_found(kind: &'static str, selector: impl Into<String>, count: usize) -> Self {
        Self::TooManyFound {
            kind,
            selector: selector.into(),
            count,
        }
    }

    /// The taxonomy condition carried by this error, if any.
    pub fn condition(&self) -> Option<Condition> {
        match self {
            Self::NotFound { .. } => Some(Condition::NotFound),
            Self::TooManyFound { .. } => Some(Condition::TooManyFound),
            Self::Forbidden(_) => Some(Condition::Forbidden),
            Self::PreconditionFailed(_) => Some(Condition::PreconditionFailed),
            Self::InvalidRequest(_) | Self::Unavailable(_) | Self::Cancelled => None,
        }
    }
}

/// Condition kinds that call sites may choose to treat as expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    NotFound,
    /// Always an invariant violation: a selector meant to be unique was not.
    TooManyFound,
    Forbidden,
    PreconditionFailed,
}

/// Main error type for convergence operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A provider call failed; `operation` names the call.
    #[error("{operation}: {source}")]
    Provider {
        operation: String,
        #[source]
        source: ProviderError,
    },

    /// Zone parsing or validation error.
    #[error("{0}")]
    Zone(#[from] ZoneError),

    /// An error already classified as terminal or transient.
    #[error("{0}")]
    Retryable(#[from] RetryableError),

    /// An error wrapped with context by a higher layer.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Result type for convergence operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn provider(operation: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            operation: operation.into(),
            source,
        }
    }

    /// Wrap this error with additional context.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Adds [`Error::context`] to results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Find the first [`ProviderError`] in the cause chain of `err`.
pub fn provider_cause<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ProviderError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(provider) = e.downcast_ref::<ProviderError>() {
            return Some(provider);
        }
        current = e.source();
    }
    None
}

/// The condition kind of `err`, searched through its whole cause chain.
pub fn condition_of(err: &(dyn StdError + 'static)) -> Option<Condition> {
    provider_cause(err).and_then(ProviderError::condition)
}

pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    condition_of(err) == Some(Condition::NotFound)
}

pub fn is_too_many_found(err: &(dyn StdError + 'static)) -> bool {
    condition_of(err) == Some(Condition::TooManyFound)
}

pub fn is_forbidden(err: &(dyn StdError + 'static)) -> bool {
    condition_of(err) == Some(Condition::Forbidden)
}

pub fn is_precondition_failed(err: &(dyn StdError + 'static)) -> bool {
    condition_of(err) == Some(Condition::PreconditionFailed)
}

pub fn is_cancelled(err: &(dyn StdError + 'static)) -> bool {
    matches!(provider_cause(err), Some(ProviderError::Cancelled))
}

/// Turn the listed conditions into `Ok(None)` and propagate everything else.
pub fn filter_conditions<T>(result: Result<T>, expected: &[Condition]) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => match condition_of(&e) {
            Some(condition) if expected.contains(&condition) => Ok(None),
            _ => Err(e),
        },
    }
}

/// Existence probe helper: NotFound becomes `Ok(None)`.
pub fn ignore_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    filter_conditions(result, &[Condition::NotFound])
}
