//! Retry dispositions.
//!
//! Every failure of a reconciliation tick ends up either **terminal** (the
//! declared configuration is wrong and retrying will not help) or
//! **transient** (try again after a delay). Call sites that know which one
//! applies wrap their error in a [`RetryableError`]; everything else is
//! classified from the provider condition found in the cause chain.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::{BoxError, ProviderError, provider_cause};
use crate::zone::ZoneError;

/// Delay used when a transient error does not suggest one.
pub const DEFAULT_TRANSIENT_DELAY: Duration = Duration::from_secs(10);

/// Whether retrying can ever succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Misconfiguration; needs operator intervention.
    Terminal,
    /// Temporary condition; retry after a delay.
    Transient,
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryKind::Terminal => write!(f, "terminal"),
            RetryKind::Transient => write!(f, "transient"),
        }
    }
}

/// An error with an explicit retry disposition.
#[derive(Debug, Error)]
#[error("{kind} error: {source}")]
pub struct RetryableError {
    kind: RetryKind,
    #[source]
    source: BoxError,
    delay: Option<Duration>,
}

impl RetryableError {
    /// An error that will not resolve by retrying.
    pub fn terminal(err: impl Into<BoxError>) -> Self {
        Self {
            kind: RetryKind::Terminal,
            source: err.into(),
            delay: None,
        }
    }

    /// A temporary error; the next attempt should wait `delay`.
    pub fn transient(err: impl Into<BoxError>, delay: Duration) -> Self {
        Self {
            kind: RetryKind::Transient,
            source: err.into(),
            delay: Some(delay),
        }
    }

    pub fn kind(&self) -> RetryKind {
        self.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == RetryKind::Terminal
    }

    /// Suggested delay before the next attempt (transient errors only).
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }
}

/// What the control loop should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Terminal,
    Transient(Duration),
}

impl Disposition {
    /// Classify `err` using [`DEFAULT_TRANSIENT_DELAY`] as fallback delay.
    pub fn of(err: &(dyn StdError + 'static)) -> Self {
        Self::classify(err, DEFAULT_TRANSIENT_DELAY)
    }

    /// Classify `err`.
    ///
    /// An explicit [`RetryableError`] anywhere in the chain wins. Otherwise
    /// the provider condition decides; errors carrying no recognizable cause
    /// are treated as transient.
    pub fn classify(err: &(dyn StdError + 'static), default_delay: Duration) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(retryable) = e.downcast_ref::<RetryableError>() {
                return match retryable.kind() {
                    RetryKind::Terminal => Disposition::Terminal,
                    RetryKind::Transient => {
                        Disposition::Transient(retryable.delay().unwrap_or(default_delay))
                    }
                };
            }
            if e.downcast_ref::<ZoneError>().is_some() {
                return Disposition::Terminal;
            }
            current = e.source();
        }

        match provider_cause(err) {
            Some(
                ProviderError::Forbidden(_)
                | ProviderError::TooManyFound { .. }
                | ProviderError::InvalidRequest(_),
            ) => Disposition::Terminal,
            Some(
                ProviderError::NotFound { .. }
                | ProviderError::PreconditionFailed(_)
                | ProviderError::Unavailable(_)
                | ProviderError::Cancelled,
            )
            | None => Disposition::Transient(default_delay),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Disposition::Terminal)
    }
}
