//! Error taxonomy for structured generation.
//!
//! Everything except [`ContractError`] is absorbed by the orchestrator and ends
//! up either as a retry or as a [`FallbackReason`]. `ContractError` marks a
//! programming mistake and is returned to the caller untouched.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::extraction::{ExtractionAttempt, Strategy};

/// Failure of a single transport call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, DNS or TLS failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The service asked us to slow down (HTTP 429 or equivalent).
    #[error("Rate limited: {detail}")]
    RateLimited {
        /// Server-suggested wait, when provided.
        retry_after: Option<Duration>,
        /// Response detail for logs.
        detail: String,
    },

    /// The service failed on its side (5xx or equivalent).
    #[error("Server error (status {status}): {detail}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response detail for logs.
        detail: String,
    },

    /// Credentials were missing, invalid or lack permission.
    #[error("Authentication failed (status {status}): {detail}")]
    Auth {
        /// HTTP status code.
        status: u16,
        /// Response detail for logs.
        detail: String,
    },

    /// The request itself was rejected as malformed or unsupported.
    #[error("Request rejected (status {status}): {detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response detail for logs.
        detail: String,
    },

    /// A success status arrived with an unusable envelope (no choices, no content).
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The transport cannot be used at all (e.g. not configured).
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of a [`TransportError`], cheap to copy into retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// See [`TransportError::Timeout`].
    Timeout,
    /// See [`TransportError::Network`].
    Network,
    /// See [`TransportError::RateLimited`].
    RateLimited,
    /// See [`TransportError::Server`].
    Server,
    /// See [`TransportError::Auth`].
    Auth,
    /// See [`TransportError::Rejected`].
    Rejected,
    /// See [`TransportError::InvalidResponse`].
    InvalidResponse,
    /// See [`TransportError::Unavailable`].
    Unavailable,
}

impl TransportErrorKind {
    /// Whether a failure of this kind may succeed when retried.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::RateLimited | Self::Server | Self::InvalidResponse
        )
    }
}

impl TransportError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Timeout(_) => TransportErrorKind::Timeout,
            Self::Network(_) => TransportErrorKind::Network,
            Self::RateLimited { .. } => TransportErrorKind::RateLimited,
            Self::Server { .. } => TransportErrorKind::Server,
            Self::Auth { .. } => TransportErrorKind::Auth,
            Self::Rejected { .. } => TransportErrorKind::Rejected,
            Self::InvalidResponse(_) => TransportErrorKind::InvalidResponse,
            Self::Unavailable(_) => TransportErrorKind::Unavailable,
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Server-suggested wait before the next attempt, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classifies a non-success HTTP status.
    ///
    /// 408, 429 and every 5xx are transient; 401 and 403 are authentication
    /// failures; any other status is a rejected request.
    ///
    /// # Examples
    ///
    /// ```
    /// use metanovel_resilience::TransportError;
    ///
    /// assert!(TransportError::from_status(429, "slow down", None).is_transient());
    /// assert!(TransportError::from_status(503, "busy", None).is_transient());
    /// assert!(!TransportError::from_status(401, "bad key", None).is_transient());
    /// ```
    #[must_use]
    pub fn from_status(status: u16, detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let detail = detail.into();
        match status {
            429 => Self::RateLimited {
                retry_after,
                detail,
            },
            408 => Self::Network(format!("request timeout (status 408): {detail}")),
            401 | 403 => Self::Auth { status, detail },
            500..=599 => Self::Server { status, detail },
            _ => Self::Rejected { status, detail },
        }
    }
}

/// No extraction strategy produced schema-valid output.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    /// Every attempt, in the order tried.
    pub attempts: Vec<ExtractionAttempt>,
}

impl ExtractionFailure {
    /// The failure reason of the last strategy tried.
    ///
    /// Never empty.
    #[must_use]
    pub fn reason(&self) -> String {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.failure_reason.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "no extraction strategy was applicable".to_string())
    }

    /// One line per attempted strategy, for diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.strategy,
                    a.failure_reason.as_deref().unwrap_or("ok")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Strategies that were attempted.
    pub fn strategies(&self) -> impl Iterator<Item = Strategy> + '_ {
        self.attempts.iter().map(|a| a.strategy)
    }
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No strategy produced schema-valid output after {} attempts (last: {})",
            self.attempts.len(),
            self.reason()
        )
    }
}

impl std::error::Error for ExtractionFailure {}

/// Record of one reformat request made by the recovery issuer.
#[derive(Debug, Clone)]
pub struct RecoveryAttemptRecord {
    /// The attempt number (1-indexed).
    pub attempt_number: u32,
    /// Length in chars of the reformat prompt sent.
    pub prompt_chars: usize,
    /// Raw text returned by the model, empty when the transport failed.
    pub raw_text: String,
    /// Why the attempt did not produce a result.
    pub failure_reason: String,
    /// Strategies tried on the reply, empty when the transport failed.
    pub strategies_tried: Vec<Strategy>,
}

/// Reformat attempts were exhausted without a schema-valid result.
#[derive(Debug, Clone, Error)]
#[error("Recovery failed after {attempts} reformat attempts (budget: {budget}): {last_reason}")]
pub struct RecoveryFailure {
    /// Reformat requests actually issued.
    pub attempts: u32,
    /// Configured budget.
    pub budget: u32,
    /// Most recent raw text seen (the original failed text if no reply arrived).
    pub last_raw_text: String,
    /// Most recent failure reason.
    pub last_reason: String,
    /// Per-attempt history.
    pub history: Vec<RecoveryAttemptRecord>,
}

/// Why a call ended with the caller's default value.
#[derive(Debug, Clone, Error)]
pub enum FallbackReason {
    /// Transient transport failures used up every attempt.
    #[error("Transport failed after {attempts} attempts: {last}")]
    TransportExhausted {
        /// Attempts made.
        attempts: u32,
        /// The final transient error.
        last: TransportError,
    },

    /// A permanent transport failure; never retried.
    #[error("Permanent transport failure: {0}")]
    PermanentTransport(TransportError),

    /// Extraction and every reformat attempt failed.
    #[error(transparent)]
    RecoveryExhausted(#[from] RecoveryFailure),

    /// The prompt could not be produced (missing or broken template).
    #[error("Prompt unavailable: {0}")]
    PromptUnavailable(String),

    /// A schema-valid value did not fit the caller's result type.
    #[error("Result does not fit the target type: {0}")]
    Undeserializable(String),
}

/// Programming errors: invalid inputs to the orchestrator itself.
///
/// These are surfaced immediately and never retried or swallowed.
#[derive(Debug, Error)]
pub enum ContractError {
    /// The schema descriptor is not a valid JSON Schema.
    #[error("Invalid schema descriptor: {0}")]
    InvalidSchema(String),

    /// The caller-supplied default does not satisfy the request's schema.
    #[error("Default value violates the schema: {}", .0.join("; "))]
    DefaultViolatesSchema(Vec<String>),

    /// The caller-supplied default could not be represented as JSON.
    #[error("Default value is not serializable: {0}")]
    UnserializableDefault(String),

    /// Configuration values are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requests must name their task for diagnostics.
    #[error("Generation request has an empty task id")]
    EmptyTaskId,
}
