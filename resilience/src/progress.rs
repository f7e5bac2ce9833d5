//! Progress notifications for callers that want to show what a call is doing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FallbackReason, TransportError};

/// Callback invoked on every retry, reformat request and fallback.
///
/// Runs inline on the calling task; keep it cheap.
pub type ProgressObserver = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// A notable step in resolving one request.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A transient transport failure; the call is retried after `delay`.
    Retrying {
        /// Task the request belongs to.
        task: String,
        /// Attempt that failed (1-indexed).
        attempt: u32,
        /// Attempts allowed for the request.
        max_attempts: u32,
        /// Backoff before the next attempt.
        delay: Duration,
        /// The failure being retried.
        error: TransportError,
    },
    /// A reformat request is about to be sent.
    Recovering {
        /// Task the request belongs to.
        task: String,
        /// Reformat attempt (1-indexed).
        attempt: u32,
        /// Reformat attempts allowed.
        budget: u32,
        /// Why the previous text could not be used.
        reason: String,
    },
    /// The caller's default is being returned.
    Fallback {
        /// Task the request belongs to.
        task: String,
        /// Why.
        reason: FallbackReason,
    },
}

impl ProgressEvent {
    /// Task the event belongs to.
    #[must_use]
    pub fn task(&self) -> &str {
        match self {
            Self::Retrying { task, .. } | Self::Recovering { task, .. } | Self::Fallback { task, .. } => {
                task
            }
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrying {
                task,
                attempt,
                max_attempts,
                delay,
                error,
            } => write!(
                f,
                "[{task}] Attempt {attempt}/{max_attempts} failed ({error}), retrying in {:.1}s",
                delay.as_secs_f64()
            ),
            Self::Recovering {
                task,
                attempt,
                budget,
                reason,
            } => write!(
                f,
                "[{task}] Unusable reply ({reason}), requesting reformat {attempt}/{budget}"
            ),
            Self::Fallback { task, reason } => {
                write!(f, "[{task}] Giving up, using the default value: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_task_and_counts() {
        let event = ProgressEvent::Retrying {
            task: "canon_bible".to_string(),
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_millis(1500),
            error: TransportError::Timeout(Duration::from_secs(60)),
        };
        let text = event.to_string();
        assert!(text.starts_with("[canon_bible] Attempt 1/3 failed"));
        assert!(text.ends_with("retrying in 1.5s"));
        assert_eq!(event.task(), "canon_bible");

        let event = ProgressEvent::Recovering {
            task: "characters".to_string(),
            attempt: 2,
            budget: 2,
            reason: "no '[' found in response".to_string(),
        };
        assert!(event.to_string().contains("requesting reformat 2/2"));
    }
}
