//! Per-call metrics.

use std::time::Duration;

use crate::error::TransportErrorKind;

/// Metrics collected while resolving one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    /// Transport calls made for the original prompt.
    pub transport_attempts: u32,
    /// Reformat requests issued.
    pub recovery_attempts: u32,
    /// Every backoff sleep, in order.
    pub backoff_sleeps: Vec<Duration>,
    /// Sum of `backoff_sleeps`.
    pub accumulated_delay: Duration,
    /// Kind of the most recent transport failure.
    pub last_error_kind: Option<TransportErrorKind>,
    /// Wall-clock time from entry to resolution.
    pub wall_time: Duration,
    /// Estimated tokens sent, reformat prompts included.
    pub estimated_input_tokens: usize,
    /// Estimated tokens received.
    pub estimated_output_tokens: usize,
}

/// Rough characters-per-token ratio used for the token estimates.
const CHARS_PER_TOKEN: usize = 4;

impl RunMetrics {
    /// Counts a prompt of `chars` characters toward the input estimate.
    pub fn record_sent(&mut self, chars: usize) {
        self.estimated_input_tokens += chars.div_ceil(CHARS_PER_TOKEN);
    }

    /// Counts a reply toward the output estimate.
    pub fn record_received(&mut self, text: &str) {
        self.estimated_output_tokens += text.chars().count().div_ceil(CHARS_PER_TOKEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimates_accumulate_per_message() {
        let mut metrics = RunMetrics::default();
        metrics.record_sent(10);
        metrics.record_sent(1);
        // Each reply rounds up on its own; CJK text counts characters.
        metrics.record_received("第一章");
        metrics.record_received("");

        assert_eq!(metrics.estimated_input_tokens, 4);
        assert_eq!(metrics.estimated_output_tokens, 1);
    }
}
