//! Configuration for transport retries, recovery and backoff.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::ContractError;

/// Retry, recovery and timeout settings for structured generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Transport attempts per request, first call included (default: 3).
    pub max_transport_attempts: u32,
    /// Reformat requests after extraction fails (default: 2).
    pub recovery_budget: u32,
    /// Timeout of a single transport call (default: 60s).
    pub request_timeout: Duration,
    /// Delay policy between transport attempts.
    pub backoff: BackoffPolicy,
    /// Seed for backoff jitter; random when unset.
    pub jitter_seed: Option<u64>,
    /// Whether reformat prompts include the expected schema (default: true).
    pub include_schema_in_recovery: bool,
    /// Characters of failed output echoed into a reformat prompt (default: 4000).
    pub recovery_excerpt_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_transport_attempts: 3,
            recovery_budget: 2,
            request_timeout: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            jitter_seed: None,
            include_schema_in_recovery: true,
            recovery_excerpt_limit: 4000,
        }
    }
}

impl GenerationConfig {
    /// Set the number of transport attempts.
    #[must_use]
    pub const fn with_max_transport_attempts(mut self, attempts: u32) -> Self {
        self.max_transport_attempts = attempts;
        self
    }

    /// Set the reformat budget.
    #[must_use]
    pub const fn with_recovery_budget(mut self, budget: u32) -> Self {
        self.recovery_budget = budget;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fix the jitter seed, making delays reproducible.
    #[must_use]
    pub const fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Set whether reformat prompts include the schema.
    #[must_use]
    pub const fn with_schema_in_recovery(mut self, include: bool) -> Self {
        self.include_schema_in_recovery = include;
        self
    }

    /// Set how much failed output is echoed into reformat prompts.
    #[must_use]
    pub const fn with_recovery_excerpt_limit(mut self, limit: usize) -> Self {
        self.recovery_excerpt_limit = limit;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.max_transport_attempts == 0 {
            return Err(ContractError::InvalidConfig(
                "max_transport_attempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ContractError::InvalidConfig(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.recovery_excerpt_limit == 0 {
            return Err(ContractError::InvalidConfig(
                "recovery_excerpt_limit must be greater than zero".to_string(),
            ));
        }
        self.backoff.validate()
    }
}
