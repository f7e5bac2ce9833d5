//! OpenRouter transport for the metanovel resilience layer.
//!
//! [`OpenRouterTransport`] implements [`metanovel_resilience::Transport`] over
//! the chat-completions API and maps every HTTP outcome onto a
//! [`metanovel_resilience::TransportError`], so the orchestrator can tell
//! retryable failures from permanent ones.

/// Connection settings and environment loading.
pub mod config;
/// Error types for transport construction.
pub mod error;

mod client;
mod dto;

pub use client::{parse_completion, parse_retry_after, OpenRouterTransport};
pub use config::{OpenRouterConfig, API_KEY_ENV_VAR, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use error::OpenRouterError;
