use thiserror::Error;

/// Problems building an [`OpenRouterTransport`](crate::OpenRouterTransport).
///
/// Failures of individual requests are reported as
/// [`TransportError`](metanovel_resilience::TransportError)s instead.
#[derive(Debug, Error)]
pub enum OpenRouterError {
    #[error("OPENROUTER_API_KEY is not set")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
