//! Public error types for metanovel.

use thiserror::Error;

/// Errors that can occur when setting up or driving generation.
///
/// Generation itself never fails for transport, parsing or recovery problems;
/// those end in the caller's default value. What remains are setup mistakes
/// and broken contracts, wrapped here with their source chain intact.
#[derive(Debug, Error)]
pub enum Error {
    /// A request broke the orchestrator's contract (invalid schema, a default
    /// that violates it, unusable settings).
    #[error("{0}")]
    Contract(#[from] metanovel_resilience::ContractError),

    /// Template loading or rendering failed outside a generation call.
    #[error("{0}")]
    Template(#[from] metanovel_templates::TemplateError),

    /// The HTTP transport could not be built.
    #[error("{0}")]
    OpenRouter(#[from] metanovel_openrouter::OpenRouterError),

    /// Configuration error (invalid settings or options).
    #[error("Configuration error: {0}")]
    Config(String),
}
