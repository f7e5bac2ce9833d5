//! # metanovel
//!
//! Structured generation for long-form fiction projects that never leaves the
//! caller empty-handed.
//!
//! A [`Generator`] sends a prompt (plain text or a project template) to a
//! text-generation service, retries transient failures with backoff, pulls
//! schema-valid JSON out of whatever comes back, asks the model to reformat
//! unusable replies and, when all of that fails, returns the caller's default.
//!
//! ## Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use metanovel::prelude::*;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! let project = Arc::new(ActiveProject::new(ProjectId::new("my-novel")?));
//! let generator = Generator::from_settings(&settings, project)?;
//!
//! let schema = SchemaDescriptor::new(serde_json::json!({
//!     "type": "object",
//!     "properties": { "theme": { "type": "string" } },
//!     "required": ["theme"]
//! }))?;
//! let prompt = PromptSource::template("theme_paragraph").with_user_prompt("darker");
//! let resolution = generator
//!     .generate("theme_paragraph", prompt, schema, serde_json::json!({ "theme": "" }))
//!     .await?;
//! if resolution.is_fallback() {
//!     eprintln!("using default: {:?}", resolution.fallback_reason());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Environment-driven settings.
pub mod config;

/// Public error types.
pub mod errors;

/// Generator wiring.
pub mod generator;

/// Rig agents as transports.
pub mod rig_transport;

/// Commonly used types and traits.
pub mod prelude;

pub use config::Settings;
pub use errors::Error;
pub use generator::Generator;
pub use rig_transport::{classify_message, RigTransport};

pub use metanovel_openrouter as openrouter;
pub use metanovel_resilience as resilience;
pub use metanovel_templates as templates;
