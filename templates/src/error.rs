//! Error types for template loading, merging and rendering.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or rendering prompt templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A prompts file exists but could not be read.
    #[error("Failed to read prompts file {}: {source}", path.display())]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A prompts file is not a valid template map.
    #[error("Failed to parse prompts file {}: {source}", path.display())]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Project identifiers must be usable as a single directory name.
    #[error("Invalid project id {0:?}")]
    InvalidProjectId(String),

    /// No template is registered under the requested key.
    #[error("No prompt template named '{0}'")]
    MissingTemplate(String),

    /// A placeholder referenced a variable that was not supplied.
    #[error("Template '{key}' references unknown variable '{{{variable}}}'")]
    MissingVariable {
        /// Template key being rendered.
        key: String,
        /// Placeholder name without braces.
        variable: String,
    },

    /// A `{` was opened but never closed.
    #[error("Template '{key}' has an unterminated placeholder at byte {offset}")]
    UnterminatedPlaceholder {
        /// Template key being rendered.
        key: String,
        /// Byte offset of the opening brace.
        offset: usize,
    },
}
