//! One logical structured-generation call.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::schema::SchemaDescriptor;

/// Where the prompt text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// Literal prompt text.
    Text(String),
    /// A template resolved for the active project right before sending.
    Template {
        /// Template key, e.g. `"canon_bible"`.
        key: String,
        /// Free-form user instructions appended through the template's wrapper.
        user_prompt: String,
        /// Placeholder values.
        vars: BTreeMap<String, String>,
    },
}

impl PromptSource {
    /// A template prompt without user instructions or variables.
    pub fn template(key: impl Into<String>) -> Self {
        Self::Template {
            key: key.into(),
            user_prompt: String::new(),
            vars: BTreeMap::new(),
        }
    }

    /// Sets the user instructions of a template prompt. No-op for text prompts.
    #[must_use]
    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        if let Self::Template { user_prompt, .. } = &mut self {
            *user_prompt = prompt.into();
        }
        self
    }

    /// Binds a placeholder of a template prompt. No-op for text prompts.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Template { vars, .. } = &mut self {
            vars.insert(name.into(), value.into());
        }
        self
    }
}

impl From<String> for PromptSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for PromptSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// An immutable description of one structured-generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    task_id: String,
    prompt: PromptSource,
    schema: SchemaDescriptor,
    max_attempts: u32,
    timeout: Duration,
}

impl GenerationRequest {
    /// Default transport attempts for a request.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Default timeout of a single transport call.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a request with default attempts and timeout.
    pub fn new(
        task_id: impl Into<String>,
        prompt: impl Into<PromptSource>,
        schema: SchemaDescriptor,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            schema,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Set the number of transport attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of the calling task, used in every log line.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The prompt source.
    #[must_use]
    pub const fn prompt(&self) -> &PromptSource {
        &self.prompt
    }

    /// The expected result shape.
    #[must_use]
    pub const fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// Transport attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Timeout of one transport call.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}
