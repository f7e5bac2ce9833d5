use crate::error::OpenRouterError;

/// Default OpenRouter API root.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// Model used when `DEFAULT_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-pro-preview-06-05";
/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

/// Connection settings for OpenRouter.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenRouterConfig {
    /// Bearer token.
    pub api_key: String,
    /// Model slug, e.g. `google/gemini-2.5-pro-preview-06-05`.
    pub model: String,
    /// API root without a trailing slash.
    pub base_url: String,
    /// Sent as `X-Title` so requests show up under the app's name.
    pub app_title: Option<String>,
}

impl std::fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("app_title", &self.app_title)
            .finish()
    }
}

impl OpenRouterConfig {
    /// Config for `api_key` with the default model and base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            app_title: Some("MetaNovel".to_string()),
        }
    }

    /// Set the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Reads `OPENROUTER_API_KEY`, `DEFAULT_MODEL` and `OPENROUTER_BASE_URL`.
    pub fn from_env() -> Result<Self, OpenRouterError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, OpenRouterError> {
        let api_key = lookup(API_KEY_ENV_VAR)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(OpenRouterError::MissingApiKey)?;

        let mut config = Self::new(api_key);
        if let Some(model) = lookup("DEFAULT_MODEL").filter(|m| !m.trim().is_empty()) {
            config = config.with_model(model.trim());
        }
        if let Some(base_url) = lookup("OPENROUTER_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config = config.with_base_url(base_url.trim());
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that the config can produce a working client.
    pub fn validate(&self) -> Result<(), OpenRouterError> {
        if self.api_key.trim().is_empty() {
            return Err(OpenRouterError::MissingApiKey);
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(OpenRouterError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(OpenRouterError::InvalidConfig("model must not be empty".to_string()));
        }
        Ok(())
    }

    /// URL of the chat-completions endpoint.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_from_env() {
        let config = OpenRouterConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "sk-1")])).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.completions_url(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn test_overrides_from_env() {
        let config = OpenRouterConfig::from_lookup(lookup(&[
            ("OPENROUTER_API_KEY", "sk-1"),
            ("DEFAULT_MODEL", "meta-llama/llama-3.1-8b-instruct"),
            ("OPENROUTER_BASE_URL", "http://localhost:8080/v1/"),
        ]))
        .unwrap();
        assert_eq!(config.model, "meta-llama/llama-3.1-8b-instruct");
        assert_eq!(config.completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_missing_key() {
        let err = OpenRouterConfig::from_lookup(lookup(&[("OPENROUTER_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, OpenRouterError::MissingApiKey));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", OpenRouterConfig::new("sk-secret"));
        assert!(!rendered.contains("sk-secret"));
    }
}
