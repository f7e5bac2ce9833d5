use std::time::Duration;

use async_trait::async_trait;
use metanovel_resilience::{RawResponse, Transport, TransportError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use tracing::{debug, instrument};

use crate::config::OpenRouterConfig;
use crate::dto::{ChatMessage, ChatRequest, ChatResponse, ErrorEnvelope};
use crate::error::OpenRouterError;

/// Longest response excerpt kept in error details.
const DETAIL_LIMIT: usize = 300;

/// Sends prompts to OpenRouter's chat-completions endpoint.
///
/// Each prompt goes out as a single user message; there is no conversation
/// state between calls.
#[derive(Debug, Clone)]
pub struct OpenRouterTransport {
    config: OpenRouterConfig,
    client: Client,
}

impl OpenRouterTransport {
    /// Builds the HTTP client. Proxy environment variables are honoured.
    pub fn new(config: OpenRouterConfig) -> Result<Self, OpenRouterError> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(concat!("metanovel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    /// Reads the config from the environment and builds the transport.
    pub fn from_env() -> Result<Self, OpenRouterError> {
        Self::new(OpenRouterConfig::from_env()?)
    }

    /// The active config.
    #[must_use]
    pub const fn config(&self) -> &OpenRouterConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for OpenRouterTransport {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn send(&self, prompt: &str, timeout: Duration) -> Result<RawResponse, TransportError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage::user(prompt)],
        };

        let mut request = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&body);
        if let Some(title) = &self.config.app_title {
            request = request.header("X-Title", title);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest(&e, timeout))?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| classify_reqwest(&e, timeout))?;
        debug!(status = status.as_u16(), bytes = text.len(), "OpenRouter responded");

        if !status.is_success() {
            return Err(TransportError::from_status(
                status.as_u16(),
                error_detail(&text),
                retry_after,
            ));
        }
        parse_completion(&text)
    }
}

fn classify_reqwest(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Network(error.to_string())
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        })
}

/// Turns a 2xx body into the model's text.
///
/// An `error` object is classified by its code; a body without choices or
/// content is an [`TransportError::InvalidResponse`].
pub fn parse_completion(text: &str) -> Result<RawResponse, TransportError> {
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        TransportError::InvalidResponse(format!("malformed completion body: {e}"))
    })?;

    if let Some(error) = parsed.error {
        return Err(match error.status_code() {
            Some(status) if status >= 400 => {
                TransportError::from_status(status, error.message, None)
            }
            _ => TransportError::InvalidResponse(format!("provider error: {}", error.message)),
        });
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::InvalidResponse("response has no choices".to_string()))?;
    let content = choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| TransportError::InvalidResponse("choice has no content".to_string()))?;

    Ok(RawResponse {
        body: content,
        finish_reason: choice.finish_reason,
    })
}

fn error_detail(text: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(text) {
        if !envelope.error.message.is_empty() {
            return envelope.error.message;
        }
    }
    let trimmed = text.trim();
    match trimmed.char_indices().nth(DETAIL_LIMIT) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metanovel_resilience::TransportErrorKind;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_completion() {
        let body = r#"{"id": "gen-1", "choices": [{"message": {"role": "assistant", "content": "{\"a\": 1}"}, "finish_reason": "stop"}]}"#;
        let response = parse_completion(body).unwrap();
        assert_eq!(response.body, "{\"a\": 1}");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_empty_content_is_passed_through() {
        let body = r#"{"choices": [{"message": {"content": ""}}]}"#;
        assert_eq!(parse_completion(body).unwrap().body, "");
    }

    #[test]
    fn test_missing_choices_is_transient() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::InvalidResponse);
        assert!(err.is_transient());

        let err = parse_completion(r#"{"choices": [{"message": {}}]}"#).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::InvalidResponse);
    }

    #[test]
    fn test_error_object_in_success_body() {
        let err = parse_completion(r#"{"error": {"message": "Rate limit exceeded", "code": 429}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::RateLimited);

        let err = parse_completion(r#"{"error": {"message": "No auth", "code": 401}}"#).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Auth);

        let err = parse_completion(r#"{"error": {"message": "upstream", "code": "weird"}}"#)
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_parse_retry_after_out_of_range() {
        let mut headers = HeaderMap::new();
        for value in ["1e20", "-5", "NaN", "inf", "-0.5"] {
            headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
            assert_eq!(parse_retry_after(&headers), None, "{value}");
        }
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e9"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(1_000_000_000)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("18446744073709551615"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_error_detail_prefers_message() {
        assert_eq!(
            error_detail(r#"{"error": {"message": "Invalid model", "code": 400}}"#),
            "Invalid model"
        );
        assert_eq!(error_detail("  plain text  "), "plain text");
        assert!(error_detail(&"x".repeat(1000)).ends_with("..."));
    }
}
