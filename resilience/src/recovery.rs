//! Secondary "please reformat" requests after extraction fails.

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::GenerationConfig;
use crate::error::{RecoveryAttemptRecord, RecoveryFailure};
use crate::extraction::{extract, Strategy};
use crate::feedback::build_recovery_prompt;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::request::GenerationRequest;
use crate::transport::{send_bounded, Transport};

/// A value obtained through a reformat request.
#[derive(Debug, Clone)]
pub struct Recovered {
    /// The schema-valid value.
    pub value: Value,
    /// Strategy that extracted it from the reformatted reply.
    pub strategy: Strategy,
    /// Attempt that succeeded (1-indexed).
    pub attempt: u32,
    /// Every attempt, the successful one last.
    pub history: Vec<RecoveryAttemptRecord>,
}

/// Issues bounded reformat requests for text the extraction pipeline rejected.
///
/// Each attempt is one transport call with no backoff. A transient transport
/// failure uses up that attempt; a permanent one ends recovery.
pub struct RecoveryIssuer<'a> {
    transport: &'a dyn Transport,
    config: &'a GenerationConfig,
    observer: Option<&'a ProgressObserver>,
}

impl<'a> RecoveryIssuer<'a> {
    /// Creates an issuer sending through `transport`.
    #[must_use]
    pub const fn new(transport: &'a dyn Transport, config: &'a GenerationConfig) -> Self {
        Self {
            transport,
            config,
            observer: None,
        }
    }

    /// Reports each reformat request to `observer`.
    #[must_use]
    pub const fn with_observer(mut self, observer: Option<&'a ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Asks the model up to `budget` times to reformat `failed_raw_text`.
    ///
    /// Every prompt embeds the original failed text, never an earlier reformat
    /// reply, and assumes no prior conversation.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryFailure`] when the budget is spent (immediately for a
    /// budget of 0) or the transport fails permanently.
    #[instrument(skip_all, fields(task = %request.task_id(), budget = budget))]
    pub async fn recover(
        &self,
        request: &GenerationRequest,
        failed_raw_text: &str,
        failure_reason: &str,
        budget: u32,
    ) -> Result<Recovered, RecoveryFailure> {
        let schema = request.schema();
        let mut history: Vec<RecoveryAttemptRecord> = Vec::new();
        let mut last_raw_text = failed_raw_text.to_string();
        let mut last_reason = failure_reason.to_string();
        let mut prompt_reason = failure_reason.to_string();

        for attempt in 1..=budget {
            let prompt = build_recovery_prompt(
                failed_raw_text,
                &prompt_reason,
                attempt,
                budget,
                self.config
                    .include_schema_in_recovery
                    .then_some(schema.as_value()),
                self.config.recovery_excerpt_limit,
            );
            let prompt_chars = prompt.chars().count();
            info!(attempt, "Requesting reformat of unparsable output");
            if let Some(observer) = self.observer {
                observer(&ProgressEvent::Recovering {
                    task: request.task_id().to_string(),
                    attempt,
                    budget,
                    reason: prompt_reason.clone(),
                });
            }

            let response = match send_bounded(self.transport, &prompt, request.timeout()).await {
                Ok(response) => response,
                Err(err) => {
                    let permanent = !err.is_transient();
                    warn!(attempt, error = %err, permanent, "Reformat request failed");
                    last_reason = err.to_string();
                    history.push(RecoveryAttemptRecord {
                        attempt_number: attempt,
                        prompt_chars,
                        raw_text: String::new(),
                        failure_reason: last_reason.clone(),
                        strategies_tried: Vec::new(),
                    });
                    if permanent {
                        break;
                    }
                    continue;
                }
            };

            match extract(&response.body, schema) {
                Ok(found) => {
                    info!(attempt, strategy = %found.strategy, "Reformat produced valid output");
                    history.push(RecoveryAttemptRecord {
                        attempt_number: attempt,
                        prompt_chars,
                        raw_text: response.body,
                        failure_reason: String::new(),
                        strategies_tried: found.attempts.iter().map(|a| a.strategy).collect(),
                    });
                    return Ok(Recovered {
                        value: found.value,
                        strategy: found.strategy,
                        attempt,
                        history,
                    });
                }
                Err(failure) => {
                    last_reason = failure.reason();
                    prompt_reason.clone_from(&last_reason);
                    warn!(
                        attempt,
                        reason = %last_reason,
                        strategies = %failure.summary(),
                        "Reformatted output still unusable"
                    );
                    history.push(RecoveryAttemptRecord {
                        attempt_number: attempt,
                        prompt_chars,
                        raw_text: response.body.clone(),
                        failure_reason: last_reason.clone(),
                        strategies_tried: failure.strategies().collect(),
                    });
                    last_raw_text = response.body;
                }
            }
        }

        Err(RecoveryFailure {
            attempts: u32::try_from(history.len()).unwrap_or(u32::MAX),
            budget,
            last_raw_text,
            last_reason,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::TransportError;
    use crate::schema::SchemaDescriptor;
    use crate::transport::RawResponse;

    struct Scripted {
        replies: Mutex<Vec<Result<RawResponse, TransportError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<RawResponse, TransportError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, prompt: &str, _timeout: Duration) -> Result<RawResponse, TransportError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TransportError::Unavailable("script exhausted".into())))
        }
    }

    fn request() -> GenerationRequest {
        let schema = SchemaDescriptor::new(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }))
        .unwrap();
        GenerationRequest::new("characters", "Describe the hero", schema)
    }

    #[tokio::test]
    async fn test_second_attempt_succeeds_and_embeds_original_text() {
        let transport = Scripted::new(vec![
            Ok(RawResponse::new("Still prose, sorry.")),
            Ok(RawResponse::new(r#"{"name": "Ada"}"#)),
        ]);
        let config = GenerationConfig::default();
        let issuer = RecoveryIssuer::new(&transport, &config);

        let recovered = issuer
            .recover(&request(), "The hero is Ada.", "no '{' found in response", 2)
            .await
            .unwrap();

        assert_eq!(recovered.value, json!({"name": "Ada"}));
        assert_eq!(recovered.attempt, 2);
        assert_eq!(recovered.history.len(), 2);

        let prompts = transport.prompts();
        assert_eq!(prompts.len(), 2);
        for prompt in &prompts {
            assert!(prompt.contains("The hero is Ada."));
            assert!(!prompt.contains("Still prose, sorry."));
        }
    }

    #[tokio::test]
    async fn test_budget_zero_never_calls_transport() {
        let transport = Scripted::new(vec![]);
        let config = GenerationConfig::default();
        let failure = RecoveryIssuer::new(&transport, &config)
            .recover(&request(), "prose", "no '{' found in response", 0)
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 0);
        assert_eq!(failure.last_raw_text, "prose");
        assert!(transport.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_text_and_reason() {
        let transport = Scripted::new(vec![
            Ok(RawResponse::new("nope")),
            Ok(RawResponse::new("{\"other\": 1}")),
        ]);
        let config = GenerationConfig::default();
        let failure = RecoveryIssuer::new(&transport, &config)
            .recover(&request(), "prose", "no '{' found in response", 2)
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.last_raw_text, "{\"other\": 1}");
        assert!(failure.last_reason.contains("schema validation failed"));
        assert_eq!(failure.history[1].strategies_tried, Strategy::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_permanent_transport_failure_stops_recovery() {
        let transport = Scripted::new(vec![
            Err(TransportError::Auth {
                status: 401,
                detail: "bad key".into(),
            }),
            Ok(RawResponse::new(r#"{"name": "Ada"}"#)),
        ]);
        let config = GenerationConfig::default();
        let failure = RecoveryIssuer::new(&transport, &config)
            .recover(&request(), "prose", "no '{' found in response", 2)
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(transport.prompts().len(), 1);
        assert!(failure.last_reason.contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_transient_failure_consumes_attempt() {
        let transport = Scripted::new(vec![
            Err(TransportError::Network("reset".into())),
            Ok(RawResponse::new(r#"{"name": "Ada"}"#)),
        ]);
        let config = GenerationConfig::default();
        let recovered = RecoveryIssuer::new(&transport, &config)
            .recover(&request(), "prose", "no '{' found in response", 2)
            .await
            .unwrap();

        assert_eq!(recovered.attempt, 2);
        assert!(recovered.history[0].raw_text.is_empty());
    }
}
