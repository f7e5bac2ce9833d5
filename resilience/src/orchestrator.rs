//! Top-level entry point: send, retry, extract, recover, fall back.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use metanovel_templates::{ProjectContext, ScopedTemplateCache};

use crate::backoff::{Sleeper, TokioSleeper};
use crate::config::GenerationConfig;
use crate::error::{
    ContractError, ExtractionFailure, FallbackReason, RecoveryAttemptRecord, TransportErrorKind,
};
use crate::extraction::{extract, Strategy};
use crate::feedback::truncate_chars;
use crate::metrics::RunMetrics;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::recovery::RecoveryIssuer;
use crate::request::{GenerationRequest, PromptSource};
use crate::schema::SchemaDescriptor;
use crate::transport::{send_bounded, RawResponse, Transport};

/// How a call was resolved.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The first reply was extracted directly.
    Extracted {
        /// Winning strategy.
        strategy: Strategy,
    },
    /// A reformat request produced the value.
    Recovered {
        /// Winning strategy on the reformatted reply.
        strategy: Strategy,
        /// Reformat attempt that succeeded (1-indexed).
        attempt: u32,
    },
    /// The caller's default was returned.
    Fallback(FallbackReason),
}

/// The value a call resolved to, with how it got there.
#[derive(Debug, Clone)]
pub struct Resolution<T = Value> {
    /// Extracted, recovered or default value; always schema-valid.
    pub value: T,
    /// How the value was obtained.
    pub outcome: Outcome,
    /// What the call cost.
    pub metrics: RunMetrics,
}

impl<T> Resolution<T> {
    /// True when `value` is the caller's default.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback(_))
    }

    /// The terminal failure, when the default was used.
    #[must_use]
    pub const fn fallback_reason(&self) -> Option<&FallbackReason> {
        match &self.outcome {
            Outcome::Fallback(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Transport retry bookkeeping for one call.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    accumulated_delay: Duration,
    last_error_kind: Option<TransportErrorKind>,
}

enum State {
    Sending,
    Extracting(RawResponse),
    Recovering {
        raw_text: String,
        failure: ExtractionFailure,
    },
    Fallback(FallbackReason),
    Done {
        value: Value,
        outcome: Outcome,
    },
}

/// Drives one structured-generation call to a value.
///
/// Transient transport failures are retried with backoff; a reply that no
/// extraction strategy can use triggers bounded reformat requests; anything
/// else ends with the caller's default. Only [`ContractError`]s escape.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    config: GenerationConfig,
    sleeper: Arc<dyn Sleeper>,
    templates: Option<(Arc<ScopedTemplateCache>, Arc<dyn ProjectContext>)>,
    ambient_vars: BTreeMap<String, String>,
    observer: Option<ProgressObserver>,
}

impl Orchestrator {
    /// Creates an orchestrator with default configuration.
    #[must_use]
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_shared(Arc::new(transport))
    }

    /// Creates an orchestrator over an already shared transport.
    #[must_use]
    pub fn from_shared(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: GenerationConfig::default(),
            sleeper: Arc::new(TokioSleeper),
            templates: None,
            ambient_vars: BTreeMap::new(),
            observer: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the sleeper used for backoff.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Enables template prompts, resolved for the project `context` reports.
    #[must_use]
    pub fn with_templates(
        mut self,
        cache: Arc<ScopedTemplateCache>,
        context: Arc<dyn ProjectContext>,
    ) -> Self {
        self.templates = Some((cache, context));
        self
    }

    /// Template variables available to every template prompt.
    ///
    /// A request's own variables take precedence over these.
    #[must_use]
    pub fn with_ambient_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.ambient_vars = vars;
        self
    }

    /// Reports retries, reformat requests and fallbacks to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// A request whose attempts and timeout come from this orchestrator's config.
    pub fn request(
        &self,
        task_id: impl Into<String>,
        prompt: impl Into<PromptSource>,
        schema: SchemaDescriptor,
    ) -> GenerationRequest {
        GenerationRequest::new(task_id, prompt, schema)
            .with_max_attempts(self.config.max_transport_attempts)
            .with_timeout(self.config.request_timeout)
    }

    /// Resolves `request` to a schema-valid value, or to `default`.
    ///
    /// # Errors
    ///
    /// Returns a [`ContractError`] only for invalid inputs: a default that
    /// violates the request's schema, an empty task id or unusable settings.
    /// Every transport, extraction and recovery failure ends in
    /// [`Outcome::Fallback`] instead.
    #[instrument(skip_all, fields(task = %request.task_id()))]
    pub async fn run(
        &self,
        request: &GenerationRequest,
        default: Value,
    ) -> Result<Resolution, ContractError> {
        self.check_contract(request, &default)?;

        let start = Instant::now();
        let mut metrics = RunMetrics::default();
        let mut retry = RetryState::default();
        let mut rng = StdRng::seed_from_u64(self.config.jitter_seed.unwrap_or_else(rand::random));
        let backoff = &self.config.backoff;

        let (prompt, mut state) = match self.render_prompt(request) {
            Ok(prompt) => (prompt, State::Sending),
            Err(reason) => (
                String::new(),
                State::Fallback(FallbackReason::PromptUnavailable(reason)),
            ),
        };

        loop {
            state = match state {
                State::Sending => {
                    retry.attempt += 1;
                    metrics.record_sent(prompt.chars().count());
                    debug!(attempt = retry.attempt, "Sending request");

                    match send_bounded(self.transport.as_ref(), &prompt, request.timeout()).await {
                        Ok(response) => {
                            metrics.record_received(&response.body);
                            State::Extracting(response)
                        }
                        Err(err) => {
                            retry.last_error_kind = Some(err.kind());
                            if !err.is_transient() {
                                warn!(attempt = retry.attempt, error = %err, "Permanent transport failure");
                                State::Fallback(FallbackReason::PermanentTransport(err))
                            } else if retry.attempt >= request.max_attempts() {
                                warn!(attempt = retry.attempt, error = %err, "Transport attempts exhausted");
                                State::Fallback(FallbackReason::TransportExhausted {
                                    attempts: retry.attempt,
                                    last: err,
                                })
                            } else {
                                let mut delay = backoff.delay(retry.attempt, &mut rng);
                                if let Some(requested) = err.retry_after() {
                                    delay = delay.max(requested.min(backoff.cap));
                                }
                                warn!(
                                    attempt = retry.attempt,
                                    error = %err,
                                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                    "Transient transport failure, backing off"
                                );
                                retry.accumulated_delay = retry.accumulated_delay.saturating_add(delay);
                                metrics.backoff_sleeps.push(delay);
                                self.notify(|| ProgressEvent::Retrying {
                                    task: request.task_id().to_string(),
                                    attempt: retry.attempt,
                                    max_attempts: request.max_attempts(),
                                    delay,
                                    error: err.clone(),
                                });
                                self.sleeper.sleep(delay).await;
                                State::Sending
                            }
                        }
                    }
                }

                State::Extracting(response) => match extract(&response.body, request.schema()) {
                    Ok(found) => State::Done {
                        value: found.value,
                        outcome: Outcome::Extracted {
                            strategy: found.strategy,
                        },
                    },
                    Err(failure) => {
                        warn!(
                            attempt = retry.attempt,
                            reason = %failure.reason(),
                            strategies = %failure.summary(),
                            finish_reason = response.finish_reason.as_deref().unwrap_or("unknown"),
                            "No extraction strategy succeeded"
                        );
                        State::Recovering {
                            raw_text: response.body,
                            failure,
                        }
                    }
                },

                State::Recovering { raw_text, failure } => {
                    let issuer = RecoveryIssuer::new(self.transport.as_ref(), &self.config)
                        .with_observer(self.observer.as_ref());
                    match issuer
                        .recover(
                            request,
                            &raw_text,
                            &failure.reason(),
                            self.config.recovery_budget,
                        )
                        .await
                    {
                        Ok(recovered) => {
                            record_recovery(&mut metrics, &recovered.history);
                            State::Done {
                                value: recovered.value,
                                outcome: Outcome::Recovered {
                                    strategy: recovered.strategy,
                                    attempt: recovered.attempt,
                                },
                            }
                        }
                        Err(failure) => {
                            record_recovery(&mut metrics, &failure.history);
                            warn!(
                                attempts = failure.attempts,
                                budget = failure.budget,
                                reason = %failure.last_reason,
                                raw_excerpt = %truncate_chars(&failure.last_raw_text, 200),
                                "Reformat attempts exhausted"
                            );
                            for record in &failure.history {
                                debug!(
                                    attempt = record.attempt_number,
                                    reason = %record.failure_reason,
                                    strategies = ?record.strategies_tried,
                                    "Reformat attempt"
                                );
                            }
                            State::Fallback(FallbackReason::RecoveryExhausted(failure))
                        }
                    }
                }

                State::Fallback(reason) => {
                    finish(&mut metrics, &retry, start);
                    warn!(reason = %reason, "Using default value");
                    self.notify(|| ProgressEvent::Fallback {
                        task: request.task_id().to_string(),
                        reason: reason.clone(),
                    });
                    return Ok(Resolution {
                        value: default,
                        outcome: Outcome::Fallback(reason),
                        metrics,
                    });
                }

                State::Done { value, outcome } => {
                    finish(&mut metrics, &retry, start);
                    info!(
                        outcome = ?outcome,
                        transport_attempts = metrics.transport_attempts,
                        recovery_attempts = metrics.recovery_attempts,
                        "Structured result resolved"
                    );
                    return Ok(Resolution {
                        value,
                        outcome,
                        metrics,
                    });
                }
            };
        }
    }

    /// [`run`](Self::run) for a typed result.
    ///
    /// A schema-valid value that does not deserialize into `T` resolves to
    /// `default` with [`FallbackReason::Undeserializable`].
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`ContractError::UnserializableDefault`].
    pub async fn run_typed<T>(
        &self,
        request: &GenerationRequest,
        default: T,
    ) -> Result<Resolution<T>, ContractError>
    where
        T: Serialize + DeserializeOwned,
    {
        let default_value = serde_json::to_value(&default)
            .map_err(|e| ContractError::UnserializableDefault(e.to_string()))?;
        let resolution = self.run(request, default_value).await?;

        if resolution.is_fallback() {
            return Ok(Resolution {
                value: default,
                outcome: resolution.outcome,
                metrics: resolution.metrics,
            });
        }

        match serde_json::from_value::<T>(resolution.value) {
            Ok(value) => Ok(Resolution {
                value,
                outcome: resolution.outcome,
                metrics: resolution.metrics,
            }),
            Err(e) => {
                let reason = FallbackReason::Undeserializable(e.to_string());
                warn!(task = %request.task_id(), reason = %reason, "Using default value");
                self.notify(|| ProgressEvent::Fallback {
                    task: request.task_id().to_string(),
                    reason: reason.clone(),
                });
                Ok(Resolution {
                    value: default,
                    outcome: Outcome::Fallback(reason),
                    metrics: resolution.metrics,
                })
            }
        }
    }

    fn notify(&self, event: impl FnOnce() -> ProgressEvent) {
        if let Some(observer) = &self.observer {
            observer(&event());
        }
    }

    fn check_contract(
        &self,
        request: &GenerationRequest,
        default: &Value,
    ) -> Result<(), ContractError> {
        if request.task_id().trim().is_empty() {
            return Err(ContractError::EmptyTaskId);
        }
        self.config.validate()?;
        if request.max_attempts() == 0 {
            return Err(ContractError::InvalidConfig(
                "request max_attempts must be at least 1".to_string(),
            ));
        }
        if request.timeout().is_zero() {
            return Err(ContractError::InvalidConfig(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        request
            .schema()
            .validate(default)
            .map_err(ContractError::DefaultViolatesSchema)
    }

    fn render_prompt(&self, request: &GenerationRequest) -> Result<String, String> {
        match request.prompt() {
            PromptSource::Text(text) => Ok(text.clone()),
            PromptSource::Template {
                key,
                user_prompt,
                vars,
            } => {
                let (cache, context) = self
                    .templates
                    .as_ref()
                    .ok_or_else(|| format!("template '{key}' requested but no template cache is configured"))?;
                let project = context.current_project_id();
                debug!(project = %project, template = %key, "Rendering prompt template");
                let vars = if self.ambient_vars.is_empty() {
                    Cow::Borrowed(vars)
                } else {
                    let mut merged = self.ambient_vars.clone();
                    merged.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Cow::Owned(merged)
                };
                cache
                    .resolve(&project)
                    .and_then(|set| set.render(key, user_prompt, &vars))
                    .map_err(|e| e.to_string())
            }
        }
    }
}

fn record_recovery(metrics: &mut RunMetrics, history: &[RecoveryAttemptRecord]) {
    metrics.recovery_attempts = u32::try_from(history.len()).unwrap_or(u32::MAX);
    for record in history {
        metrics.record_sent(record.prompt_chars);
        metrics.record_received(&record.raw_text);
    }
}

fn finish(metrics: &mut RunMetrics, retry: &RetryState, start: Instant) {
    metrics.transport_attempts = retry.attempt;
    metrics.accumulated_delay = retry.accumulated_delay;
    metrics.last_error_kind = retry.last_error_kind;
    metrics.wall_time = start.elapsed();
}
