//! Any rig agent as a [`Transport`].

use std::future::IntoFuture;
use std::time::Duration;

use async_trait::async_trait;
use metanovel_resilience::{RawResponse, Transport, TransportError};
use rig::completion::{Prompt, PromptError};

/// Keywords marking a failure worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "dns",
    "ssl",
    "tls",
    "temporarily",
];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests"];
/// Keywords marking bad or missing credentials, with the status they imply.
const AUTH_MARKERS: &[(&str, u16)] = &[
    ("unauthorized", 401),
    ("invalid api key", 401),
    ("authentication", 401),
    ("forbidden", 403),
];

/// Adapts a rig agent (or anything implementing [`Prompt`]) so the
/// orchestrator can drive it.
///
/// Rig reports provider failures as text, so they are classified from the
/// message: a standalone HTTP status if one appears, keywords otherwise.
/// See [`classify_message`].
///
/// ```no_run
/// # use metanovel::RigTransport;
/// # use metanovel_resilience::Orchestrator;
/// # fn example<A: rig::completion::Prompt + 'static>(agent: A) {
/// let orchestrator = Orchestrator::new(RigTransport::new(agent));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RigTransport<A> {
    agent: A,
}

impl<A: Prompt> RigTransport<A> {
    /// Wraps `agent`.
    pub const fn new(agent: A) -> Self {
        Self { agent }
    }

    /// The wrapped agent.
    pub const fn agent(&self) -> &A {
        &self.agent
    }
}

#[async_trait]
impl<A> Transport for RigTransport<A>
where
    A: Prompt + Send + Sync + 'static,
{
    async fn send(&self, prompt: &str, timeout: Duration) -> Result<RawResponse, TransportError> {
        let reply = tokio::time::timeout(timeout, self.agent.prompt(prompt.to_string()).into_future())
            .await
            .map_err(|_| TransportError::Timeout(timeout))?;
        reply.map(RawResponse::new).map_err(|e| classify(&e))
    }
}

fn classify(error: &PromptError) -> TransportError {
    classify_message(&error.to_string())
}

/// Maps a provider error message onto a [`TransportError`].
///
/// An HTTP status standing on its own in the message decides first; keywords
/// are the fallback when the provider reported none.
#[must_use]
pub fn classify_message(message: &str) -> TransportError {
    if let Some(status) = find_status(message) {
        return TransportError::from_status(status, message, None);
    }
    let lower = message.to_lowercase();
    if let Some(&(_, status)) = AUTH_MARKERS.iter().find(|(m, _)| lower.contains(m)) {
        return TransportError::Auth {
            status,
            detail: message.to_string(),
        };
    }
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        return TransportError::RateLimited {
            retry_after: None,
            detail: message.to_string(),
        };
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return TransportError::Network(message.to_string());
    }
    TransportError::Unavailable(message.to_string())
}

/// First whole-word number in the 4xx/5xx range.
fn find_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| word.len() == 3)
        .filter_map(|word| word.parse::<u16>().ok())
        .find(|status| (400..=599).contains(status))
}
