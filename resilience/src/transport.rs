//! The capability to send a prompt to a remote model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// A successful transport reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// Text produced by the model, possibly empty.
    pub body: String,
    /// Why generation stopped, when the service reports it (e.g. `"length"`).
    pub finish_reason: Option<String>,
}

impl RawResponse {
    /// A reply with only a body.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            finish_reason: None,
        }
    }
}

/// Sends one prompt and returns the model's reply.
///
/// Implementations classify every failure into a [`TransportError`]; the
/// orchestrator decides whether to retry from [`TransportError::is_transient`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `prompt`, giving up after `timeout`.
    async fn send(&self, prompt: &str, timeout: Duration) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, prompt: &str, timeout: Duration) -> Result<RawResponse, TransportError> {
        (**self).send(prompt, timeout).await
    }
}

/// Calls `transport`, enforcing `timeout` even if the transport does not.
pub(crate) async fn send_bounded(
    transport: &dyn Transport,
    prompt: &str,
    timeout: Duration,
) -> Result<RawResponse, TransportError> {
    tokio::time::timeout(timeout, transport.send(prompt, timeout))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}
