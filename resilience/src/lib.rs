//! Resilient structured responses from an unreliable text-generation service.
//!
//! A call goes through an explicit state machine:
//!
//! - [`Orchestrator`] - Sends the prompt, retries transient transport failures with backoff
//! - [`extraction`] - Six cheap-to-aggressive strategies turning raw text into schema-valid JSON
//! - [`RecoveryIssuer`] - Bounded "please reformat" requests when extraction fails
//! - [`BackoffPolicy`] - Exponential delays with jitter
//! - [`ProgressEvent`] - Optional notifications for retries, reformats and fallbacks
//!
//! Every expected failure ends with the caller's default value; only
//! [`ContractError`]s are returned as errors.

pub mod backoff;
pub mod config;
pub mod error;
pub mod extraction;
pub mod feedback;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod recovery;
pub mod request;
pub mod schema;
pub mod transport;

pub use backoff::{BackoffPolicy, Sleeper, TokioSleeper};
pub use config::GenerationConfig;
pub use error::{
    ContractError, ExtractionFailure, FallbackReason, RecoveryAttemptRecord, RecoveryFailure,
    TransportError, TransportErrorKind,
};
pub use extraction::{extract, Extraction, ExtractionAttempt, Strategy};
pub use feedback::build_recovery_prompt;
pub use metrics::RunMetrics;
pub use orchestrator::{Orchestrator, Outcome, Resolution};
pub use progress::{ProgressEvent, ProgressObserver};
pub use recovery::{Recovered, RecoveryIssuer};
pub use request::{GenerationRequest, PromptSource};
pub use schema::{RootShape, SchemaDescriptor};
pub use transport::{RawResponse, Transport};

/// Common traits and types for ergonomic usage of the resilience layer.
pub mod prelude {
    pub use crate::{
        BackoffPolicy, ContractError, FallbackReason, GenerationConfig, GenerationRequest,
        Orchestrator, Outcome, ProgressEvent, ProgressObserver, PromptSource, RawResponse,
        Resolution, SchemaDescriptor, Sleeper, Transport, TransportError,
    };
}
