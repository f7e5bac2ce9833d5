//! Common imports for metanovel usage.
//!
//! ```
//! use metanovel::prelude::*;
//! ```

// Facade types
pub use crate::config::Settings;
pub use crate::errors::Error;
pub use crate::generator::Generator;
pub use crate::rig_transport::RigTransport;

// Request, outcome and transport types
pub use metanovel_resilience::prelude::*;

// Project and template types
pub use metanovel_templates::{ActiveProject, ProjectContext, ProjectId, TemplateSet};

// Re-export the Rig trait RigTransport builds on
pub use rig::completion::Prompt;
