//! Project-scoped prompt templates.
//!
//! Every project may override any of the global default prompt templates. This
//! crate resolves the merged set for the active project and caches it until the
//! project changes:
//!
//! - [`ScopedTemplateCache`] - One-generation cache swapped atomically on project switch
//! - [`TemplateSet`] - Merged templates with `{placeholder}` rendering
//! - [`TemplateSource`] / [`FsTemplateSource`] - Where defaults and overrides are read from
//! - [`ProjectId`] / [`ProjectContext`] - Project identity and the active-project accessor

pub mod cache;
pub mod error;
pub mod project;
pub mod set;
pub mod source;

pub use cache::ScopedTemplateCache;
pub use error::TemplateError;
pub use project::{ActiveProject, ProjectContext, ProjectId};
pub use set::{render_placeholders, PromptTemplate, TemplateMap, TemplateSet};
pub use source::{FsTemplateSource, TemplateSource, PROJECT_PROMPTS_FILE};
