//! Project identity and the active-project accessor.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::TemplateError;

/// Characters that cannot appear in a project directory name.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Identifier of a project; doubles as its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(String);

impl ProjectId {
    /// Validates and wraps a project name.
    ///
    /// Surrounding whitespace is trimmed.
    ///
    /// # Examples
    ///
    /// ```
    /// use metanovel_templates::ProjectId;
    ///
    /// assert!(ProjectId::new("my-novel").is_ok());
    /// assert!(ProjectId::new("../etc").is_err());
    /// ```
    pub fn new(name: impl AsRef<str>) -> Result<Self, TemplateError> {
        let raw = name.as_ref();
        let name = raw.trim();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(FORBIDDEN)
            || name.chars().any(char::is_control)
        {
            return Err(TemplateError::InvalidProjectId(raw.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// The project name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read access to whichever project is currently active.
pub trait ProjectContext: Send + Sync {
    /// Returns the active project's identifier.
    fn current_project_id(&self) -> ProjectId;
}

/// In-process holder of the active project.
///
/// Switching is a single atomic pointer swap, so concurrent readers see either
/// the old or the new project, never a mix.
#[derive(Debug)]
pub struct ActiveProject {
    current: ArcSwap<ProjectId>,
}

impl ActiveProject {
    /// Starts with `initial` active.
    #[must_use]
    pub fn new(initial: ProjectId) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Makes `project` the active project and returns the previous one.
    pub fn switch(&self, project: ProjectId) -> ProjectId {
        let previous = self.current.swap(Arc::new(project));
        (*previous).clone()
    }
}

impl ProjectContext for ActiveProject {
    fn current_project_id(&self) -> ProjectId {
        (**self.current.load()).clone()
    }
}

impl<T: ProjectContext + ?Sized> ProjectContext for Arc<T> {
    fn current_project_id(&self) -> ProjectId {
        (**self).current_project_id()
    }
}
