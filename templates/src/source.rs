//! Where template maps come from.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::TemplateError;
use crate::project::ProjectId;
use crate::set::TemplateMap;

/// File name of a project's override templates.
pub const PROJECT_PROMPTS_FILE: &str = "prompts.json";

/// Loader for global defaults and per-project overrides.
pub trait TemplateSource: Send + Sync {
    /// Loads the global default templates.
    fn load_defaults(&self) -> Result<TemplateMap, TemplateError>;

    /// Loads the overrides for `project`, or `None` when it has none.
    ///
    /// Implementations must only ever consult `project`'s own storage.
    fn load_overrides(&self, project: &ProjectId) -> Result<Option<TemplateMap>, TemplateError>;
}

/// Filesystem layout: one defaults file plus `<projects_root>/<project>/prompts.json`.
#[derive(Debug, Clone)]
pub struct FsTemplateSource {
    defaults_path: PathBuf,
    projects_root: PathBuf,
}

impl FsTemplateSource {
    /// Creates a source reading defaults from `defaults_path` and project
    /// directories under `projects_root`.
    #[must_use]
    pub fn new(defaults_path: impl Into<PathBuf>, projects_root: impl Into<PathBuf>) -> Self {
        Self {
            defaults_path: defaults_path.into(),
            projects_root: projects_root.into(),
        }
    }

    /// Path of the override file for `project`.
    #[must_use]
    pub fn project_prompts_path(&self, project: &ProjectId) -> PathBuf {
        self.projects_root
            .join(project.as_str())
            .join(PROJECT_PROMPTS_FILE)
    }

    /// Path of the defaults file.
    #[must_use]
    pub fn defaults_path(&self) -> &Path {
        &self.defaults_path
    }
}

impl TemplateSource for FsTemplateSource {
    fn load_defaults(&self) -> Result<TemplateMap, TemplateError> {
        if let Some(map) = read_template_file(&self.defaults_path)? {
            Ok(map)
        } else {
            tracing::warn!(
                path = %self.defaults_path.display(),
                "Default prompts file not found, starting with no default templates"
            );
            Ok(TemplateMap::new())
        }
    }

    fn load_overrides(&self, project: &ProjectId) -> Result<Option<TemplateMap>, TemplateError> {
        let path = self.project_prompts_path(project);
        let overrides = read_template_file(&path)?;
        if overrides.is_none() {
            tracing::debug!(project = %project, path = %path.display(), "Project has no prompt overrides");
        }
        Ok(overrides)
    }
}

/// Reads a template map, treating a missing file as `None`.
fn read_template_file(path: &Path) -> Result<Option<TemplateMap>, TemplateError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(TemplateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| TemplateError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
