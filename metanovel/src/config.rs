//! Environment-driven settings.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use metanovel_openrouter::{OpenRouterConfig, API_KEY_ENV_VAR};
use metanovel_resilience::{BackoffPolicy, GenerationConfig};
use metanovel_templates::FsTemplateSource;

use crate::errors::Error;

/// Overrides the application data directory.
pub const HOME_ENV_VAR: &str = "METANOVEL_HOME";
/// Overrides the location of the default prompts file.
pub const PROMPTS_DEFAULT_ENV_VAR: &str = "METANOVEL_PROMPTS_DEFAULT";
/// Default prompts file, relative to the working directory.
pub const DEFAULT_PROMPTS_FILE: &str = "prompts.default.json";

/// Length hints every template may reference without the caller binding them.
pub const DEFAULT_GENERATION_VARS: &[(&str, &str)] = &[
    ("theme_paragraph_length", "200字左右"),
    ("character_description_length", "150-200字左右"),
    ("location_description_length", "150-200字左右"),
    ("item_description_length", "150-200字左右"),
    ("story_outline_length", "500-800字左右"),
    ("chapter_outline_length", "800-1200字左右"),
    ("chapter_summary_length", "300-500字左右"),
    ("novel_chapter_length", "2000-4000字左右"),
    ("novel_critique_length", "200-300字左右"),
];

/// Everything needed to build a [`Generator`](crate::Generator).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Retry, recovery and timeout behaviour.
    pub generation: GenerationConfig,
    /// OpenRouter connection; `None` when no API key is configured.
    pub openrouter: Option<OpenRouterConfig>,
    /// Application data directory.
    pub home: PathBuf,
    /// Global default prompt templates.
    pub prompts_default: PathBuf,
    /// Variables available to every template; request variables override them.
    pub generation_vars: BTreeMap<String, String>,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    ///
    /// Unset or blank variables keep their defaults; values that do not parse
    /// are a [`Error::Config`] naming the variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = GenerationConfig::default();
        let backoff = BackoffPolicy::default()
            .with_base(seconds(&lookup, "RETRY_DELAY", defaults.backoff.base)?)
            .with_cap(seconds(&lookup, "MAX_RETRY_DELAY", defaults.backoff.cap)?)
            .with_multiplier(parsed(&lookup, "BACKOFF_FACTOR", defaults.backoff.multiplier)?)
            .with_jitter_fraction(parsed(
                &lookup,
                "JITTER_RANGE",
                defaults.backoff.jitter_fraction,
            )?);

        let generation = defaults
            .clone()
            .with_max_transport_attempts(parsed(
                &lookup,
                "RETRY_MAX_ATTEMPTS",
                defaults.max_transport_attempts,
            )?)
            .with_recovery_budget(parsed(
                &lookup,
                "RECOVERY_MAX_ATTEMPTS",
                defaults.recovery_budget,
            )?)
            .with_request_timeout(seconds(&lookup, "REQUEST_TIMEOUT", defaults.request_timeout)?)
            .with_backoff(backoff);
        generation
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let openrouter = if lookup(API_KEY_ENV_VAR).is_some() {
            Some(OpenRouterConfig::from_lookup(&lookup)?)
        } else {
            None
        };

        let home = match lookup(HOME_ENV_VAR) {
            Some(path) => PathBuf::from(path.trim()),
            None => default_home()?,
        };
        let prompts_default = lookup(PROMPTS_DEFAULT_ENV_VAR)
            .map_or_else(|| PathBuf::from(DEFAULT_PROMPTS_FILE), |p| PathBuf::from(p.trim()));

        Ok(Self {
            generation,
            openrouter,
            home,
            prompts_default,
            generation_vars: default_generation_vars(),
        })
    }

    /// Directory holding one subdirectory per project.
    #[must_use]
    pub fn projects_root(&self) -> PathBuf {
        self.home.join("projects")
    }

    /// Adds or replaces a variable available to every template.
    #[must_use]
    pub fn with_generation_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.generation_vars.insert(name.into(), value.into());
        self
    }

    /// Template loader for the defaults file and the projects directory.
    #[must_use]
    pub fn template_source(&self) -> FsTemplateSource {
        FsTemplateSource::new(&self.prompts_default, self.projects_root())
    }
}

fn default_generation_vars() -> BTreeMap<String, String> {
    DEFAULT_GENERATION_VARS
        .iter()
        .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
        .collect()
}

/// `~/.metanovel` on Linux, the platform's local data directory elsewhere.
fn default_home() -> Result<PathBuf, Error> {
    let dir = if cfg!(target_os = "linux") {
        dirs::home_dir().map(|home| home.join(".metanovel"))
    } else {
        dirs::data_local_dir().map(|data| data.join("MetaNovel"))
    };
    dir.ok_or_else(|| {
        Error::Config(format!(
            "could not determine the data directory; set {HOME_ENV_VAR}"
        ))
    })
}

fn parsed<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, Error> {
    lookup(name).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: '{raw}'")))
    })
}

fn seconds(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, Error> {
    let secs: f64 = parsed(lookup, name, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("{name} must be a non-negative number of seconds, got {secs}")))
}
