//! Wiring of settings, templates, transport and orchestrator.

use std::sync::Arc;

use metanovel_openrouter::{OpenRouterError, OpenRouterTransport};
use metanovel_resilience::{
    Orchestrator, ProgressObserver, PromptSource, Resolution, SchemaDescriptor, Transport,
};
use metanovel_templates::{ProjectContext, ProjectId, ScopedTemplateCache, TemplateSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::Settings;
use crate::errors::Error;

/// Ready-to-use structured generation for the active project.
pub struct Generator {
    orchestrator: Orchestrator,
    cache: Arc<ScopedTemplateCache>,
    context: Arc<dyn ProjectContext>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("config", self.orchestrator.config())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Builds an OpenRouter-backed generator.
    ///
    /// Templates come from `settings.prompts_default` and the projects under
    /// `settings.home`, for whichever project `context` reports.
    pub fn from_settings(
        settings: &Settings,
        context: Arc<dyn ProjectContext>,
    ) -> Result<Self, Error> {
        let openrouter = settings
            .openrouter
            .clone()
            .ok_or(OpenRouterError::MissingApiKey)?;
        let transport = OpenRouterTransport::new(openrouter)?;
        info!(model = %transport.config().model, "Using OpenRouter transport");
        Ok(Self::with_transport(settings, Arc::new(transport), context))
    }

    /// Builds a generator over any transport.
    #[must_use]
    pub fn with_transport(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        context: Arc<dyn ProjectContext>,
    ) -> Self {
        let cache = Arc::new(ScopedTemplateCache::new(Arc::new(settings.template_source())));
        let orchestrator = Orchestrator::from_shared(transport)
            .with_config(settings.generation.clone())
            .with_templates(Arc::clone(&cache), Arc::clone(&context))
            .with_ambient_vars(settings.generation_vars.clone());
        Self {
            orchestrator,
            cache,
            context,
        }
    }

    /// Reports retries, reformat requests and fallbacks to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.orchestrator = self.orchestrator.with_observer(observer);
        self
    }

    /// The underlying orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Resolves a prompt to a value matching `schema`, or to `default`.
    pub async fn generate(
        &self,
        task_id: &str,
        prompt: impl Into<PromptSource> + Send,
        schema: SchemaDescriptor,
        default: Value,
    ) -> Result<Resolution, Error> {
        let request = self.orchestrator.request(task_id, prompt, schema);
        Ok(self.orchestrator.run(&request, default).await?)
    }

    /// Typed variant of [`generate`](Self::generate); the schema is derived from `T`.
    pub async fn generate_typed<T>(
        &self,
        task_id: &str,
        prompt: impl Into<PromptSource> + Send,
        default: T,
    ) -> Result<Resolution<T>, Error>
    where
        T: Serialize + DeserializeOwned + schemars::JsonSchema,
    {
        let schema = SchemaDescriptor::for_type::<T>()?;
        let request = self.orchestrator.request(task_id, prompt, schema);
        Ok(self.orchestrator.run_typed(&request, default).await?)
    }

    /// Merged templates of the active project.
    pub fn templates(&self) -> Result<Arc<TemplateSet>, Error> {
        Ok(self.cache.resolve_current(self.context.as_ref())?)
    }

    /// Merged templates of `project`, which becomes the cached project.
    pub fn templates_for(&self, project: &ProjectId) -> Result<Arc<TemplateSet>, Error> {
        Ok(self.cache.resolve(project)?)
    }

    /// Drops cached templates after the active project changed to `project`.
    pub fn project_switched(&self, project: &ProjectId) {
        self.cache.switch_project(project);
    }

    /// Drops cached templates after prompt files were edited.
    pub fn reload_templates(&self) {
        self.cache.invalidate();
    }
}
