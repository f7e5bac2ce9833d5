//! Process-wide template cache keyed by the active project.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info};

use crate::error::TemplateError;
use crate::project::{ProjectContext, ProjectId};
use crate::set::TemplateSet;
use crate::source::TemplateSource;

/// One cache generation: the project it belongs to and its merged templates.
#[derive(Debug)]
struct Scoped {
    project: ProjectId,
    templates: Arc<TemplateSet>,
}

/// Caches the merged templates of exactly one project at a time.
///
/// The cached generation is replaced wholesale through an atomic pointer swap;
/// readers either see a complete generation or none, and a generation is only
/// ever returned for the project it was loaded for.
///
/// `switch_project` and `invalidate` bump an epoch counter. A load that started
/// before the bump is handed to its caller but never installed.
pub struct ScopedTemplateCache {
    source: Arc<dyn TemplateSource>,
    slot: ArcSwapOption<Scoped>,
    epoch: AtomicU64,
}

impl std::fmt::Debug for ScopedTemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTemplateCache")
            .field("cached_project", &self.cached_project())
            .finish_non_exhaustive()
    }
}

impl ScopedTemplateCache {
    /// Creates an empty cache backed by `source`.
    #[must_use]
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            slot: ArcSwapOption::empty(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns the merged templates for `project`, loading them on first access.
    ///
    /// Repeated calls for the same project without an intervening switch return
    /// the same `Arc` and do not touch the source again.
    pub fn resolve(&self, project: &ProjectId) -> Result<Arc<TemplateSet>, TemplateError> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let current = self.slot.load_full();
        if let Some(scoped) = current.as_ref().filter(|s| &s.project == project) {
            return Ok(Arc::clone(&scoped.templates));
        }

        let templates = Arc::new(self.load(project)?);
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(project = %project, "Cache invalidated during load, not installing");
            return Ok(templates);
        }
        let fresh = Arc::new(Scoped {
            project: project.clone(),
            templates: Arc::clone(&templates),
        });

        let guard = self.slot.compare_and_swap(&current, Some(Arc::clone(&fresh)));
        let previous: &Option<Arc<Scoped>> = &guard;
        if same_generation(previous.as_ref(), current.as_ref()) {
            if self.epoch.load(Ordering::Acquire) != epoch {
                // An invalidation landed between the check and the install.
                self.slot.compare_and_swap(&Some(fresh), None);
                return Ok(templates);
            }
            debug!(project = %project, templates = templates.len(), "Installed prompt templates");
            return Ok(templates);
        }

        // Lost the race. Adopt the winner when it loaded the same project so
        // every caller shares one generation.
        match previous.as_ref() {
            Some(winner) if &winner.project == project => Ok(Arc::clone(&winner.templates)),
            _ => Ok(templates),
        }
    }

    /// Resolves the templates of whichever project `context` reports as active.
    pub fn resolve_current(
        &self,
        context: &dyn ProjectContext,
    ) -> Result<Arc<TemplateSet>, TemplateError> {
        self.resolve(&context.current_project_id())
    }

    /// Drops the cached generation because `project` became active.
    ///
    /// The next `resolve` reloads from the source.
    pub fn switch_project(&self, project: &ProjectId) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let previous = self.slot.swap(None);
        info!(
            from = previous.as_ref().map(|s| s.project.as_str()),
            to = %project,
            "Project switched, prompt template cache invalidated"
        );
    }

    /// Drops the cached generation.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.slot.store(None);
    }

    /// The project whose templates are currently cached, if any.
    #[must_use]
    pub fn cached_project(&self) -> Option<ProjectId> {
        let guard = self.slot.load();
        let scoped: &Option<Arc<Scoped>> = &guard;
        scoped.as_ref().map(|s| s.project.clone())
    }

    fn load(&self, project: &ProjectId) -> Result<TemplateSet, TemplateError> {
        let defaults = self.source.load_defaults()?;
        let overrides = self.source.load_overrides(project)?.unwrap_or_default();
        debug!(
            project = %project,
            defaults = defaults.len(),
            overrides = overrides.len(),
            "Loaded prompt templates"
        );
        Ok(TemplateSet::merged(defaults, overrides))
    }
}

fn same_generation(a: Option<&Arc<Scoped>>, b: Option<&Arc<Scoped>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::{PromptTemplate, TemplateMap};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};

    struct CountingSource {
        defaults: TemplateMap,
        overrides: HashMap<String, TemplateMap>,
        loads: AtomicUsize,
    }

    impl TemplateSource for CountingSource {
        fn load_defaults(&self) -> Result<TemplateMap, TemplateError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.defaults.clone())
        }

        fn load_overrides(
            &self,
            project: &ProjectId,
        ) -> Result<Option<TemplateMap>, TemplateError> {
            Ok(self.overrides.get(project.as_str()).cloned())
        }
    }

    fn source() -> Arc<CountingSource> {
        let defaults = TemplateMap::from([("k".to_string(), PromptTemplate::new("default"))]);
        let overrides = HashMap::from([(
            "a".to_string(),
            TemplateMap::from([("k".to_string(), PromptTemplate::new("from a"))]),
        )]);
        Arc::new(CountingSource {
            defaults,
            overrides,
            loads: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let src = source();
        let cache = ScopedTemplateCache::new(src.clone());
        let a = ProjectId::new("a").unwrap();

        let first = cache.resolve(&a).unwrap();
        let second = cache.resolve(&a).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(src.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_switch_never_leaks_previous_overrides() {
        let cache = ScopedTemplateCache::new(source());
        let a = ProjectId::new("a").unwrap();
        let b = ProjectId::new("b").unwrap();

        assert_eq!(cache.resolve(&a).unwrap().get("k").unwrap().base_prompt, "from a");
        cache.switch_project(&b);
        assert_eq!(cache.cached_project(), None);
        assert_eq!(cache.resolve(&b).unwrap().get("k").unwrap().base_prompt, "default");
        assert_eq!(cache.cached_project(), Some(b));
    }

    #[test]
    fn test_resolve_other_project_without_switch_reloads() {
        let src = source();
        let cache = ScopedTemplateCache::new(src.clone());
        let a = ProjectId::new("a").unwrap();
        let b = ProjectId::new("b").unwrap();

        cache.resolve(&a).unwrap();
        let for_b = cache.resolve(&b).unwrap();

        assert_eq!(for_b.get("k").unwrap().base_prompt, "default");
        assert_eq!(src.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let src = source();
        let cache = ScopedTemplateCache::new(src.clone());
        let a = ProjectId::new("a").unwrap();

        let first = cache.resolve(&a).unwrap();
        cache.invalidate();
        let second = cache.resolve(&a).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        assert_eq!(src.loads.load(Ordering::SeqCst), 2);
    }

    /// Invalidates its own cache while serving the first load, then bumps its
    /// content version, as an edit to the prompts file would.
    struct SelfInvalidatingSource {
        cache: OnceLock<Weak<ScopedTemplateCache>>,
        loads: AtomicUsize,
    }

    impl TemplateSource for SelfInvalidatingSource {
        fn load_defaults(&self) -> Result<TemplateMap, TemplateError> {
            let version = self.loads.fetch_add(1, Ordering::SeqCst);
            if version == 0 {
                if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
                    cache.invalidate();
                }
            }
            Ok(TemplateMap::from([(
                "k".to_string(),
                PromptTemplate::new(format!("v{version}")),
            )]))
        }

        fn load_overrides(&self, _: &ProjectId) -> Result<Option<TemplateMap>, TemplateError> {
            Ok(None)
        }
    }

    #[test]
    fn test_invalidate_during_load_is_not_lost() {
        let src = Arc::new(SelfInvalidatingSource {
            cache: OnceLock::new(),
            loads: AtomicUsize::new(0),
        });
        let cache = Arc::new(ScopedTemplateCache::new(src.clone()));
        src.cache.set(Arc::downgrade(&cache)).unwrap();
        let a = ProjectId::new("a").unwrap();

        let first = cache.resolve(&a).unwrap();
        assert_eq!(first.get("k").unwrap().base_prompt, "v0");
        assert_eq!(cache.cached_project(), None);

        let second = cache.resolve(&a).unwrap();
        assert_eq!(second.get("k").unwrap().base_prompt, "v1");
        assert!(Arc::ptr_eq(&second, &cache.resolve(&a).unwrap()));
        assert_eq!(src.loads.load(Ordering::SeqCst), 2);
    }
}
