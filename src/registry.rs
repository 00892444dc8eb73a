//! Plugin registry (§4.5, C5): a two-level `stage -> name -> plugin` map.
//!
//! Backed by `parking_lot::Mutex` per §4.5's "a simple lock ... suffices"
//! guidance — registration is rare relative to lookup, so a single lock
//! around the nested map needs no finer-grained scheme.

use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::plugins::{Embedder, Llm, Loader, Reranker, Retriever};

/// The five plugin stages a pipeline composes (§2, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Loader,
    Embedder,
    Retriever,
    Reranker,
    Llm,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Loader => "loader",
            Stage::Embedder => "embedder",
            Stage::Retriever => "retriever",
            Stage::Reranker => "reranker",
            Stage::Llm => "llm",
        };
        write!(f, "{s}")
    }
}

/// A registered plugin, type-erased into one of the five stage contracts.
/// Using a closed enum of concrete trait-object variants (rather than
/// `Box<dyn Any>` plus downcasting) keeps lookups infallible once the
/// stage matches — there's no second failure mode of "right stage, wrong
/// concrete type" to handle at call sites.
#[derive(Clone)]
pub enum PluginInstance {
    Loader(Arc<dyn Loader>),
    Embedder(Arc<dyn Embedder>),
    Retriever(Arc<dyn Retriever>),
    Reranker(Arc<dyn Reranker>),
    Llm(Arc<dyn Llm>),
}

impl PluginInstance {
    pub fn stage(&self) -> Stage {
        match self {
            PluginInstance::Loader(_) => Stage::Loader,
            PluginInstance::Embedder(_) => Stage::Embedder,
            PluginInstance::Retriever(_) => Stage::Retriever,
            PluginInstance::Reranker(_) => Stage::Reranker,
            PluginInstance::Llm(_) => Stage::Llm,
        }
    }

    pub fn as_loader(&self) -> Option<Arc<dyn Loader>> {
        match self {
            PluginInstance::Loader(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_embedder(&self) -> Option<Arc<dyn Embedder>> {
        match self {
            PluginInstance::Embedder(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_retriever(&self) -> Option<Arc<dyn Retriever>> {
        match self {
            PluginInstance::Retriever(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_reranker(&self) -> Option<Arc<dyn Reranker>> {
        match self {
            PluginInstance::Reranker(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn as_llm(&self) -> Option<Arc<dyn Llm>> {
        match self {
            PluginInstance::Llm(p) => Some(p.clone()),
            _ => None,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    plugins: IndexMap<(Stage, String), PluginInstance>,
}

/// A typed registry of stage plugins. Constructable explicitly (for
/// isolated tests) or accessed as a process-wide singleton via
/// [`Registry::global`].
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide singleton (§4.5: "a singleton for ergonomic
    /// composition but must support explicit instantiation for tests").
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::default)
    }

    /// §4.5 `register`. Idempotent: re-registering the same
    /// `(stage, name)` overwrites the previous plugin.
    pub fn register(&self, name: impl Into<String>, plugin: PluginInstance) {
        let stage = plugin.stage();
        self.inner
            .lock()
            .plugins
            .insert((stage, name.into()), plugin);
    }

    /// §4.5 `get`.
    pub fn get(&self, stage: Stage, name: &str) -> Result<PluginInstance> {
        self.inner
            .lock()
            .plugins
            .get(&(stage, name.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::plugin_not_found(stage, name))
    }

    /// §4.5 `list`. `None` lists every registered name across all stages.
    pub fn list(&self, stage: Option<Stage>) -> Vec<String> {
        self.inner
            .lock()
            .plugins
            .iter()
            .filter(|((s, _), _)| stage.map_or(true, |want| *s == want))
            .map(|((_, name), _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Document;
    use async_trait::async_trait;

    struct EchoLoader;

    #[async_trait]
    impl Loader for EchoLoader {
        async fn load(&self, path: &str) -> Result<Vec<Document>> {
            Ok(vec![Document::new("doc-1", path)])
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = Registry::new();
        registry.register("echo", PluginInstance::Loader(Arc::new(EchoLoader)));
        let plugin = registry.get(Stage::Loader, "echo").unwrap();
        assert!(plugin.as_loader().is_some());
    }

    #[test]
    fn get_missing_plugin_reports_stage_and_name() {
        let registry = Registry::new();
        let err = registry.get(Stage::Embedder, "missing").unwrap_err();
        assert_eq!(err.message, "plugin not found: embedder/missing");
    }

    #[test]
    fn list_filters_by_stage() {
        let registry = Registry::new();
        registry.register("echo", PluginInstance::Loader(Arc::new(EchoLoader)));
        assert_eq!(registry.list(Some(Stage::Loader)), vec!["echo".to_string()]);
        assert!(registry.list(Some(Stage::Embedder)).is_empty());
    }

    #[test]
    fn global_singleton_is_shared() {
        Registry::global().register("shared", PluginInstance::Loader(Arc::new(EchoLoader)));
        assert!(Registry::global().get(Stage::Loader, "shared").is_ok());
    }
}
