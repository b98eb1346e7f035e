//! Plugin contract: the lifecycle trait, the context handed to plugins, and
//! the factory registry that resolves manifest entry points.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use ad_domain::capability::Capabilities;
use ad_domain::error::{AgentError, Result};
use ad_domain::handler::CommandHandler;
use ad_shell::Shell;

use crate::bus::EventBus;

/// Lifecycle state of a loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Loaded,
    Initialized,
    Started,
    Stopped,
    Error,
}

/// What a plugin sees of the agent.
#[derive(Clone)]
pub struct PluginContext {
    pub agent_version: String,
    pub capabilities: Capabilities,
    /// Private directory for this plugin's files.
    pub data_dir: PathBuf,
    /// Shell access with the agent's privileges.
    pub shell: Arc<dyn Shell>,
    /// The in-process event bus (not the transport event channel).
    pub events: EventBus,
}

/// Implemented by a plugin bundle's entry type.
///
/// Lifecycle calls arrive in order: `on_init`, `on_start`, `on_stop`,
/// `on_destroy`. Handlers are registered between init and start and
/// unregistered before stop.
#[async_trait::async_trait]
pub trait AgentPlugin: Send + Sync + 'static {
    /// The command handlers this plugin contributes while STARTED.
    fn handlers(&self) -> Vec<Arc<dyn CommandHandler>>;

    async fn on_init(&self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }

    async fn on_destroy(&self) -> Result<()> {
        Ok(())
    }
}

type Factory = Box<dyn Fn() -> Arc<dyn AgentPlugin> + Send + Sync>;

/// Resolves manifest `entry_point` names to plugin constructors.
///
/// This is the static-linking stand-in for a dynamic loader: bundles are
/// enabled by configuration, entries are compiled in.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn AgentPlugin> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(entry_point.into(), Box::new(factory));
    }

    /// Instantiate the entry for `entry_point`.
    pub fn instantiate(&self, entry_point: &str) -> Result<Arc<dyn AgentPlugin>> {
        let factories = self.factories.read();
        let factory = factories.get(entry_point).ok_or_else(|| {
            AgentError::new(
                ad_domain::error::codes::PLUGIN_LOAD_FAILED,
                format!("no registered entry point '{entry_point}'"),
            )
        })?;
        Ok(factory())
    }

    pub fn entry_points(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait::async_trait]
    impl AgentPlugin for Nothing {
        fn handlers(&self) -> Vec<Arc<dyn CommandHandler>> {
            Vec::new()
        }
    }

    #[test]
    fn registry_resolves_registered_entries() {
        let reg = FactoryRegistry::new();
        reg.register("nothing", || Arc::new(Nothing));
        assert!(reg.instantiate("nothing").is_ok());
        assert_eq!(reg.entry_points(), vec!["nothing"]);

        let err = match reg.instantiate("missing") {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.code, ad_domain::error::codes::PLUGIN_LOAD_FAILED);
    }
}
