//! Plugin lifecycle management: LOADED → INITIALIZED → STARTED → STOPPED,
//! with ERROR as the failure sink. Handlers appear in the router only while
//! their plugin is STARTED; a failed bring-up rolls back whatever was
//! already registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use ad_domain::capability::Capabilities;
use ad_domain::error::{codes, AgentError, Result};
use ad_plugins::{
    scan_bundles, AgentPlugin, EventBus, FactoryRegistry, PluginContext, PluginManifest,
    PluginState,
};
use ad_plugins::manifest::version_at_least;
use ad_shell::Shell;

use crate::router::CommandRouter;
use crate::strategy::StrategySet;

struct PluginRecord {
    manifest: PluginManifest,
    instance: Arc<dyn AgentPlugin>,
    state: PluginState,
    registered_methods: Vec<String>,
}

pub struct PluginManager {
    router: Arc<CommandRouter>,
    strategies: Arc<StrategySet>,
    factories: Arc<FactoryRegistry>,
    shell: Arc<dyn Shell>,
    bus: EventBus,
    data_dir: PathBuf,
    agent_version: String,
    plugins: RwLock<HashMap<String, PluginRecord>>,
    /// Start order, for reverse-order unload on shutdown.
    start_order: RwLock<Vec<String>>,
    /// Serializes load/unload; lifecycle calls await under this lock.
    op_lock: Mutex<()>,
}

impl PluginManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<CommandRouter>,
        strategies: Arc<StrategySet>,
        factories: Arc<FactoryRegistry>,
        shell: Arc<dyn Shell>,
        bus: EventBus,
        data_dir: PathBuf,
        agent_version: String,
    ) -> Self {
        Self {
            router,
            strategies,
            factories,
            shell,
            bus,
            data_dir,
            agent_version,
            plugins: RwLock::new(HashMap::new()),
            start_order: RwLock::new(Vec::new()),
            op_lock: Mutex::new(()),
        }
    }

    /// Ids of plugins currently STARTED, in start order.
    pub fn started_ids(&self) -> Vec<String> {
        let plugins = self.plugins.read();
        self.start_order
            .read()
            .iter()
            .filter(|id| {
                plugins
                    .get(*id)
                    .is_some_and(|r| r.state == PluginState::Started)
            })
            .cloned()
            .collect()
    }

    /// `(id, version, display name, state)` for every known plugin.
    pub fn list(&self) -> Vec<(String, String, String, PluginState)> {
        let mut out: Vec<_> = self
            .plugins
            .read()
            .values()
            .map(|r| {
                (
                    r.manifest.id.clone(),
                    r.manifest.version.clone(),
                    r.manifest.display_name.clone(),
                    r.state,
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Scan the plugins directory and load every bundle whose dependencies
    /// can be satisfied. Load order is resolved by repeated passes, so
    /// sibling dependencies work regardless of scan order.
    pub async fn load_all(&self, plugins_dir: &Path) -> usize {
        let outcome = scan_bundles(plugins_dir);
        let mut pending = outcome.bundles;
        let mut loaded = 0usize;

        loop {
            let before = pending.len();
            let mut still_pending = Vec::new();
            for bundle in pending {
                let deps_ready = {
                    let started = self.started_ids();
                    bundle
                        .manifest
                        .dependencies
                        .iter()
                        .all(|d| started.contains(d))
                };
                if !deps_ready {
                    still_pending.push(bundle);
                    continue;
                }
                match self.load(bundle.manifest.clone()).await {
                    Ok(()) => loaded += 1,
                    Err(e) => {
                        tracing::warn!(
                            plugin_id = %bundle.manifest.id,
                            code = e.code,
                            error = %e.message,
                            "plugin failed to load"
                        );
                    }
                }
            }
            pending = still_pending;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        for bundle in &pending {
            tracing::warn!(
                plugin_id = %bundle.manifest.id,
                dependencies = ?bundle.manifest.dependencies,
                "plugin skipped: dependencies never started"
            );
        }
        loaded
    }

    fn context_for(&self, manifest: &PluginManifest) -> PluginContext {
        PluginContext {
            agent_version: self.agent_version.clone(),
            capabilities: self.strategies.capabilities(),
            data_dir: self.data_dir.join(&manifest.id),
            shell: self.shell.clone(),
            events: self.bus.clone(),
        }
    }

    fn check_requirements(&self, manifest: &PluginManifest) -> Result<()> {
        if let Some(min) = &manifest.min_agent_version {
            if !version_at_least(&self.agent_version, min) {
                return Err(AgentError::new(
                    codes::PLUGIN_LOAD_FAILED,
                    format!(
                        "{} requires agent {min}, this is {}",
                        manifest.id, self.agent_version
                    ),
                ));
            }
        }
        let caps: Capabilities = self.strategies.capabilities();
        for required in &manifest.required_capabilities {
            let present = match required.as_str() {
                "privileged_shell" => caps.privileged_shell,
                "accessibility" => caps.accessibility,
                other => {
                    return Err(AgentError::new(
                        codes::PLUGIN_INIT_FAILED,
                        format!("{} requires unknown capability {other}", manifest.id),
                    ))
                }
            };
            if !present {
                return Err(AgentError::new(
                    codes::PLUGIN_INIT_FAILED,
                    format!("{} requires capability {required}", manifest.id),
                ));
            }
        }
        let started = self.started_ids();
        for dep in &manifest.dependencies {
            if !started.contains(dep) {
                return Err(AgentError::new(
                    codes::PLUGIN_DEPENDENCY_MISSING,
                    format!("{} depends on {dep}, which is not started", manifest.id),
                ));
            }
        }
        Ok(())
    }

    /// Load one plugin through its full lifecycle to STARTED.
    pub async fn load(&self, manifest: PluginManifest) -> Result<()> {
        let _guard = self.op_lock.lock().await;

        if self.plugins.read().contains_key(&manifest.id) {
            return Err(AgentError::new(
                codes::PLUGIN_LOAD_FAILED,
                format!("plugin {} is already loaded", manifest.id),
            ));
        }
        self.check_requirements(&manifest)?;

        let instance = self.factories.instantiate(&manifest.entry_point)?;
        let id = manifest.id.clone();
        self.plugins.write().insert(
            id.clone(),
            PluginRecord {
                manifest: manifest.clone(),
                instance: instance.clone(),
                state: PluginState::Loaded,
                registered_methods: Vec::new(),
            },
        );

        // Init.
        let ctx = self.context_for(&manifest);
        if let Err(e) = std::fs::create_dir_all(&ctx.data_dir) {
            tracing::warn!(plugin_id = %id, error = %e, "could not create plugin data dir");
        }
        if let Err(e) = instance.on_init(&ctx).await {
            self.mark_error(&id);
            return Err(AgentError::new(
                codes::PLUGIN_INIT_FAILED,
                format!("{id} on_init failed: {}", e.message),
            ));
        }
        self.set_state(&id, PluginState::Initialized);

        // Register handlers, tracking what went in for rollback.
        let mut registered = Vec::new();
        for handler in instance.handlers() {
            let method = handler.method().to_string();
            self.router.register(handler);
            registered.push(method);
        }

        // Start.
        if let Err(e) = instance.on_start().await {
            for method in &registered {
                self.router.unregister(method);
            }
            self.mark_error(&id);
            return Err(AgentError::new(
                codes::PLUGIN_INIT_FAILED,
                format!("{id} on_start failed: {}", e.message),
            ));
        }

        {
            let mut plugins = self.plugins.write();
            if let Some(record) = plugins.get_mut(&id) {
                record.registered_methods = registered;
                record.state = PluginState::Started;
            }
        }
        self.start_order.write().push(id.clone());
        tracing::info!(
            plugin_id = %id,
            version = %manifest.version,
            "plugin started"
        );
        Ok(())
    }

    /// Unload one plugin: unregister, stop, destroy, drop.
    pub async fn unload(&self, plugin_id: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.unload_locked(plugin_id).await
    }

    async fn unload_locked(&self, plugin_id: &str) -> Result<()> {
        let record = self.plugins.write().remove(plugin_id).ok_or_else(|| {
            AgentError::new(
                codes::PLUGIN_LOAD_FAILED,
                format!("plugin {plugin_id} is not loaded"),
            )
        })?;
        for method in &record.registered_methods {
            self.router.unregister(method);
        }
        if record.state == PluginState::Started {
            if let Err(e) = record.instance.on_stop().await {
                tracing::warn!(plugin_id = %plugin_id, error = %e.message, "on_stop failed");
            }
        }
        if let Err(e) = record.instance.on_destroy().await {
            tracing::warn!(plugin_id = %plugin_id, error = %e.message, "on_destroy failed");
        }
        self.start_order.write().retain(|id| id != plugin_id);
        tracing::info!(plugin_id = %plugin_id, "plugin unloaded");
        Ok(())
    }

    /// Teardown: unload every plugin in reverse start order.
    pub async fn unload_all(&self) {
        let _guard = self.op_lock.lock().await;
        let order: Vec<String> = {
            let order = self.start_order.read();
            order.iter().rev().cloned().collect()
        };
        for id in order {
            if let Err(e) = self.unload_locked(&id).await {
                tracing::warn!(plugin_id = %id, error = %e.message, "unload failed");
            }
        }
        // Drop anything left in a non-started state too.
        self.plugins.write().clear();
    }

    fn set_state(&self, id: &str, state: PluginState) {
        if let Some(record) = self.plugins.write().get_mut(id) {
            record.state = state;
        }
    }

    fn mark_error(&self, id: &str) {
        self.set_state(id, PluginState::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use ad_domain::handler::{CommandHandler, RequestContext};
    use ad_shell::SystemShell;

    struct PingHandler;

    #[async_trait::async_trait]
    impl CommandHandler for PingHandler {
        fn method(&self) -> &str {
            "custom.ping"
        }

        async fn handle(&self, _p: Value, _c: RequestContext) -> Result<Value> {
            Ok(json!({"pong": true}))
        }
    }

    struct PingPlugin;

    #[async_trait::async_trait]
    impl AgentPlugin for PingPlugin {
        fn handlers(&self) -> Vec<Arc<dyn CommandHandler>> {
            vec![Arc::new(PingHandler)]
        }
    }

    struct FailingPlugin {
        fail_on_start: bool,
    }

    #[async_trait::async_trait]
    impl AgentPlugin for FailingPlugin {
        fn handlers(&self) -> Vec<Arc<dyn CommandHandler>> {
            vec![Arc::new(PingHandler)]
        }

        async fn on_init(&self, _ctx: &PluginContext) -> Result<()> {
            if self.fail_on_start {
                Ok(())
            } else {
                Err(AgentError::internal("init refused"))
            }
        }

        async fn on_start(&self) -> Result<()> {
            if self.fail_on_start {
                Err(AgentError::internal("start refused"))
            } else {
                Ok(())
            }
        }
    }

    fn manifest(id: &str, entry: &str, deps: &[&str]) -> PluginManifest {
        PluginManifest {
            id: id.into(),
            version: "1.0.0".into(),
            display_name: id.into(),
            entry_point: entry.into(),
            min_agent_version: None,
            required_capabilities: Vec::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn manager() -> (Arc<CommandRouter>, PluginManager, tempfile::TempDir) {
        let router = Arc::new(CommandRouter::new());
        let strategies = Arc::new(StrategySet::new(Capabilities::default()));
        let factories = Arc::new(FactoryRegistry::new());
        factories.register("ping", || Arc::new(PingPlugin));
        factories.register("fail-init", || {
            Arc::new(FailingPlugin {
                fail_on_start: false,
            })
        });
        factories.register("fail-start", || {
            Arc::new(FailingPlugin {
                fail_on_start: true,
            })
        });
        let tmp = tempfile::tempdir().unwrap();
        let mgr = PluginManager::new(
            router.clone(),
            strategies,
            factories,
            Arc::new(SystemShell::new()),
            EventBus::new(),
            tmp.path().to_path_buf(),
            "0.3.0".into(),
        );
        (router, mgr, tmp)
    }

    #[tokio::test]
    async fn load_registers_handlers_and_unload_restores() {
        let (router, mgr, _tmp) = manager();
        assert!(!router.contains("custom.ping"));

        mgr.load(manifest("com.example.ping", "ping", &[])).await.unwrap();
        assert!(router.contains("custom.ping"));
        assert_eq!(mgr.started_ids(), vec!["com.example.ping"]);

        mgr.unload("com.example.ping").await.unwrap();
        assert!(!router.contains("custom.ping"));
        assert!(mgr.started_ids().is_empty());
    }

    #[tokio::test]
    async fn init_failure_is_error_state_without_handlers() {
        let (router, mgr, _tmp) = manager();
        let err = mgr
            .load(manifest("com.example.bad", "fail-init", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::PLUGIN_INIT_FAILED);
        assert!(!router.contains("custom.ping"));
        let listed = mgr.list();
        assert_eq!(listed[0].3, PluginState::Error);
        assert!(mgr.started_ids().is_empty());
    }

    #[tokio::test]
    async fn start_failure_rolls_back_registered_handlers() {
        let (router, mgr, _tmp) = manager();
        let err = mgr
            .load(manifest("com.example.bad", "fail-start", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::PLUGIN_INIT_FAILED);
        assert!(!router.contains("custom.ping"));
    }

    #[tokio::test]
    async fn missing_dependency_is_7002() {
        let (_router, mgr, _tmp) = manager();
        let err = mgr
            .load(manifest("com.example.child", "ping", &["com.example.base"]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::PLUGIN_DEPENDENCY_MISSING);
    }

    #[tokio::test]
    async fn duplicate_load_is_rejected() {
        let (_router, mgr, _tmp) = manager();
        mgr.load(manifest("com.example.ping", "ping", &[])).await.unwrap();
        let err = mgr
            .load(manifest("com.example.ping", "ping", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::PLUGIN_LOAD_FAILED);
    }

    #[tokio::test]
    async fn min_agent_version_gate() {
        let (_router, mgr, _tmp) = manager();
        let mut m = manifest("com.example.future", "ping", &[]);
        m.min_agent_version = Some("99.0.0".into());
        let err = mgr.load(m).await.unwrap_err();
        assert_eq!(err.code, codes::PLUGIN_LOAD_FAILED);
    }

    #[tokio::test]
    async fn unload_all_drops_every_plugin() {
        let (_router, mgr, _tmp) = manager();
        mgr.load(manifest("com.example.base", "ping", &[])).await.unwrap();
        // Ping handlers collide on method name, but registration is
        // last-writer-wins; the ordering property is what matters here.
        mgr.load(manifest("com.example.child", "ping", &["com.example.base"]))
            .await
            .unwrap();
        assert_eq!(
            mgr.started_ids(),
            vec!["com.example.base", "com.example.child"]
        );
        mgr.unload_all().await;
        assert!(mgr.started_ids().is_empty());
        assert!(mgr.list().is_empty());
    }
}
