//! Subsystem bring-up: validate config, detect capabilities, register the
//! built-in strategies and handlers, and return a fully wired engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use ad_domain::capability::Capabilities;
use ad_domain::config::{AgentConfig, ConfigSeverity};
use ad_perf::PerfEngine;
use ad_plugins::{EventBus, FactoryRegistry};
use ad_shell::{probe_privileged, Shell, SystemShell};

use crate::engine::AgentEngine;
use crate::handlers::{register_builtins, HandlerDeps, ToastCache};
use crate::plugins::PluginManager;
use crate::router::CommandRouter;
use crate::settings::RuntimeSettings;
use crate::strategy::{ShellCapture, ShellHierarchy, ShellInput, StrategySet};
use crate::transport::auth::Authenticator;
use crate::transport::{TransportConfig, TransportServer};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Validate the config, probe the device, and wire every subsystem.
pub async fn build_engine(config: AgentConfig) -> anyhow::Result<Arc<AgentEngine>> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if AgentConfig::has_errors(&issues) {
        anyhow::bail!("config validation failed");
    }

    // ── Capability detection ─────────────────────────────────────────
    let shell: Arc<dyn Shell> = Arc::new(SystemShell::new());
    let privileged = probe_privileged(shell.as_ref()).await;
    let api_level = shell
        .run("getprop ro.build.version.sdk", false, Duration::from_secs(3))
        .await
        .ok()
        .filter(|o| o.success())
        .and_then(|o| o.stdout.trim().parse().ok())
        .unwrap_or(0);
    let caps = Capabilities {
        privileged_shell: privileged,
        accessibility: false,
        platform_api_level: api_level,
    };
    tracing::info!(
        privileged_shell = caps.privileged_shell,
        platform_api_level = caps.platform_api_level,
        "capabilities detected"
    );

    // ── Strategies ───────────────────────────────────────────────────
    let strategies = Arc::new(StrategySet::new(caps));
    strategies.register_input(Arc::new(ShellInput::new(shell.clone(), true)));
    strategies.register_capture(Arc::new(ShellCapture::new(shell.clone(), true)));
    strategies.register_hierarchy(Arc::new(ShellHierarchy::new(shell.clone())));
    tracing::info!("built-in strategies registered");

    // ── Core services ────────────────────────────────────────────────
    let router = Arc::new(CommandRouter::new());
    let bus = EventBus::new();
    let perf = Arc::new(PerfEngine::new(shell.clone()));
    let settings = Arc::new(RuntimeSettings::new());
    let shutdown = CancellationToken::new();

    // ── Plugins ──────────────────────────────────────────────────────
    let factories = Arc::new(FactoryRegistry::new());
    let plugins = Arc::new(PluginManager::new(
        router.clone(),
        strategies.clone(),
        factories.clone(),
        shell.clone(),
        bus.clone(),
        config.data_dir.clone(),
        AGENT_VERSION.to_string(),
    ));
    tracing::info!(dir = %config.plugins_dir.display(), "plugin manager ready");

    // ── Transport ────────────────────────────────────────────────────
    let auth = Arc::new(Authenticator::new(config.auth_token.clone()));
    if config.auth_token.is_some() {
        tracing::info!("bearer-token authentication enabled");
    } else {
        tracing::info!("no auth token configured, admitting all clients");
    }
    let transport = Arc::new(TransportServer::new(
        TransportConfig::from(&config),
        auth,
        router.clone(),
    ));

    // ── Handlers ─────────────────────────────────────────────────────
    let deps = Arc::new(HandlerDeps {
        shell,
        strategies: strategies.clone(),
        perf: perf.clone(),
        router: router.clone(),
        plugins: plugins.clone(),
        settings,
        bus: bus.clone(),
        toasts: Arc::new(ToastCache::default()),
        started: Instant::now(),
        shutdown: shutdown.clone(),
        bridge: parking_lot::RwLock::new(None),
        agent_version: AGENT_VERSION.to_string(),
        session_count: Box::new({
            let transport = transport.clone();
            move || transport.session_count()
        }),
    });
    register_builtins(&deps);

    Ok(Arc::new(AgentEngine::new(
        config, router, strategies, perf, plugins, factories, bus, deps, transport, shutdown,
    )))
}
