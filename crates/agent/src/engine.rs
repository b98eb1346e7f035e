//! The agent engine: the process-wide coordinator owning transport,
//! router, resolver, plugin manager, and perf engine for its lifetime.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use ad_domain::config::AgentConfig;
use ad_domain::error::Result;
use ad_perf::PerfEngine;
use ad_plugins::{EventBus, FactoryRegistry};
use ad_protocol::envelope::Envelope;

use crate::handlers::HandlerDeps;
use crate::plugins::PluginManager;
use crate::router::CommandRouter;
use crate::strategy::{
    AccessibilityBridge, AccessibilityHierarchy, AccessibilityInput, StrategySet,
};
use crate::transport::{BoundPorts, TransportServer};

pub struct AgentEngine {
    pub(crate) config: AgentConfig,
    pub(crate) router: Arc<CommandRouter>,
    pub(crate) strategies: Arc<StrategySet>,
    pub(crate) perf: Arc<PerfEngine>,
    pub(crate) plugins: Arc<PluginManager>,
    pub(crate) factories: Arc<FactoryRegistry>,
    pub(crate) bus: EventBus,
    pub(crate) deps: Arc<HandlerDeps>,
    pub(crate) transport: Arc<TransportServer>,
    pub(crate) shutdown: CancellationToken,
    bound: parking_lot::Mutex<Option<BoundPorts>>,
}

impl AgentEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: AgentConfig,
        router: Arc<CommandRouter>,
        strategies: Arc<StrategySet>,
        perf: Arc<PerfEngine>,
        plugins: Arc<PluginManager>,
        factories: Arc<FactoryRegistry>,
        bus: EventBus,
        deps: Arc<HandlerDeps>,
        transport: Arc<TransportServer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            router,
            strategies,
            perf,
            plugins,
            factories,
            bus,
            deps,
            transport,
            shutdown,
            bound: parking_lot::Mutex::new(None),
        }
    }

    /// Bring the agent up: transport first, then the background bridges,
    /// then plugins from the bundle directory.
    pub async fn start(&self) -> Result<BoundPorts> {
        let ports = self.transport.start().await?;
        *self.bound.lock() = Some(ports);

        self.spawn_perf_forwarder();
        self.spawn_toast_listener();

        let loaded = self.plugins.load_all(&self.config.plugins_dir).await;
        tracing::info!(
            plugins = loaded,
            methods = self.router.methods().len(),
            "agent engine started"
        );
        Ok(ports)
    }

    /// Orderly teardown: stop transport, unload plugins, cancel the
    /// supervisor scope. Perf sessions end at their next tick.
    pub async fn stop(&self) {
        self.transport.stop().await;
        self.plugins.unload_all().await;
        self.perf.stop_all();
        self.shutdown.cancel();
        tracing::info!("agent engine stopped");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown.cancelled().await;
    }

    /// Bound listener addresses after a successful start.
    pub fn bound_ports(&self) -> Option<BoundPorts> {
        *self.bound.lock()
    }

    pub fn transport(&self) -> &Arc<TransportServer> {
        &self.transport
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    /// Plugin entry points register here before `start`.
    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Install the accessibility effector: registers the accessibility
    /// strategies, flips the capability flag, and exposes the clipboard.
    pub fn install_accessibility_bridge(&self, bridge: Arc<dyn AccessibilityBridge>) {
        self.strategies
            .register_input(Arc::new(AccessibilityInput::new(bridge.clone())));
        self.strategies
            .register_hierarchy(Arc::new(AccessibilityHierarchy::new(bridge.clone())));
        self.strategies.update_capabilities(|c| c.accessibility = true);
        *self.deps.bridge.write() = Some(bridge);
        tracing::info!("accessibility bridge installed");
    }

    /// Perf samples ride the transport event channel as `perf.sample`
    /// events; slow subscribers miss samples, collectors never block.
    fn spawn_perf_forwarder(&self) {
        let mut samples = self.perf.subscribe();
        let transport = self.transport.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sample = samples.recv() => match sample {
                        Ok((session_id, sample)) => {
                            let params = json!({
                                "sessionId": session_id,
                                "sample": sample,
                            });
                            transport.emit_event(Envelope::event("perf.sample", Some(params)));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "perf forwarder lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// The accessibility effector publishes toasts on the in-process bus;
    /// cache the latest for `ui.toast`.
    fn spawn_toast_listener(&self) {
        let mut sub = self.bus.subscribe(Some("ui.toast".to_string()));
        let toasts = self.deps.toasts.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = sub.recv() => match event {
                        Some(event) => {
                            if let Some(text) = event.payload.get("text").and_then(|t| t.as_str()) {
                                toasts.observe(text.to_string(), event.timestamp);
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }
}
