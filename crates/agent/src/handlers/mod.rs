//! Built-in command handlers, one module per method family.

pub mod app;
pub mod device;
pub mod params;
pub mod perf;
pub mod system;
pub mod ui;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use ad_perf::PerfEngine;
use ad_plugins::EventBus;
use ad_shell::Shell;

use crate::plugins::PluginManager;
use crate::router::CommandRouter;
use crate::settings::RuntimeSettings;
use crate::strategy::{AccessibilityBridge, StrategySet};

/// The most recent toast observed on the event bus.
#[derive(Default)]
pub struct ToastCache {
    inner: RwLock<Option<(String, i64)>>,
}

impl ToastCache {
    pub fn observe(&self, text: String, timestamp: i64) {
        *self.inner.write() = Some((text, timestamp));
    }

    pub fn last(&self) -> Option<(String, i64)> {
        self.inner.read().clone()
    }
}

/// Everything the built-in handlers share. One instance per engine.
pub struct HandlerDeps {
    pub shell: Arc<dyn Shell>,
    pub strategies: Arc<StrategySet>,
    pub perf: Arc<PerfEngine>,
    pub router: Arc<CommandRouter>,
    pub plugins: Arc<PluginManager>,
    pub settings: Arc<RuntimeSettings>,
    pub bus: EventBus,
    pub toasts: Arc<ToastCache>,
    pub started: Instant,
    pub shutdown: CancellationToken,
    /// Installed accessibility effector, when present. Carries the
    /// clipboard, which has no shell route.
    pub bridge: RwLock<Option<Arc<dyn AccessibilityBridge>>>,
    pub agent_version: String,
    /// Live session count supplier (the authenticator owns sessions).
    pub session_count: Box<dyn Fn() -> usize + Send + Sync>,
}

/// Register the whole built-in catalogue with the router.
pub fn register_builtins(deps: &Arc<HandlerDeps>) {
    system::register(deps);
    device::register(deps);
    ui::register(deps);
    app::register(deps);
    perf::register(deps);
    tracing::info!(
        methods = deps.router.methods().len(),
        "built-in handlers registered"
    );
}
