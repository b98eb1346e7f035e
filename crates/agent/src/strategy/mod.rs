//! Operation strategies and the capability-based resolver.
//!
//! Each operation family (input, screen capture, UI hierarchy) has an
//! insertion-ordered registry of named strategies. Resolution picks the best
//! entry for the current capability flags; registration is additive and safe
//! under concurrent resolution.

pub mod accessibility;
pub mod element;
pub mod selector;
pub mod shell_capture;
pub mod shell_hierarchy;
pub mod shell_input;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use ad_domain::capability::{ActiveStrategies, Capabilities, CapabilitySnapshot};
use ad_domain::error::Result;

pub use accessibility::{AccessibilityBridge, AccessibilityHierarchy, AccessibilityInput};
pub use element::{Bounds, UiElement};
pub use selector::Selector;
pub use shell_capture::ShellCapture;
pub use shell_hierarchy::ShellHierarchy;
pub use shell_input::ShellInput;

/// Name accessibility-backed strategies register under; the resolver
/// prefers it by name for the input and hierarchy families.
pub const ACCESSIBILITY: &str = "accessibility";

#[async_trait::async_trait]
pub trait InputStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn requires_privilege(&self) -> bool;

    async fn tap(&self, x: i32, y: i32) -> Result<()>;
    async fn long_press(&self, x: i32, y: i32, duration: Duration) -> Result<()>;
    async fn swipe(&self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<()>;
    async fn key_event(&self, key_code: i32) -> Result<()>;
    async fn input_text(&self, text: &str) -> Result<()>;
    /// Follow an arbitrary path of points over the given duration.
    async fn gesture(&self, points: &[(i32, i32)], duration: Duration) -> Result<()>;
}

#[async_trait::async_trait]
pub trait CaptureStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn requires_privilege(&self) -> bool;

    /// PNG-encoded full-screen capture.
    async fn capture(&self) -> Result<Vec<u8>>;
}

#[async_trait::async_trait]
pub trait HierarchyStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn requires_privilege(&self) -> bool;

    async fn dump(&self) -> Result<Vec<UiElement>>;
}

/// The three registries plus the capability flags they resolve against.
#[derive(Default)]
pub struct StrategySet {
    caps: RwLock<Capabilities>,
    input: RwLock<Vec<Arc<dyn InputStrategy>>>,
    capture: RwLock<Vec<Arc<dyn CaptureStrategy>>>,
    hierarchy: RwLock<Vec<Arc<dyn HierarchyStrategy>>>,
}

impl StrategySet {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps: RwLock::new(caps),
            ..Default::default()
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.caps.read()
    }

    /// Mutate the capability flags; readers see the change atomically.
    pub fn update_capabilities(&self, f: impl FnOnce(&mut Capabilities)) {
        f(&mut self.caps.write());
    }

    pub fn register_input(&self, strategy: Arc<dyn InputStrategy>) {
        tracing::debug!(name = %strategy.name(), "input strategy registered");
        self.input.write().push(strategy);
    }

    pub fn register_capture(&self, strategy: Arc<dyn CaptureStrategy>) {
        tracing::debug!(name = %strategy.name(), "capture strategy registered");
        self.capture.write().push(strategy);
    }

    pub fn register_hierarchy(&self, strategy: Arc<dyn HierarchyStrategy>) {
        tracing::debug!(name = %strategy.name(), "hierarchy strategy registered");
        self.hierarchy.write().push(strategy);
    }

    /// Input: privileged when the device allows it, else accessibility,
    /// else the first non-privileged entry.
    pub fn resolve_input(&self) -> Option<Arc<dyn InputStrategy>> {
        let caps = *self.caps.read();
        let list = self.input.read();
        if caps.privileged_shell {
            if let Some(s) = list.iter().find(|s| s.requires_privilege()) {
                return Some(s.clone());
            }
        }
        if caps.accessibility {
            if let Some(s) = list.iter().find(|s| s.name() == ACCESSIBILITY) {
                return Some(s.clone());
            }
        }
        list.iter().find(|s| !s.requires_privilege()).cloned()
    }

    /// Capture: privileged is silent (no consent prompt), so it wins when
    /// available; else the first non-privileged entry.
    pub fn resolve_capture(&self) -> Option<Arc<dyn CaptureStrategy>> {
        let caps = *self.caps.read();
        let list = self.capture.read();
        if caps.privileged_shell {
            if let Some(s) = list.iter().find(|s| s.requires_privilege()) {
                return Some(s.clone());
            }
        }
        list.iter().find(|s| !s.requires_privilege()).cloned()
    }

    /// Hierarchy: accessibility is live and cheap, so it wins by name when
    /// available; else the first remaining entry.
    pub fn resolve_hierarchy(&self) -> Option<Arc<dyn HierarchyStrategy>> {
        let caps = *self.caps.read();
        let list = self.hierarchy.read();
        if caps.accessibility {
            if let Some(s) = list.iter().find(|s| s.name() == ACCESSIBILITY) {
                return Some(s.clone());
            }
        }
        list.first().cloned()
    }

    /// Immutable view for `system.capabilities` and plugin contexts.
    pub fn snapshot(&self, loaded_plugins: Vec<String>) -> CapabilitySnapshot {
        let caps = *self.caps.read();
        CapabilitySnapshot {
            privileged_shell: caps.privileged_shell,
            accessibility: caps.accessibility,
            platform_api_level: caps.platform_api_level,
            active_strategies: ActiveStrategies {
                input: self.resolve_input().map(|s| s.name().to_string()),
                capture: self.resolve_capture().map(|s| s.name().to_string()),
                hierarchy: self.resolve_hierarchy().map(|s| s.name().to_string()),
            },
            loaded_plugins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ad_domain::error::AgentError;

    struct StubInput {
        name: &'static str,
        privileged: bool,
    }

    #[async_trait::async_trait]
    impl InputStrategy for StubInput {
        fn name(&self) -> &str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        async fn tap(&self, _x: i32, _y: i32) -> Result<()> {
            Ok(())
        }
        async fn long_press(&self, _x: i32, _y: i32, _d: Duration) -> Result<()> {
            Ok(())
        }
        async fn swipe(&self, _f: (i32, i32), _t: (i32, i32), _d: Duration) -> Result<()> {
            Ok(())
        }
        async fn key_event(&self, _k: i32) -> Result<()> {
            Ok(())
        }
        async fn input_text(&self, _t: &str) -> Result<()> {
            Ok(())
        }
        async fn gesture(&self, _p: &[(i32, i32)], _d: Duration) -> Result<()> {
            Ok(())
        }
    }

    struct StubHierarchy {
        name: &'static str,
        privileged: bool,
    }

    #[async_trait::async_trait]
    impl HierarchyStrategy for StubHierarchy {
        fn name(&self) -> &str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        async fn dump(&self) -> Result<Vec<UiElement>> {
            Err(AgentError::hierarchy_unavailable())
        }
    }

    struct StubCapture {
        name: &'static str,
        privileged: bool,
    }

    #[async_trait::async_trait]
    impl CaptureStrategy for StubCapture {
        fn name(&self) -> &str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        async fn capture(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn populated(caps: Capabilities) -> StrategySet {
        let set = StrategySet::new(caps);
        set.register_input(Arc::new(StubInput {
            name: "shell",
            privileged: true,
        }));
        set.register_input(Arc::new(StubInput {
            name: ACCESSIBILITY,
            privileged: false,
        }));
        set.register_capture(Arc::new(StubCapture {
            name: "shell",
            privileged: true,
        }));
        set.register_capture(Arc::new(StubCapture {
            name: "projection",
            privileged: false,
        }));
        set.register_hierarchy(Arc::new(StubHierarchy {
            name: "shell",
            privileged: false,
        }));
        set.register_hierarchy(Arc::new(StubHierarchy {
            name: ACCESSIBILITY,
            privileged: false,
        }));
        set
    }

    #[test]
    fn input_prefers_privileged_then_accessibility() {
        let set = populated(Capabilities {
            privileged_shell: true,
            accessibility: true,
            platform_api_level: 33,
        });
        assert_eq!(set.resolve_input().unwrap().name(), "shell");

        set.update_capabilities(|c| c.privileged_shell = false);
        assert_eq!(set.resolve_input().unwrap().name(), ACCESSIBILITY);

        set.update_capabilities(|c| c.accessibility = false);
        // First non-privileged entry: the accessibility stub again, by order.
        assert_eq!(set.resolve_input().unwrap().name(), ACCESSIBILITY);
    }

    #[test]
    fn capture_prefers_privileged_else_first_non_privileged() {
        let set = populated(Capabilities {
            privileged_shell: true,
            ..Default::default()
        });
        assert_eq!(set.resolve_capture().unwrap().name(), "shell");

        set.update_capabilities(|c| c.privileged_shell = false);
        assert_eq!(set.resolve_capture().unwrap().name(), "projection");
    }

    #[test]
    fn hierarchy_prefers_accessibility_by_name() {
        let set = populated(Capabilities {
            accessibility: true,
            ..Default::default()
        });
        assert_eq!(set.resolve_hierarchy().unwrap().name(), ACCESSIBILITY);

        set.update_capabilities(|c| c.accessibility = false);
        assert_eq!(set.resolve_hierarchy().unwrap().name(), "shell");
    }

    #[test]
    fn empty_registries_resolve_to_none() {
        let set = StrategySet::new(Capabilities::default());
        assert!(set.resolve_input().is_none());
        assert!(set.resolve_capture().is_none());
        assert!(set.resolve_hierarchy().is_none());
        let snap = set.snapshot(vec![]);
        assert!(snap.active_strategies.input.is_none());
    }

    #[test]
    fn snapshot_reflects_flags_and_plugins() {
        let set = populated(Capabilities {
            privileged_shell: true,
            accessibility: false,
            platform_api_level: 30,
        });
        let snap = set.snapshot(vec!["com.example.ping".into()]);
        assert!(snap.privileged_shell);
        assert_eq!(snap.platform_api_level, 30);
        assert_eq!(snap.active_strategies.input.as_deref(), Some("shell"));
        assert_eq!(snap.loaded_plugins, vec!["com.example.ping"]);
    }
}
