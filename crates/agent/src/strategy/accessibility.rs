//! Accessibility-backed strategies.
//!
//! The accessibility service itself is an external effector; this module
//! defines its fixed contract and the strategy adapters that surface it to
//! the resolver. The bridge also carries the clipboard, which has no shell
//! equivalent on modern platform releases.

use std::sync::Arc;
use std::time::Duration;

use ad_domain::error::Result;

use super::element::UiElement;
use super::{HierarchyStrategy, InputStrategy, ACCESSIBILITY};

/// Contract an accessibility effector must implement to back the
/// accessibility strategies.
#[async_trait::async_trait]
pub trait AccessibilityBridge: Send + Sync + 'static {
    async fn tap(&self, x: i32, y: i32) -> Result<()>;
    async fn long_press(&self, x: i32, y: i32, duration: Duration) -> Result<()>;
    async fn swipe(&self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<()>;
    async fn key_event(&self, key_code: i32) -> Result<()>;
    async fn input_text(&self, text: &str) -> Result<()>;
    async fn gesture(&self, points: &[(i32, i32)], duration: Duration) -> Result<()>;

    /// Live window hierarchy.
    async fn dump(&self) -> Result<Vec<UiElement>>;

    async fn clipboard_get(&self) -> Result<String>;
    async fn clipboard_set(&self, text: &str) -> Result<()>;
}

pub struct AccessibilityInput {
    bridge: Arc<dyn AccessibilityBridge>,
}

impl AccessibilityInput {
    pub fn new(bridge: Arc<dyn AccessibilityBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait::async_trait]
impl InputStrategy for AccessibilityInput {
    fn name(&self) -> &str {
        ACCESSIBILITY
    }

    fn requires_privilege(&self) -> bool {
        false
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.bridge.tap(x, y).await
    }

    async fn long_press(&self, x: i32, y: i32, duration: Duration) -> Result<()> {
        self.bridge.long_press(x, y, duration).await
    }

    async fn swipe(&self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<()> {
        self.bridge.swipe(from, to, duration).await
    }

    async fn key_event(&self, key_code: i32) -> Result<()> {
        self.bridge.key_event(key_code).await
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        self.bridge.input_text(text).await
    }

    async fn gesture(&self, points: &[(i32, i32)], duration: Duration) -> Result<()> {
        self.bridge.gesture(points, duration).await
    }
}

pub struct AccessibilityHierarchy {
    bridge: Arc<dyn AccessibilityBridge>,
}

impl AccessibilityHierarchy {
    pub fn new(bridge: Arc<dyn AccessibilityBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait::async_trait]
impl HierarchyStrategy for AccessibilityHierarchy {
    fn name(&self) -> &str {
        ACCESSIBILITY
    }

    fn requires_privilege(&self) -> bool {
        false
    }

    async fn dump(&self) -> Result<Vec<UiElement>> {
        self.bridge.dump().await
    }
}
