//! Runtime-mutable settings, adjusted through `system.configure`.
//!
//! The key set is closed; unknown keys are rejected so typos surface at the
//! controller instead of silently configuring nothing.

use parking_lot::RwLock;
use serde_json::{json, Value};

use ad_domain::error::{AgentError, Result};

#[derive(Debug, Clone)]
struct Settings {
    waitfor_poll_ms: u64,
    waitfor_timeout_ms: u64,
    screenshot_quality: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            waitfor_poll_ms: 500,
            waitfor_timeout_ms: 10_000,
            screenshot_quality: 80,
        }
    }
}

#[derive(Default)]
pub struct RuntimeSettings {
    inner: RwLock<Settings>,
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waitfor_poll_ms(&self) -> u64 {
        self.inner.read().waitfor_poll_ms
    }

    pub fn waitfor_timeout_ms(&self) -> u64 {
        self.inner.read().waitfor_timeout_ms
    }

    pub fn screenshot_quality(&self) -> u8 {
        self.inner.read().screenshot_quality
    }

    /// Apply one key/value pair. Keys accept both camelCase and snake_case.
    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        let as_u64 = || {
            value
                .as_u64()
                .ok_or_else(|| AgentError::internal(format!("{key} expects a positive integer")))
        };
        match key {
            "waitforPollMs" | "waitfor_poll_ms" => {
                let v = as_u64()?.max(10);
                self.inner.write().waitfor_poll_ms = v;
            }
            "waitforTimeoutMs" | "waitfor_timeout_ms" => {
                self.inner.write().waitfor_timeout_ms = as_u64()?;
            }
            "screenshotQuality" | "screenshot_quality" => {
                let v = as_u64()?;
                if v > 100 {
                    return Err(AgentError::internal("screenshot_quality must be 0..=100"));
                }
                self.inner.write().screenshot_quality = v as u8;
            }
            other => {
                return Err(AgentError::internal(format!(
                    "unknown configuration key: {other}"
                )))
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Value {
        let s = self.inner.read();
        json!({
            "waitforPollMs": s.waitfor_poll_ms,
            "waitforTimeoutMs": s.waitfor_timeout_ms,
            "screenshotQuality": s.screenshot_quality,
        })
    }
}
