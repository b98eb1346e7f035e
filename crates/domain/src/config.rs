//! Agent configuration, loaded from a TOML file at startup.
//!
//! Every field has a default so an absent file yields a runnable config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Control channel port (textual request/response).
    #[serde(default = "d_control_port")]
    pub control_port: u16,
    /// Binary channel port (framed payloads).
    #[serde(default = "d_binary_port")]
    pub binary_port: u16,
    /// Event channel port (server push).
    #[serde(default = "d_event_port")]
    pub event_port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Bearer token clients must present. Absent = accept all.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-channel cap on concurrent connections.
    #[serde(default = "d_max_connections")]
    pub max_connections: usize,
    #[serde(default = "d_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "d_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
    /// Frame size cap on the textual channels. The binary channel is
    /// effectively unbounded.
    #[serde(default = "d_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Directory scanned for plugin bundles on startup.
    #[serde(default = "d_plugins_dir")]
    pub plugins_dir: PathBuf,
    /// Private data area; each plugin gets a subdirectory.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// Default tracing filter, overridable via RUST_LOG.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            control_port: d_control_port(),
            binary_port: d_binary_port(),
            event_port: d_event_port(),
            host: d_host(),
            auth_token: None,
            max_connections: d_max_connections(),
            heartbeat_interval_ms: d_heartbeat_interval(),
            heartbeat_timeout_ms: d_heartbeat_timeout(),
            max_frame_bytes: d_max_frame_bytes(),
            plugins_dir: d_plugins_dir(),
            data_dir: d_data_dir(),
            log_filter: d_log_filter(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_control_port() -> u16 {
    18900
}
fn d_binary_port() -> u16 {
    18901
}
fn d_event_port() -> u16 {
    18902
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_max_connections() -> usize {
    5
}
fn d_heartbeat_interval() -> u64 {
    5_000
}
fn d_heartbeat_timeout() -> u64 {
    15_000
}
fn d_max_frame_bytes() -> usize {
    1024 * 1024
}
fn d_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn d_log_filter() -> String {
    "info".into()
}

/// A problem found by [`AgentConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl AgentConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AgentError::internal(format!("config: {e}")))
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut err = |message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message,
            })
        };

        // Port 0 binds ephemerally, so only explicit ports can collide.
        let ports = [self.control_port, self.binary_port, self.event_port];
        let explicit: Vec<u16> = ports.iter().copied().filter(|p| *p != 0).collect();
        let mut deduped = explicit.clone();
        deduped.sort_unstable();
        deduped.dedup();
        if deduped.len() != explicit.len() {
            err(format!(
                "channel ports must be distinct (control={}, binary={}, event={})",
                ports[0], ports[1], ports[2]
            ));
        }
        if self.max_connections == 0 {
            err("max_connections must be at least 1".into());
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "heartbeat_timeout_ms ({}) should exceed heartbeat_interval_ms ({})",
                    self.heartbeat_timeout_ms, self.heartbeat_interval_ms
                ),
            });
        }
        if let Some(token) = &self.auth_token {
            if token.len() < 8 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: "auth_token is shorter than 8 characters".into(),
                });
            }
        }
        issues
    }

    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}
