use serde::{Deserialize, Serialize};

/// Runtime capability flags detected at startup and updated as effectors
/// come and go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// A working `su` is available; privileged strategies may be selected.
    pub privileged_shell: bool,
    /// An accessibility bridge is installed.
    pub accessibility: bool,
    /// Platform API level (0 when undetectable).
    pub platform_api_level: i32,
}

/// Strategy names currently winning resolution, per operation family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStrategies {
    pub input: Option<String>,
    pub capture: Option<String>,
    pub hierarchy: Option<String>,
}

/// Immutable view of the resolver state exposed to handlers and plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub privileged_shell: bool,
    pub accessibility: bool,
    pub platform_api_level: i32,
    pub active_strategies: ActiveStrategies,
    pub loaded_plugins: Vec<String>,
}
