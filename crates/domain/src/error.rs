//! Coded error taxonomy shared across all Autodroid crates.
//!
//! Every error that can reach the wire carries a numeric code. The code's
//! thousands digit selects the category, and a fixed table decides whether
//! the client may retry. Both mappings are frozen; extending them is a
//! protocol-compatibility change.

use serde::{Deserialize, Serialize};

/// Error categories, derived from the code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    Transport,
    Device,
    App,
    Ui,
    Perf,
    File,
    Plugin,
    Internal,
}

impl ErrorCategory {
    /// Category of a numeric code per the range table.
    pub fn of_code(code: u16) -> Self {
        match code {
            1000..=1999 => Self::Transport,
            2000..=2999 => Self::Device,
            3000..=3999 => Self::App,
            4000..=4999 => Self::Ui,
            5000..=5999 => Self::Perf,
            6000..=6999 => Self::File,
            7000..=7999 => Self::Plugin,
            _ => Self::Internal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Device => "DEVICE",
            Self::App => "APP",
            Self::Ui => "UI",
            Self::Perf => "PERF",
            Self::File => "FILE",
            Self::Plugin => "PLUGIN",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known error codes.
pub mod codes {
    // 1000–1999 TRANSPORT
    pub const AUTH_FAILED: u16 = 1001;
    pub const TIMEOUT: u16 = 1002;
    pub const RATE_LIMIT: u16 = 1003;
    pub const TRANSPORT_PROTOCOL: u16 = 1004;

    // 2000–2999 DEVICE
    pub const DEVICE_OFFLINE: u16 = 2001;
    pub const PERMISSION_DENIED: u16 = 2002;
    pub const PRIVILEGE_REQUIRED: u16 = 2003;
    pub const LOW_MEMORY: u16 = 2004;
    pub const SCREEN_OFF: u16 = 2005;
    pub const UNSUPPORTED: u16 = 2006;

    // 3000–3999 APP
    pub const APP_NOT_INSTALLED: u16 = 3001;
    pub const INSTALL_FAILED: u16 = 3002;
    pub const LAUNCH_TIMEOUT: u16 = 3003;

    // 4000–4999 UI
    pub const ELEMENT_NOT_FOUND: u16 = 4001;
    pub const ELEMENT_NOT_VISIBLE: u16 = 4002;
    pub const STALE_ELEMENT: u16 = 4003;
    pub const GESTURE_FAILED: u16 = 4004;
    pub const HIERARCHY_UNAVAILABLE: u16 = 4005;

    // 5000–5999 PERF
    pub const SESSION_NOT_FOUND: u16 = 5001;
    pub const ALREADY_RUNNING: u16 = 5002;
    pub const COLLECTOR_FAILED: u16 = 5003;

    // 6000–6999 FILE
    pub const FILE_NOT_FOUND: u16 = 6001;
    pub const FILE_ACCESS_DENIED: u16 = 6002;

    // 7000–7999 PLUGIN
    pub const PLUGIN_INIT_FAILED: u16 = 7001;
    pub const PLUGIN_DEPENDENCY_MISSING: u16 = 7002;
    pub const PLUGIN_LOAD_FAILED: u16 = 7003;

    // 9000–9999 INTERNAL
    pub const INTERNAL_ERROR: u16 = 9001;
    pub const NOT_IMPLEMENTED: u16 = 9002;
    pub const INTERNAL_PROTOCOL: u16 = 9004;
    pub const UNKNOWN: u16 = 9999;
}

/// The frozen recoverable set. Clients may retry exactly these codes.
pub fn is_recoverable(code: u16) -> bool {
    matches!(
        code,
        codes::TIMEOUT
            | codes::RATE_LIMIT
            | codes::LOW_MEMORY
            | codes::SCREEN_OFF
            | codes::ELEMENT_NOT_FOUND
            | codes::ELEMENT_NOT_VISIBLE
            | codes::STALE_ELEMENT
            | codes::LAUNCH_TIMEOUT
    )
}

/// Typed error produced by handlers, strategies, and subsystems.
///
/// The wire representation (category string, recoverable flag) is derived
/// from `code` at encode time and never stored here.
#[derive(thiserror::Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct AgentError {
    pub code: u16,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub suggested_action: Option<String>,
}

impl AgentError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            suggested_action: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::of_code(self.code)
    }

    pub fn recoverable(&self) -> bool {
        is_recoverable(self.code)
    }

    // ── Common constructors ─────────────────────────────────────────

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(codes::AUTH_FAILED, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(codes::TIMEOUT, message)
    }

    /// Malformed bytes on the binary channel.
    pub fn transport_protocol(message: impl Into<String>) -> Self {
        Self::new(codes::TRANSPORT_PROTOCOL, message)
    }

    /// Malformed envelope on a textual channel.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_PROTOCOL, message)
    }

    pub fn privilege_required(message: impl Into<String>) -> Self {
        Self::new(codes::PRIVILEGE_REQUIRED, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(codes::UNSUPPORTED, message)
    }

    pub fn element_not_found(message: impl Into<String>) -> Self {
        Self::new(codes::ELEMENT_NOT_FOUND, message)
    }

    pub fn hierarchy_unavailable() -> Self {
        Self::new(
            codes::HIERARCHY_UNAVAILABLE,
            "no hierarchy strategy available",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::new(
            codes::NOT_IMPLEMENTED,
            format!("Unknown method: {method}"),
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(codes::UNKNOWN, message)
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::new(codes::FILE_NOT_FOUND, e.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Self::new(codes::FILE_ACCESS_DENIED, e.to_string())
            }
            _ => Self::unknown(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_derivation_covers_every_range() {
        assert_eq!(ErrorCategory::of_code(1001), ErrorCategory::Transport);
        assert_eq!(ErrorCategory::of_code(2003), ErrorCategory::Device);
        assert_eq!(ErrorCategory::of_code(3001), ErrorCategory::App);
        assert_eq!(ErrorCategory::of_code(4001), ErrorCategory::Ui);
        assert_eq!(ErrorCategory::of_code(5002), ErrorCategory::Perf);
        assert_eq!(ErrorCategory::of_code(6001), ErrorCategory::File);
        assert_eq!(ErrorCategory::of_code(7002), ErrorCategory::Plugin);
        assert_eq!(ErrorCategory::of_code(9002), ErrorCategory::Internal);
        // Codes outside any named range fall back to INTERNAL.
        assert_eq!(ErrorCategory::of_code(0), ErrorCategory::Internal);
        assert_eq!(ErrorCategory::of_code(8500), ErrorCategory::Internal);
    }

    #[test]
    fn recoverable_table_is_exactly_eight_codes() {
        let recoverable: Vec<u16> = (0..=9999).filter(|c| is_recoverable(*c)).collect();
        assert_eq!(
            recoverable,
            vec![1002, 1003, 2004, 2005, 3003, 4001, 4002, 4003]
        );
    }

    #[test]
    fn not_implemented_echoes_method() {
        let e = AgentError::not_implemented("nope.nothing");
        assert_eq!(e.code, 9002);
        assert!(e.message.contains("Unknown method: nope.nothing"));
        assert_eq!(e.category(), ErrorCategory::Internal);
        assert!(!e.recoverable());
    }

    #[test]
    fn io_error_maps_to_file_codes() {
        let e: AgentError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(e.code, codes::FILE_NOT_FOUND);
        let e: AgentError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(e.code, codes::FILE_ACCESS_DENIED);
    }
}
