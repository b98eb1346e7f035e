//! Shared domain types for the Autodroid agent: the coded error taxonomy,
//! the command-handler contract, capability snapshots, and configuration.

pub mod capability;
pub mod config;
pub mod error;
pub mod handler;

pub use capability::{ActiveStrategies, Capabilities, CapabilitySnapshot};
pub use config::AgentConfig;
pub use error::{AgentError, ErrorCategory, Result};
pub use handler::{CommandHandler, RequestContext};
