//! The Autodroid agent runtime: command router, capability-based strategy
//! resolution, the built-in handler families, plugin lifecycle management,
//! and the three-channel transport server, wired together by the engine.

pub mod bootstrap;
pub mod engine;
pub mod handlers;
pub mod plugins;
pub mod router;
pub mod settings;
pub mod strategy;
pub mod transport;

pub use bootstrap::build_engine;
pub use engine::AgentEngine;
pub use router::{CommandRouter, Dispatcher};
