//! The command-handler contract.
//!
//! A handler owns one dotted method name. The router validates parameters
//! before invoking `handle`; handlers never touch transport frames, they
//! consume a params object and return a result value or a typed error.

use serde_json::Value;

use crate::error::AgentError;

/// Per-request context handed to a handler invocation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// The request envelope's id, echoed in the response and usable as a
    /// binary-frame correlation id.
    pub request_id: String,
    /// Advisory deadline from the request metadata. The dispatcher does not
    /// enforce it; polling handlers derive their cutoff from it.
    pub timeout_ms: Option<u64>,
    /// Trace id from the request metadata, if any.
    pub trace_id: Option<String>,
}

/// Implement this to serve one method of the command catalogue.
///
/// Handlers run on the Tokio runtime and may suspend arbitrarily long; the
/// router dispatches each request on its own task so a slow handler never
/// starves the others.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// The dotted method name this handler serves (e.g. `"ui.click"`).
    fn method(&self) -> &str;

    /// Cheap structural parameter check, run before `handle`.
    /// Returning `Err` produces an INTERNAL/error response with the reason.
    fn validate(&self, _params: &Value) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Execute the command.
    async fn handle(&self, params: Value, ctx: RequestContext) -> Result<Value, AgentError>;
}
