//! Command router — the method-name → handler map and the dispatch path
//! every control-channel request goes through.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;

use ad_domain::error::AgentError;
use ad_domain::handler::{CommandHandler, RequestContext};
use ad_protocol::envelope::Envelope;

/// Anything that can turn a request envelope into a response envelope.
/// The transport server depends on this seam, not on the router itself.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, request: Envelope) -> Envelope;
}

#[derive(Default)]
pub struct CommandRouter {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to its method. Re-registration replaces the previous
    /// binding (last writer wins).
    pub fn register(&self, handler: Arc<dyn CommandHandler>) {
        let method = handler.method().to_string();
        if self
            .handlers
            .write()
            .insert(method.clone(), handler)
            .is_some()
        {
            tracing::debug!(method = %method, "handler replaced");
        }
    }

    /// Remove a binding. Returns whether anything was bound.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// All bound method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, method: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.read().get(method).cloned()
    }
}

#[async_trait::async_trait]
impl Dispatcher for CommandRouter {
    /// Produce exactly one response for the request, whatever happens
    /// inside the handler.
    async fn dispatch(&self, request: Envelope) -> Envelope {
        let Some(method) = request.method.clone() else {
            return Envelope::error_response(&request, &AgentError::internal("missing method"));
        };

        let Some(handler) = self.lookup(&method) else {
            return Envelope::error_response(&request, &AgentError::not_implemented(&method));
        };

        let params = request.params.clone().unwrap_or(serde_json::Value::Null);
        if let Err(reason) = handler.validate(&params) {
            return Envelope::error_response(
                &request,
                &AgentError::internal(format!("invalid params for {method}: {reason}")),
            );
        }

        let ctx = RequestContext {
            request_id: request.id.clone(),
            timeout_ms: request.metadata.as_ref().and_then(|m| m.timeout_ms),
            trace_id: request.metadata.as_ref().and_then(|m| m.trace_id.clone()),
        };

        // A panicking handler still produces a response.
        let outcome = AssertUnwindSafe(handler.handle(params, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => Envelope::response_to(&request, result),
            Ok(Err(error)) => {
                tracing::debug!(
                    method = %method,
                    code = error.code,
                    error = %error.message,
                    "handler returned error"
                );
                Envelope::error_response(&request, &error)
            }
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(method = %method, cause = %cause, "handler panicked");
                Envelope::error_response(
                    &request,
                    &AgentError::unknown(format!("handler panicked: {cause}")),
                )
            }
        }
    }
}
