//! `system.*` handlers: capability reporting, liveness, runtime
//! configuration, and orderly shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use ad_domain::error::AgentError;
use ad_domain::handler::{CommandHandler, RequestContext};
use ad_protocol::envelope::now_millis;

use super::{params, HandlerDeps};

pub fn register(deps: &Arc<HandlerDeps>) {
    deps.router.register(Arc::new(Capabilities(deps.clone())));
    deps.router.register(Arc::new(Heartbeat(deps.clone())));
    deps.router.register(Arc::new(Configure(deps.clone())));
    deps.router.register(Arc::new(Shutdown(deps.clone())));
    deps.router.register(Arc::new(Ping));
}

struct Capabilities(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Capabilities {
    fn method(&self) -> &str {
        "system.capabilities"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let deps = &self.0;
        let snapshot = deps.strategies.snapshot(deps.plugins.started_ids());
        let mut value = serde_json::to_value(&snapshot)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "registeredMethods".into(),
                json!(deps.router.methods()),
            );
            obj.insert("agentVersion".into(), json!(deps.agent_version));
            obj.insert("liveSessions".into(), json!((deps.session_count)()));
        }
        Ok(value)
    }
}

/// `MemFree`-style readings for the heartbeat, in bytes.
fn parse_memory_bytes(meminfo: &str) -> (u64, u64) {
    let field = |name: &str| -> u64 {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };
    let total = field("MemTotal:");
    let free = {
        let available = field("MemAvailable:");
        if available > 0 {
            available
        } else {
            field("MemFree:")
        }
    };
    (free, total)
}

struct Heartbeat(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Heartbeat {
    fn method(&self) -> &str {
        "system.heartbeat"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .unwrap_or_default();
        let (free, total) = parse_memory_bytes(&meminfo);
        Ok(json!({
            "uptime": self.0.started.elapsed().as_millis() as u64,
            "freeMemory": free,
            "totalMemory": total,
            "timestamp": now_millis(),
        }))
    }
}

struct Configure(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Configure {
    fn method(&self) -> &str {
        "system.configure"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_str(params, &["key"])?;
        if params.get("value").is_none() {
            return Err("value is required".into());
        }
        Ok(())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let key = params::opt_str(&params, &["key"])
            .ok_or_else(|| AgentError::internal("key is required"))?;
        let value = params
            .get("value")
            .ok_or_else(|| AgentError::internal("value is required"))?;
        self.0.settings.set(&key, value)?;
        tracing::info!(key = %key, "runtime setting updated");
        Ok(json!({"success": true, "settings": self.0.settings.snapshot()}))
    }
}

struct Shutdown(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Shutdown {
    fn method(&self) -> &str {
        "system.shutdown"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        tracing::info!("shutdown requested via system.shutdown");
        let token = self.0.shutdown.clone();
        // Let the response reach the wire before tearing transport down.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });
        Ok(json!({"success": true}))
    }
}

struct Ping;

#[async_trait::async_trait]
impl CommandHandler for Ping {
    fn method(&self) -> &str {
        "system.ping"
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        Ok(json!({
            "pong": true,
            "echo": params.get("echo").cloned().unwrap_or(Value::Null),
            "timestamp": now_millis(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_memory_prefers_available_over_free() {
        let text = "MemTotal: 1000 kB\nMemFree: 100 kB\nMemAvailable: 400 kB\n";
        assert_eq!(parse_memory_bytes(text), (400 * 1024, 1000 * 1024));
        let no_available = "MemTotal: 1000 kB\nMemFree: 100 kB\n";
        assert_eq!(parse_memory_bytes(no_available), (100 * 1024, 1000 * 1024));
        assert_eq!(parse_memory_bytes(""), (0, 0));
    }
}
