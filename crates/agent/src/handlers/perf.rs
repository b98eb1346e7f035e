//! `perf.*` handlers over the sampling engine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use ad_domain::error::{codes, AgentError};
use ad_domain::handler::{CommandHandler, RequestContext};
use ad_perf::{MetricKind, SessionSpec};

use super::{params, HandlerDeps};

const DEFAULT_INTERVAL_MS: u64 = 1000;
const MIN_INTERVAL_MS: u64 = 100;

pub fn register(deps: &Arc<HandlerDeps>) {
    deps.router.register(Arc::new(Start(deps.clone())));
    deps.router.register(Arc::new(StopSession(deps.clone())));
    deps.router.register(Arc::new(Snapshot(deps.clone())));
    deps.router.register(Arc::new(Stream(deps.clone())));
}

fn metrics_of(params: &Value) -> Result<Vec<MetricKind>, String> {
    let raw = params
        .get("metrics")
        .and_then(Value::as_array)
        .ok_or("metrics[] is required")?;
    if raw.is_empty() {
        return Err("metrics[] must be non-empty".into());
    }
    let mut metrics = Vec::with_capacity(raw.len());
    for entry in raw {
        let name = entry.as_str().ok_or("metrics entries must be strings")?;
        let kind = MetricKind::parse(name)
            .ok_or_else(|| format!("unknown metric: {name}"))?;
        if !metrics.contains(&kind) {
            metrics.push(kind);
        }
    }
    Ok(metrics)
}

struct Start(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Start {
    fn method(&self) -> &str {
        "perf.start"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        metrics_of(params).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let metrics = metrics_of(&params).map_err(AgentError::internal)?;
        let interval_ms = params::opt_u64(&params, &["intervalMs", "interval_ms"])
            .unwrap_or(DEFAULT_INTERVAL_MS)
            .max(MIN_INTERVAL_MS);
        let spec = SessionSpec {
            package: params::opt_str(&params, &["packageName", "package_name"]),
            metrics,
            interval: Duration::from_millis(interval_ms),
        };
        let session_id = self.0.perf.start(spec)?;
        Ok(json!({"sessionId": session_id, "intervalMs": interval_ms}))
    }
}

struct StopSession(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for StopSession {
    fn method(&self) -> &str {
        "perf.stop"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_str(params, &["sessionId", "session_id"]).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let session_id = params::opt_str(&params, &["sessionId", "session_id"])
            .ok_or_else(|| AgentError::internal("sessionId is required"))?;
        let report = self.0.perf.stop(&session_id)?;
        Ok(json!({
            "sessionId": report.session_id,
            "durationMs": report.duration_ms,
            "sampleCount": report.sample_count,
            "summary": serde_json::to_value(&report.summary)?,
            "samples": serde_json::to_value(&report.samples)?,
        }))
    }
}

struct Snapshot(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Snapshot {
    fn method(&self) -> &str {
        "perf.snapshot"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        metrics_of(params).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let metrics = metrics_of(&params).map_err(AgentError::internal)?;
        let package = params::opt_str(&params, &["packageName", "package_name"]);
        let sample = self.0.perf.snapshot(package, metrics).await?;
        Ok(serde_json::to_value(&sample)?)
    }
}

struct Stream(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Stream {
    fn method(&self) -> &str {
        "perf.stream"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_str(params, &["sessionId", "session_id"]).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let session_id = params::opt_str(&params, &["sessionId", "session_id"])
            .ok_or_else(|| AgentError::internal("sessionId is required"))?;
        if !self.0.perf.session_exists(&session_id) {
            return Err(AgentError::new(
                codes::SESSION_NOT_FOUND,
                format!("no perf session {session_id}"),
            ));
        }
        // Samples for every session are forwarded to the event channel; the
        // acknowledgment tells the controller which stream to watch for.
        Ok(json!({"sessionId": session_id, "streaming": true, "eventMethod": "perf.sample"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_parse_dedupes_and_rejects_unknown() {
        let p = json!({"metrics": ["cpu", "memory", "cpu"]});
        assert_eq!(
            metrics_of(&p).unwrap(),
            vec![MetricKind::Cpu, MetricKind::Memory]
        );
        assert!(metrics_of(&json!({"metrics": []})).is_err());
        assert!(metrics_of(&json!({"metrics": ["disk"]})).is_err());
        assert!(metrics_of(&json!({})).is_err());
        assert!(metrics_of(&json!({"metrics": [1]})).is_err());
    }
}
