//! `ui.*` handlers: selector queries, gestures, text entry, polling.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use ad_domain::error::{codes, AgentError};
use ad_domain::handler::{CommandHandler, RequestContext};

use super::device::screen_center;
use super::{params, HandlerDeps};
use crate::strategy::{HierarchyStrategy, InputStrategy, UiElement};

const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(100);
const DEFAULT_LONG_CLICK_MS: u64 = 800;
const DEFAULT_SWIPE_MS: u64 = 300;
const DEFAULT_SCROLL_DISTANCE: i32 = 600;
const DEFAULT_GESTURE_MS: u64 = 500;
const DEFAULT_PINCH_DISTANCE: i32 = 300;

pub fn register(deps: &Arc<HandlerDeps>) {
    deps.router.register(Arc::new(Find(deps.clone())));
    deps.router.register(Arc::new(Exists(deps.clone())));
    deps.router.register(Arc::new(Dump(deps.clone())));
    deps.router.register(Arc::new(Click(deps.clone())));
    deps.router.register(Arc::new(LongClick(deps.clone())));
    deps.router.register(Arc::new(DoubleClick(deps.clone())));
    deps.router.register(Arc::new(Type(deps.clone())));
    deps.router.register(Arc::new(Swipe(deps.clone())));
    deps.router.register(Arc::new(Scroll(deps.clone())));
    deps.router.register(Arc::new(WaitFor(deps.clone())));
    deps.router.register(Arc::new(Toast(deps.clone())));
    deps.router.register(Arc::new(Gesture(deps.clone())));
    deps.router.register(Arc::new(Pinch(deps.clone())));
}

// ── Shared plumbing ─────────────────────────────────────────────────

async fn dump_tree(deps: &HandlerDeps) -> Result<Vec<UiElement>, AgentError> {
    let strategy = deps
        .strategies
        .resolve_hierarchy()
        .ok_or_else(AgentError::hierarchy_unavailable)?;
    strategy.dump().await
}

fn input_strategy(deps: &HandlerDeps) -> Result<Arc<dyn InputStrategy>, AgentError> {
    deps.strategies
        .resolve_input()
        .ok_or_else(|| AgentError::privilege_required("no input strategy available"))
}

/// Target point: explicit coordinates, or the centre of the first selector
/// match in pre-order.
async fn resolve_point(deps: &HandlerDeps, params: &Value) -> Result<(i32, i32), AgentError> {
    if let Some(point) = params::opt_point(params) {
        return Ok(point);
    }
    let selector = params::opt_selector(params)
        .map_err(AgentError::internal)?
        .ok_or_else(|| AgentError::internal("either x/y or selector is required"))?;
    let roots = dump_tree(deps).await?;
    let hit = selector
        .find_first(&roots)
        .ok_or_else(|| AgentError::element_not_found("Element not found"))?;
    Ok(hit.bounds.center())
}

/// The click family answers a selector miss with a success-shaped result
/// carrying an in-result failure indicator, so scripted retry loops do not
/// have to branch on error envelopes.
fn miss_result(error: &AgentError) -> Option<Value> {
    (error.code == codes::ELEMENT_NOT_FOUND)
        .then(|| json!({"success": false, "error": error.message}))
}

fn point_validator(params: &Value) -> Result<(), String> {
    if params::opt_point(params).is_some() {
        return Ok(());
    }
    match params::opt_selector(params)? {
        Some(_) => Ok(()),
        None => Err("either x/y or selector is required".into()),
    }
}

// ── Queries ─────────────────────────────────────────────────────────

struct Find(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Find {
    fn method(&self) -> &str {
        "ui.find"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::opt_selector(params).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let selector = params::opt_selector(&params)
            .map_err(AgentError::internal)?
            .unwrap_or_default();
        let roots = dump_tree(&self.0).await?;
        // An empty selector is the wildcard: every element, count = tree size.
        let matches: Vec<Value> = selector
            .find_all(&roots)
            .into_iter()
            .map(|el| serde_json::to_value(el.without_children()).unwrap_or(Value::Null))
            .collect();
        Ok(json!({"count": matches.len(), "elements": matches}))
    }
}

struct Exists(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Exists {
    fn method(&self) -> &str {
        "ui.exists"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::opt_selector(params)?
            .map(|_| ())
            .ok_or_else(|| "selector is required".into())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let selector = params::opt_selector(&params)
            .map_err(AgentError::internal)?
            .ok_or_else(|| AgentError::internal("selector is required"))?;
        let roots = dump_tree(&self.0).await?;
        let count = selector.find_all(&roots).len();
        Ok(json!({"exists": count > 0, "count": count}))
    }
}

struct Dump(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Dump {
    fn method(&self) -> &str {
        "ui.dump"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let roots = dump_tree(&self.0).await?;
        let count = UiElement::count_forest(&roots);
        Ok(json!({"count": count, "elements": serde_json::to_value(&roots)?}))
    }
}

// ── Click family ────────────────────────────────────────────────────

struct Click(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Click {
    fn method(&self) -> &str {
        "ui.click"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        point_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let (x, y) = match resolve_point(&self.0, &params).await {
            Ok(p) => p,
            Err(e) => return miss_result(&e).ok_or(e),
        };
        input_strategy(&self.0)?.tap(x, y).await?;
        Ok(json!({"success": true, "x": x, "y": y}))
    }
}

struct LongClick(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for LongClick {
    fn method(&self) -> &str {
        "ui.longClick"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        point_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let (x, y) = match resolve_point(&self.0, &params).await {
            Ok(p) => p,
            Err(e) => return miss_result(&e).ok_or(e),
        };
        let duration = Duration::from_millis(
            params::opt_u64(&params, &["durationMs", "duration_ms"])
                .unwrap_or(DEFAULT_LONG_CLICK_MS),
        );
        input_strategy(&self.0)?.long_press(x, y, duration).await?;
        Ok(json!({"success": true, "x": x, "y": y}))
    }
}

struct DoubleClick(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for DoubleClick {
    fn method(&self) -> &str {
        "ui.doubleClick"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        point_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let (x, y) = match resolve_point(&self.0, &params).await {
            Ok(p) => p,
            Err(e) => return miss_result(&e).ok_or(e),
        };
        let input = input_strategy(&self.0)?;
        input.tap(x, y).await?;
        tokio::time::sleep(DOUBLE_CLICK_GAP).await;
        input.tap(x, y).await?;
        Ok(json!({"success": true, "x": x, "y": y}))
    }
}

// ── Text entry ──────────────────────────────────────────────────────

struct Type(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Type {
    fn method(&self) -> &str {
        "ui.type"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_str(params, &["text"])?;
        params::opt_selector(params).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let text = params::opt_str(&params, &["text"])
            .ok_or_else(|| AgentError::internal("text is required"))?;
        let input = input_strategy(&self.0)?;
        // A selector focuses the field first by clicking its centre.
        if let Some(selector) = params::opt_selector(&params).map_err(AgentError::internal)? {
            let roots = dump_tree(&self.0).await?;
            let Some(hit) = selector.find_first(&roots) else {
                return Ok(json!({"success": false, "error": "Element not found"}));
            };
            let (x, y) = hit.bounds.center();
            input.tap(x, y).await?;
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        input.input_text(&text).await?;
        Ok(json!({"success": true}))
    }
}

// ── Gestures ────────────────────────────────────────────────────────

struct Swipe(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Swipe {
    fn method(&self) -> &str {
        "ui.swipe"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        for key in ["x1", "y1", "x2", "y2"] {
            params::req_i32(params, &[key])?;
        }
        Ok(())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let p = |k| {
            params::opt_i32(&params, &[k])
                .ok_or_else(|| AgentError::internal(format!("{k} is required")))
        };
        let from = (p("x1")?, p("y1")?);
        let to = (p("x2")?, p("y2")?);
        let duration = Duration::from_millis(
            params::opt_u64(&params, &["durationMs", "duration_ms"]).unwrap_or(DEFAULT_SWIPE_MS),
        );
        input_strategy(&self.0)?.swipe(from, to, duration).await?;
        Ok(json!({"success": true}))
    }
}

/// Endpoint offset from a start point by `distance` in a cardinal direction.
fn offset(start: (i32, i32), direction: &str, distance: i32) -> Result<(i32, i32), AgentError> {
    let (x, y) = start;
    match direction {
        "up" => Ok((x, y - distance)),
        "down" => Ok((x, y + distance)),
        "left" => Ok((x - distance, y)),
        "right" => Ok((x + distance, y)),
        other => Err(AgentError::internal(format!(
            "direction must be up|down|left|right, got {other}"
        ))),
    }
}

struct Scroll(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Scroll {
    fn method(&self) -> &str {
        "ui.scroll"
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let direction =
            params::opt_str(&params, &["direction"]).unwrap_or_else(|| "down".into());
        let distance =
            params::opt_i32(&params, &["distance"]).unwrap_or(DEFAULT_SCROLL_DISTANCE);
        let centre = match params.get("centre").or_else(|| params.get("center")) {
            Some(c) => (
                params::opt_i32(c, &["x"]).unwrap_or(0),
                params::opt_i32(c, &["y"]).unwrap_or(0),
            ),
            None => screen_center(&self.0).await,
        };
        let to = offset(centre, &direction, distance)?;
        let duration = Duration::from_millis(
            params::opt_u64(&params, &["durationMs", "duration_ms"]).unwrap_or(DEFAULT_SWIPE_MS),
        );
        input_strategy(&self.0)?.swipe(centre, to, duration).await?;
        Ok(json!({"success": true, "direction": direction}))
    }
}

struct Gesture(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Gesture {
    fn method(&self) -> &str {
        "ui.gesture"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        let points = params
            .get("points")
            .and_then(Value::as_array)
            .ok_or_else(|| "points[] is required".to_string())?;
        if points.len() < 2 {
            return Err("points[] needs at least two entries".into());
        }
        Ok(())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let raw = params
            .get("points")
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::internal("points[] is required"))?;
        let mut points = Vec::with_capacity(raw.len());
        for p in raw {
            // Accept {x, y} objects or [x, y] pairs.
            let point = params::opt_point(p).or_else(|| {
                let arr = p.as_array()?;
                Some((arr.first()?.as_i64()? as i32, arr.get(1)?.as_i64()? as i32))
            });
            let Some(point) = point else {
                return Err(AgentError::internal("points entries must be {x,y} or [x,y]"));
            };
            points.push(point);
        }
        let duration = Duration::from_millis(
            params::opt_u64(&params, &["durationMs", "duration_ms"]).unwrap_or(DEFAULT_GESTURE_MS),
        );
        input_strategy(&self.0)?.gesture(&points, duration).await?;
        Ok(json!({"success": true, "points": points.len()}))
    }
}

struct Pinch(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Pinch {
    fn method(&self) -> &str {
        "ui.pinch"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        match params::opt_str(params, &["direction"]).as_deref() {
            None | Some("in") | Some("out") => Ok(()),
            Some(other) => Err(format!("direction must be in|out, got {other}")),
        }
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let direction = params::opt_str(&params, &["direction"]).unwrap_or_else(|| "out".into());
        let distance =
            params::opt_i32(&params, &["distance"]).unwrap_or(DEFAULT_PINCH_DISTANCE);
        let centre = match params.get("centre").or_else(|| params.get("center")) {
            Some(c) => (
                params::opt_i32(c, &["x"]).unwrap_or(0),
                params::opt_i32(c, &["y"]).unwrap_or(0),
            ),
            None => screen_center(&self.0).await,
        };
        let duration = Duration::from_millis(
            params::opt_u64(&params, &["durationMs", "duration_ms"]).unwrap_or(DEFAULT_GESTURE_MS),
        );

        // Two swipes radiating from (out) or converging to (in) the centre.
        let near = (centre.0, centre.1 - distance / 4);
        let far = (centre.0, centre.1 - distance);
        let near2 = (centre.0, centre.1 + distance / 4);
        let far2 = (centre.0, centre.1 + distance);
        let (a, b, c, d) = match direction.as_str() {
            "in" => (far, near, far2, near2),
            _ => (near, far, near2, far2),
        };

        let input = input_strategy(&self.0)?;
        let (first, second) =
            tokio::join!(input.swipe(a, b, duration), input.swipe(c, d, duration));
        first?;
        second?;
        Ok(json!({"success": true, "direction": direction}))
    }
}

// ── Polling ─────────────────────────────────────────────────────────

struct WaitFor(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for WaitFor {
    fn method(&self) -> &str {
        "ui.waitFor"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::opt_selector(params)?
            .ok_or_else(|| "selector is required".to_string())?;
        match params::opt_str(params, &["condition"]).as_deref() {
            None | Some("exists") | Some("gone") => Ok(()),
            Some(other) => Err(format!("condition must be exists|gone, got {other}")),
        }
    }

    async fn handle(&self, params: Value, ctx: RequestContext) -> Result<Value, AgentError> {
        let selector = params::opt_selector(&params)
            .map_err(AgentError::internal)?
            .ok_or_else(|| AgentError::internal("selector is required"))?;
        let want_gone =
            params::opt_str(&params, &["condition"]).as_deref() == Some("gone");
        let poll = Duration::from_millis(
            params::opt_u64(&params, &["pollMs", "poll_ms"])
                .unwrap_or_else(|| self.0.settings.waitfor_poll_ms()),
        );
        // Explicit timeout wins; the request metadata deadline is advisory
        // but honored when nothing else is given.
        let timeout_ms = params::opt_u64(&params, &["timeoutMs", "timeout_ms"])
            .or(ctx.timeout_ms)
            .unwrap_or_else(|| self.0.settings.waitfor_timeout_ms());
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let roots = dump_tree(&self.0).await?;
            let hit = selector.find_first(&roots);
            let satisfied = hit.is_some() != want_gone;
            if satisfied {
                return Ok(json!({
                    "found": hit.is_some(),
                    "element": hit.map(|el| {
                        serde_json::to_value(el.without_children()).unwrap_or(Value::Null)
                    }),
                    "timed_out": false,
                }));
            }
            if tokio::time::Instant::now() >= deadline {
                // `found` reports whether the element is present right now:
                // an expired "gone" wait means it never left.
                return Ok(json!({
                    "found": want_gone,
                    "timed_out": true,
                }));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

// ── Toast ───────────────────────────────────────────────────────────

struct Toast(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Toast {
    fn method(&self) -> &str {
        "ui.toast"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        match self.0.toasts.last() {
            Some((text, timestamp)) => Ok(json!({"text": text, "timestamp": timestamp})),
            None => Ok(json!({"text": Value::Null, "timestamp": Value::Null})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_cardinal_directions() {
        let c = (500, 900);
        assert_eq!(offset(c, "up", 100).unwrap(), (500, 800));
        assert_eq!(offset(c, "down", 100).unwrap(), (500, 1000));
        assert_eq!(offset(c, "left", 100).unwrap(), (400, 900));
        assert_eq!(offset(c, "right", 100).unwrap(), (600, 900));
        assert!(offset(c, "sideways", 100).is_err());
    }

    #[test]
    fn miss_result_only_covers_element_not_found() {
        let miss = AgentError::element_not_found("Element not found");
        let v = miss_result(&miss).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "Element not found");

        assert!(miss_result(&AgentError::hierarchy_unavailable()).is_none());
        assert!(miss_result(&AgentError::internal("x")).is_none());
    }
}
