//! `device.*` handlers: static facts, screenshots, shell access, keys,
//! power, rotation, clipboard.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};

use ad_domain::error::{codes, AgentError};
use ad_domain::handler::{CommandHandler, RequestContext};
use ad_shell::Shell;

use super::{params, HandlerDeps};
use crate::strategy::{AccessibilityBridge, CaptureStrategy, InputStrategy};

const SHELL_DEFAULT_TIMEOUT_MS: u64 = 15_000;

pub fn register(deps: &Arc<HandlerDeps>) {
    deps.router.register(Arc::new(Info(deps.clone())));
    deps.router.register(Arc::new(Screenshot(deps.clone())));
    deps.router.register(Arc::new(ShellCmd(deps.clone())));
    deps.router.register(Arc::new(InputKey(deps.clone())));
    deps.router.register(Arc::new(Wake(deps.clone())));
    deps.router.register(Arc::new(Reboot(deps.clone())));
    deps.router.register(Arc::new(Rotation(deps.clone())));
    deps.router.register(Arc::new(Clipboard(deps.clone())));
}

/// "Physical size: 1080x1920" (an Override line, when present, wins).
pub fn parse_wm_size(out: &str) -> Option<(i32, i32)> {
    let mut result = None;
    for line in out.lines() {
        if let Some((_, dims)) = line.rsplit_once(": ") {
            if let Some((w, h)) = dims.trim().split_once('x') {
                if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
                    result = Some((w, h));
                }
            }
        }
    }
    result
}

/// "Physical density: 420" (again, a later Override line wins).
pub fn parse_wm_density(out: &str) -> Option<i32> {
    let mut result = None;
    for line in out.lines() {
        if let Some((_, value)) = line.rsplit_once(": ") {
            if let Ok(v) = value.trim().parse() {
                result = Some(v);
            }
        }
    }
    result
}

/// Screen midpoint via `wm size`; a common phone portrait default when the
/// tool is unavailable.
pub(super) async fn screen_center(deps: &HandlerDeps) -> (i32, i32) {
    let size = deps
        .shell
        .run("wm size", false, Duration::from_secs(3))
        .await
        .ok()
        .filter(|o| o.success())
        .and_then(|o| parse_wm_size(&o.stdout));
    let (w, h) = size.unwrap_or((1080, 1920));
    (w / 2, h / 2)
}

struct Info(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Info {
    fn method(&self) -> &str {
        "device.info"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let deps = &self.0;
        let getprop = |prop: &'static str| {
            let shell = deps.shell.clone();
            async move {
                shell
                    .run(&format!("getprop {prop}"), false, Duration::from_secs(3))
                    .await
                    .ok()
                    .filter(|o| o.success())
                    .map(|o| o.stdout.trim().to_string())
                    .unwrap_or_default()
            }
        };

        let (model, brand, sdk) = tokio::join!(
            getprop("ro.product.model"),
            getprop("ro.product.brand"),
            getprop("ro.build.version.sdk"),
        );

        let size = deps
            .shell
            .run("wm size", false, Duration::from_secs(3))
            .await
            .ok()
            .and_then(|o| parse_wm_size(&o.stdout));
        let density = deps
            .shell
            .run("wm density", false, Duration::from_secs(3))
            .await
            .ok()
            .and_then(|o| parse_wm_density(&o.stdout));

        let caps = deps.strategies.capabilities();
        Ok(json!({
            "model": model,
            "brand": brand,
            "sdk": sdk.parse::<i32>().unwrap_or(caps.platform_api_level),
            "screenWidth": size.map(|s| s.0),
            "screenHeight": size.map(|s| s.1),
            "density": density,
            "privileged": caps.privileged_shell,
        }))
    }
}

struct Screenshot(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Screenshot {
    fn method(&self) -> &str {
        "device.screenshot"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        // `quality` and `scale` are accepted for compatibility; the shell
        // capture path always yields lossless PNG.
        let strategy = self.0.strategies.resolve_capture().ok_or_else(|| {
            AgentError::privilege_required("no screen-capture strategy available")
        })?;
        let png = strategy.capture().await?;
        Ok(json!({
            "data": base64::engine::general_purpose::STANDARD.encode(&png),
            "format": "png",
            "bytes": png.len(),
        }))
    }
}

struct ShellCmd(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for ShellCmd {
    fn method(&self) -> &str {
        "device.shell"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_str(params, &["command"]).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let command = params::opt_str(&params, &["command"])
            .ok_or_else(|| AgentError::internal("command is required"))?;
        let privileged =
            params::opt_bool(&params, &["asPrivileged", "as_privileged"]).unwrap_or(false);
        if privileged && !self.0.strategies.capabilities().privileged_shell {
            return Err(AgentError::privilege_required(
                "privileged shell is not available on this device",
            ));
        }
        let timeout_ms = params::opt_u64(&params, &["timeoutMs", "timeout_ms"])
            .unwrap_or(SHELL_DEFAULT_TIMEOUT_MS);
        let out = self
            .0
            .shell
            .run(&command, privileged, Duration::from_millis(timeout_ms))
            .await?;
        Ok(json!({
            "exitCode": out.exit_code,
            "stdout": out.stdout,
            "stderr": out.stderr,
        }))
    }
}

struct InputKey(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for InputKey {
    fn method(&self) -> &str {
        "device.inputKey"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_i32(params, &["keyCode", "key_code"]).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let key_code = params::opt_i32(&params, &["keyCode", "key_code"])
            .ok_or_else(|| AgentError::internal("keyCode is required"))?;
        let input = self.0.strategies.resolve_input().ok_or_else(|| {
            AgentError::privilege_required("no input strategy available")
        })?;
        input.key_event(key_code).await?;
        Ok(json!({"success": true}))
    }
}

const KEYCODE_WAKEUP: i32 = 224;

/// True when the power-state report says the display is off.
pub fn parse_display_asleep(dump: &str) -> bool {
    dump.lines().any(|l| {
        let l = l.trim();
        l.starts_with("mWakefulness=Asleep")
            || l.starts_with("mWakefulness=Dozing")
            || l.contains("Display Power: state=OFF")
    })
}

struct Wake(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Wake {
    fn method(&self) -> &str {
        "device.wake"
    }

    async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let dump = self
            .0
            .shell
            .run("dumpsys power", false, Duration::from_secs(5))
            .await?;
        let was_asleep = parse_display_asleep(&dump.stdout);
        if was_asleep {
            let input = self.0.strategies.resolve_input().ok_or_else(|| {
                AgentError::privilege_required("no input strategy available")
            })?;
            input.key_event(KEYCODE_WAKEUP).await?;
        }
        Ok(json!({"wasAsleep": was_asleep, "success": true}))
    }
}

struct Reboot(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Reboot {
    fn method(&self) -> &str {
        "device.reboot"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        match params::opt_str(params, &["mode"]).as_deref() {
            None | Some("normal") | Some("recovery") | Some("bootloader") => Ok(()),
            Some(other) => Err(format!(
                "mode must be normal|recovery|bootloader, got {other}"
            )),
        }
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        if !self.0.strategies.capabilities().privileged_shell {
            return Err(AgentError::privilege_required("reboot requires a privileged shell"));
        }
        let mode = params::opt_str(&params, &["mode"]).unwrap_or_else(|| "normal".into());
        let command = match mode.as_str() {
            "recovery" => "reboot recovery",
            "bootloader" => "reboot bootloader",
            _ => "reboot",
        };
        tracing::warn!(mode = %mode, "device reboot requested");
        self.0
            .shell
            .run(command, true, Duration::from_secs(10))
            .await?;
        Ok(json!({"success": true, "mode": mode}))
    }
}

struct Rotation(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Rotation {
    fn method(&self) -> &str {
        "device.rotation"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        match params::opt_i32(params, &["rotation"]) {
            None | Some(0..=3) => Ok(()),
            Some(other) => Err(format!("rotation must be 0..3, got {other}")),
        }
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let shell = &self.0.shell;
        if let Some(rotation) = params::opt_i32(&params, &["rotation"]) {
            let out = shell
                .run(
                    &format!(
                        "settings put system accelerometer_rotation 0 && \
                         settings put system user_rotation {rotation}"
                    ),
                    false,
                    Duration::from_secs(5),
                )
                .await?;
            if !out.success() {
                return Err(AgentError::new(
                    codes::PERMISSION_DENIED,
                    format!("failed to set rotation: {}", out.stderr.trim()),
                ));
            }
            return Ok(json!({"rotation": rotation}));
        }
        let out = shell
            .run("settings get system user_rotation", false, Duration::from_secs(5))
            .await?;
        let rotation: i32 = out.stdout.trim().parse().unwrap_or(0);
        Ok(json!({"rotation": rotation}))
    }
}

struct Clipboard(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Clipboard {
    fn method(&self) -> &str {
        "device.clipboard"
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let bridge = self.0.bridge.read().clone().ok_or_else(|| {
            AgentError::unsupported("clipboard requires the accessibility bridge")
        })?;
        match params::opt_str(&params, &["text"]) {
            Some(text) => {
                bridge.clipboard_set(&text).await?;
                Ok(json!({"success": true}))
            }
            None => {
                let text = bridge.clipboard_get().await?;
                Ok(json!({"text": text}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wm_size_prefers_the_override_line() {
        let plain = "Physical size: 1080x1920\n";
        assert_eq!(parse_wm_size(plain), Some((1080, 1920)));
        let overridden = "Physical size: 1080x1920\nOverride size: 720x1280\n";
        assert_eq!(parse_wm_size(overridden), Some((720, 1280)));
        assert_eq!(parse_wm_size("garbage"), None);
    }

    #[test]
    fn wm_density_parses() {
        assert_eq!(parse_wm_density("Physical density: 420\n"), Some(420));
        assert_eq!(parse_wm_density(""), None);
    }

    #[test]
    fn power_dump_detects_sleep_states() {
        assert!(parse_display_asleep("  mWakefulness=Asleep\n"));
        assert!(parse_display_asleep("Display Power: state=OFF\n"));
        assert!(!parse_display_asleep("  mWakefulness=Awake\n"));
    }
}
