//! `app.*` handlers over the package and activity managers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use ad_domain::error::{codes, AgentError};
use ad_domain::handler::{CommandHandler, RequestContext};
use ad_shell::Shell;

use super::{params, HandlerDeps};

const PM_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

pub fn register(deps: &Arc<HandlerDeps>) {
    deps.router.register(Arc::new(Launch(deps.clone())));
    deps.router.register(Arc::new(Stop(deps.clone())));
    deps.router.register(Arc::new(Clear(deps.clone())));
    deps.router.register(Arc::new(Install(deps.clone())));
    deps.router.register(Arc::new(Uninstall(deps.clone())));
    deps.router.register(Arc::new(List(deps.clone())));
    deps.router.register(Arc::new(Info(deps.clone())));
    deps.router.register(Arc::new(Permissions(deps.clone())));
}

fn package_validator(params: &Value) -> Result<(), String> {
    let name = params::req_str(params, &["packageName", "package_name"])?;
    // Shell metacharacters in a package name are never legitimate.
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!("invalid package name: {name}"));
    }
    Ok(())
}

fn package_of(params: &Value) -> Result<String, AgentError> {
    params::opt_str(params, &["packageName", "package_name"])
        .ok_or_else(|| AgentError::internal("packageName is required"))
}

async fn is_running(shell: &Arc<dyn Shell>, package: &str) -> bool {
    shell
        .run(&format!("pidof {package}"), false, Duration::from_secs(3))
        .await
        .map(|o| o.success() && !o.stdout.trim().is_empty())
        .unwrap_or(false)
}

/// "TotalTime: 517" from `am start -W`.
pub fn parse_launch_time_ms(out: &str) -> Option<u64> {
    out.lines()
        .find_map(|l| l.trim().strip_prefix("TotalTime:"))
        .and_then(|v| v.trim().parse().ok())
}

struct Launch(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Launch {
    fn method(&self) -> &str {
        "app.launch"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        package_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let package = package_of(&params)?;
        let shell = &self.0.shell;

        if params::opt_bool(&params, &["clearState", "clear_state"]).unwrap_or(false) {
            shell
                .run(&format!("pm clear {package}"), false, PM_TIMEOUT)
                .await?;
        }

        let started = Instant::now();
        let out = match params::opt_str(&params, &["activity"]) {
            Some(activity) => {
                let component = if activity.contains('/') {
                    activity
                } else {
                    format!("{package}/{activity}")
                };
                shell
                    .run(&format!("am start -W -n {component}"), false, PM_TIMEOUT)
                    .await?
            }
            None => {
                // No explicit activity: fire the launcher intent.
                shell
                    .run(
                        &format!(
                            "monkey -p {package} -c android.intent.category.LAUNCHER 1"
                        ),
                        false,
                        PM_TIMEOUT,
                    )
                    .await?
            }
        };
        if !out.success() || out.stdout.contains("Error") || out.stderr.contains("Error") {
            return Err(AgentError::new(
                codes::APP_NOT_INSTALLED,
                format!("failed to launch {package}: {}", out.stderr.trim()),
            ));
        }

        if params::opt_bool(&params, &["waitForIdle", "wait_for_idle"]).unwrap_or(false) {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let launch_time_ms = parse_launch_time_ms(&out.stdout)
            .unwrap_or(started.elapsed().as_millis() as u64);
        Ok(json!({
            "launchTimeMs": launch_time_ms,
            "packageName": package,
        }))
    }
}

struct Stop(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Stop {
    fn method(&self) -> &str {
        "app.stop"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        package_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let package = package_of(&params)?;
        let out = self
            .0
            .shell
            .run(&format!("am force-stop {package}"), false, PM_TIMEOUT)
            .await?;
        Ok(json!({"success": out.success()}))
    }
}

struct Clear(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Clear {
    fn method(&self) -> &str {
        "app.clear"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        package_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let package = package_of(&params)?;
        let out = self
            .0
            .shell
            .run(&format!("pm clear {package}"), false, PM_TIMEOUT)
            .await?;
        let success = out.stdout.trim() == "Success";
        Ok(json!({"success": success, "output": out.stdout.trim()}))
    }
}

struct Install(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Install {
    fn method(&self) -> &str {
        "app.install"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        params::req_str(params, &["path"]).map(|_| ())
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let path = params::opt_str(&params, &["path"])
            .ok_or_else(|| AgentError::internal("path is required"))?;
        let mut flags = String::new();
        if params::opt_bool(&params, &["replace"]).unwrap_or(true) {
            flags.push_str(" -r");
        }
        if params::opt_bool(&params, &["grantPermissions", "grant_permissions"]).unwrap_or(false)
        {
            flags.push_str(" -g");
        }
        let out = self
            .0
            .shell
            .run(
                &format!("pm install{flags} \"{path}\""),
                false,
                INSTALL_TIMEOUT,
            )
            .await?;
        let combined = format!("{}{}", out.stdout, out.stderr);
        let success = combined.contains("Success");
        if !success {
            tracing::warn!(path = %path, output = %combined.trim(), "install failed");
        }
        Ok(json!({"success": success, "output": combined.trim()}))
    }
}

struct Uninstall(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Uninstall {
    fn method(&self) -> &str {
        "app.uninstall"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        package_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let package = package_of(&params)?;
        let out = self
            .0
            .shell
            .run(&format!("pm uninstall {package}"), false, PM_TIMEOUT)
            .await?;
        let success = out.stdout.contains("Success");
        Ok(json!({"success": success, "output": out.stdout.trim()}))
    }
}

/// Lines of `pm list packages` are `package:<name>`.
pub fn parse_package_list(out: &str) -> Vec<String> {
    let mut packages: Vec<String> = out
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect();
    packages.sort();
    packages
}

struct List(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for List {
    fn method(&self) -> &str {
        "app.list"
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let filter = params::opt_str(&params, &["filter"]);
        let flag = match filter.as_deref() {
            Some("user") | Some("third_party") => " -3",
            Some("system") => " -s",
            _ => "",
        };
        let out = self
            .0
            .shell
            .run(&format!("pm list packages{flag}"), false, PM_TIMEOUT)
            .await?;
        let mut packages = parse_package_list(&out.stdout);
        // Any other filter value is a substring match.
        if let Some(needle) = filter.filter(|f| !matches!(f.as_str(), "user" | "third_party" | "system"))
        {
            packages.retain(|p| p.contains(&needle));
        }
        Ok(json!({"count": packages.len(), "packages": packages}))
    }
}

/// Fields of interest from `dumpsys package <pkg>`.
#[derive(Debug, Default, PartialEq)]
pub struct PackageDump {
    pub version_name: Option<String>,
    pub version_code: Option<i64>,
    pub first_install_time: Option<String>,
    pub last_update_time: Option<String>,
}

pub fn parse_package_dump(out: &str) -> PackageDump {
    let mut dump = PackageDump::default();
    let grab = |line: &str, key: &str| -> Option<String> {
        line.trim().strip_prefix(key).map(|v| {
            v.trim_start_matches('=')
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string()
        })
    };
    for line in out.lines() {
        if dump.version_name.is_none() {
            if let Some(v) = grab(line, "versionName") {
                dump.version_name = Some(v);
                continue;
            }
        }
        if dump.version_code.is_none() {
            if let Some(v) = grab(line, "versionCode") {
                dump.version_code = v.parse().ok();
                continue;
            }
        }
        if dump.first_install_time.is_none() {
            if let Some(v) = line.trim().strip_prefix("firstInstallTime=") {
                dump.first_install_time = Some(v.trim().to_string());
                continue;
            }
        }
        if dump.last_update_time.is_none() {
            if let Some(v) = line.trim().strip_prefix("lastUpdateTime=") {
                dump.last_update_time = Some(v.trim().to_string());
            }
        }
    }
    dump
}

struct Info(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Info {
    fn method(&self) -> &str {
        "app.info"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        package_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let package = package_of(&params)?;
        let out = self
            .0
            .shell
            .run(&format!("dumpsys package {package}"), false, PM_TIMEOUT)
            .await?;
        let dump = parse_package_dump(&out.stdout);
        if dump.version_name.is_none() && dump.version_code.is_none() {
            return Err(AgentError::new(
                codes::APP_NOT_INSTALLED,
                format!("{package} is not installed"),
            ));
        }
        let running = is_running(&self.0.shell, &package).await;
        Ok(json!({
            "packageName": package,
            "versionName": dump.version_name,
            "versionCode": dump.version_code,
            "isRunning": running,
            "firstInstallTime": dump.first_install_time,
            "lastUpdateTime": dump.last_update_time,
        }))
    }
}

/// `permission.NAME: granted=true` rows of the package dump.
pub fn parse_granted_permissions(out: &str) -> Vec<(String, bool)> {
    out.lines()
        .filter_map(|l| {
            let l = l.trim();
            let (name, rest) = l.split_once(':')?;
            if !name.contains(".permission") && !name.starts_with("android.permission") {
                return None;
            }
            let granted = rest.contains("granted=true");
            rest.contains("granted=").then(|| (name.to_string(), granted))
        })
        .collect()
}

struct Permissions(Arc<HandlerDeps>);

#[async_trait::async_trait]
impl CommandHandler for Permissions {
    fn method(&self) -> &str {
        "app.permissions"
    }

    fn validate(&self, params: &Value) -> Result<(), String> {
        package_validator(params)
    }

    async fn handle(&self, params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
        let package = package_of(&params)?;
        let shell = &self.0.shell;

        let as_list = |v: Option<&Value>| -> Vec<String> {
            match v {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            }
        };

        let grant = as_list(params.get("grant"));
        let revoke = as_list(params.get("revoke"));
        if !grant.is_empty() || !revoke.is_empty() {
            let mut granted = Vec::new();
            let mut revoked = Vec::new();
            for perm in &grant {
                let out = shell
                    .run(&format!("pm grant {package} {perm}"), false, PM_TIMEOUT)
                    .await?;
                if out.success() {
                    granted.push(perm.clone());
                } else {
                    return Err(AgentError::new(
                        codes::PERMISSION_DENIED,
                        format!("failed to grant {perm}: {}", out.stderr.trim()),
                    ));
                }
            }
            for perm in &revoke {
                let out = shell
                    .run(&format!("pm revoke {package} {perm}"), false, PM_TIMEOUT)
                    .await?;
                if out.success() {
                    revoked.push(perm.clone());
                } else {
                    return Err(AgentError::new(
                        codes::PERMISSION_DENIED,
                        format!("failed to revoke {perm}: {}", out.stderr.trim()),
                    ));
                }
            }
            return Ok(json!({"granted": granted, "revoked": revoked}));
        }

        let out = shell
            .run(&format!("dumpsys package {package}"), false, PM_TIMEOUT)
            .await?;
        let permissions: Vec<Value> = parse_granted_permissions(&out.stdout)
            .into_iter()
            .map(|(name, granted)| json!({"name": name, "granted": granted}))
            .collect();
        Ok(json!({"permissions": permissions}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_time_comes_from_am_start() {
        let out = "\
Starting: Intent { cmp=com.example.app/.MainActivity }
Status: ok
LaunchState: COLD
TotalTime: 517
WaitTime: 521
";
        assert_eq!(parse_launch_time_ms(out), Some(517));
        assert_eq!(parse_launch_time_ms("no timing"), None);
    }

    #[test]
    fn package_list_strips_prefix_and_sorts() {
        let out = "package:com.zeta\npackage:com.alpha\njunk line\n";
        assert_eq!(parse_package_list(out), vec!["com.alpha", "com.zeta"]);
    }

    #[test]
    fn package_dump_extracts_versions_and_times() {
        let out = "\
Packages:
  Package [com.example.app] (1234abcd):
    versionCode=42 minSdk=26 targetSdk=33
    versionName=1.2.3
    firstInstallTime=2025-11-02 10:00:00
    lastUpdateTime=2026-01-15 09:30:00
";
        let dump = parse_package_dump(out);
        assert_eq!(dump.version_name.as_deref(), Some("1.2.3"));
        assert_eq!(dump.version_code, Some(42));
        assert_eq!(
            dump.first_install_time.as_deref(),
            Some("2025-11-02 10:00:00")
        );
    }

    #[test]
    fn missing_package_dump_is_empty() {
        let dump = parse_package_dump("Unable to find package: com.nope");
        assert_eq!(dump, PackageDump::default());
    }

    #[test]
    fn granted_permissions_parse() {
        let out = "\
    install permissions:
      android.permission.INTERNET: granted=true
      android.permission.CAMERA: granted=false
      some.other.line: irrelevant
";
        let perms = parse_granted_permissions(out);
        assert_eq!(
            perms,
            vec![
                ("android.permission.INTERNET".to_string(), true),
                ("android.permission.CAMERA".to_string(), false),
            ]
        );
    }

    #[test]
    fn package_validator_rejects_shell_metacharacters() {
        assert!(package_validator(&json!({"packageName": "com.example.app"})).is_ok());
        assert!(package_validator(&json!({"packageName": "com.x; rm -rf /"})).is_err());
        assert!(package_validator(&json!({})).is_err());
    }
}
