use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use ad_domain::error::{AgentError, Result};

/// Captured output of a finished command.
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes command lines on the host OS.
#[async_trait::async_trait]
pub trait Shell: Send + Sync + 'static {
    /// Run a command line, capturing textual output. `privileged` routes
    /// through `su -c`.
    async fn run(&self, command: &str, privileged: bool, timeout: Duration)
        -> Result<ShellOutput>;

    /// Run a command line, capturing raw stdout bytes (screenshots and other
    /// binary producers). Stderr is discarded.
    async fn run_raw(
        &self,
        command: &str,
        privileged: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

/// The real thing: `sh -c` / `su -c` via `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemShell {
    su_binary: String,
}

impl Default for SystemShell {
    fn default() -> Self {
        Self {
            su_binary: "su".into(),
        }
    }
}

impl SystemShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the privilege wrapper (e.g. a vendor `su` path).
    pub fn with_su_binary(su_binary: impl Into<String>) -> Self {
        Self {
            su_binary: su_binary.into(),
        }
    }

    fn build(&self, command: &str, privileged: bool) -> Command {
        let mut cmd = if privileged {
            let mut c = Command::new(&self.su_binary);
            c.arg("-c").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Shell for SystemShell {
    async fn run(
        &self,
        command: &str,
        privileged: bool,
        timeout: Duration,
    ) -> Result<ShellOutput> {
        let mut cmd = self.build(command, privileged);
        let fut = async {
            let output = cmd.output().await?;
            Ok::<_, AgentError>(ShellOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => {
                let out = result?;
                tracing::trace!(
                    command = %command,
                    privileged,
                    exit_code = out.exit_code,
                    "shell command finished"
                );
                Ok(out)
            }
            Err(_) => {
                tracing::warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "shell command timed out");
                Err(AgentError::timeout(format!(
                    "command timed out after {} ms: {command}",
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn run_raw(
        &self,
        command: &str,
        privileged: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut cmd = self.build(command, privileged);
        cmd.stderr(Stdio::null());
        let fut = async {
            let mut child = cmd.spawn()?;
            let mut stdout = child
                .stdout
                .take()
                .ok_or_else(|| AgentError::internal("child stdout not captured"))?;
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await?;
            let status = child.wait().await?;
            if !status.success() {
                return Err(AgentError::internal(format!(
                    "command exited with {}: {command}",
                    status.code().unwrap_or(-1)
                )));
            }
            Ok(buf)
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::timeout(format!(
                "command timed out after {} ms: {command}",
                timeout.as_millis()
            ))),
        }
    }
}

/// Probe whether a working privileged shell exists: `su -c "id -u"` must
/// succeed and report uid 0.
pub async fn probe_privileged(shell: &dyn Shell) -> bool {
    match shell.run("id -u", true, Duration::from_secs(3)).await {
        Ok(out) => out.success() && out.stdout.trim() == "0",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout_and_exit_code() {
        let shell = SystemShell::new();
        let out = shell
            .run("echo hello && echo oops >&2", false, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(out.success());
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let shell = SystemShell::new();
        let out = shell.run("exit 3", false, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn run_times_out() {
        let shell = SystemShell::new();
        let err = shell
            .run("sleep 5", false, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.code, ad_domain::error::codes::TIMEOUT);
        assert!(err.recoverable());
    }

    #[tokio::test]
    async fn run_raw_returns_bytes() {
        let shell = SystemShell::new();
        let bytes = shell
            .run_raw("printf 'ab\\0cd'", false, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(bytes, b"ab\0cd");
    }

    #[tokio::test]
    async fn probe_privileged_is_false_without_su() {
        let shell = SystemShell::with_su_binary("/nonexistent/su");
        assert!(!probe_privileged(&shell).await);
    }
}
