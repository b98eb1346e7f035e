//! Screen capture via `screencap -p`. Silent (no consent prompt), which is
//! why the resolver prefers it whenever privilege allows.

use std::sync::Arc;
use std::time::Duration;

use ad_domain::error::{AgentError, Result};
use ad_shell::Shell;

use super::CaptureStrategy;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub struct ShellCapture {
    shell: Arc<dyn Shell>,
    privileged: bool,
}

impl ShellCapture {
    pub fn new(shell: Arc<dyn Shell>, privileged: bool) -> Self {
        Self { shell, privileged }
    }
}

#[async_trait::async_trait]
impl CaptureStrategy for ShellCapture {
    fn name(&self) -> &str {
        "shell"
    }

    fn requires_privilege(&self) -> bool {
        self.privileged
    }

    async fn capture(&self) -> Result<Vec<u8>> {
        let bytes = self
            .shell
            .run_raw("screencap -p", self.privileged, Duration::from_secs(15))
            .await?;
        if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
            return Err(AgentError::internal(format!(
                "screencap produced {} bytes that are not a PNG",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}
