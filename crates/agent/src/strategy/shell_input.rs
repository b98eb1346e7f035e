//! Input strategy over the `input` shell tool.

use std::sync::Arc;
use std::time::Duration;

use ad_domain::error::{codes, AgentError, Result};
use ad_shell::Shell;

use super::InputStrategy;

/// Headroom added on top of a gesture's own duration before the shell call
/// is considered stuck.
const COMMAND_SLACK: Duration = Duration::from_secs(10);

pub struct ShellInput {
    shell: Arc<dyn Shell>,
    privileged: bool,
}

impl ShellInput {
    pub fn new(shell: Arc<dyn Shell>, privileged: bool) -> Self {
        Self { shell, privileged }
    }

    async fn input(&self, args: &str, budget: Duration) -> Result<()> {
        let out = self
            .shell
            .run(&format!("input {args}"), self.privileged, budget + COMMAND_SLACK)
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(AgentError::new(
                codes::GESTURE_FAILED,
                format!("input {args} failed: {}", out.stderr.trim()),
            ))
        }
    }
}

/// Escape text for `input text` inside a single-quoted shell word: spaces
/// become `%s` (the tool's own convention) and quotes are shell-escaped.
fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            ' ' => out.push_str("%s"),
            '\'' => out.push_str("'\\''"),
            _ => out.push(ch),
        }
    }
    out
}

#[async_trait::async_trait]
impl InputStrategy for ShellInput {
    fn name(&self) -> &str {
        "shell"
    }

    fn requires_privilege(&self) -> bool {
        self.privileged
    }

    async fn tap(&self, x: i32, y: i32) -> Result<()> {
        self.input(&format!("tap {x} {y}"), Duration::ZERO).await
    }

    async fn long_press(&self, x: i32, y: i32, duration: Duration) -> Result<()> {
        // A zero-distance swipe is the canonical long press.
        let ms = duration.as_millis();
        self.input(&format!("swipe {x} {y} {x} {y} {ms}"), duration).await
    }

    async fn swipe(&self, from: (i32, i32), to: (i32, i32), duration: Duration) -> Result<()> {
        let ms = duration.as_millis();
        self.input(
            &format!("swipe {} {} {} {} {ms}", from.0, from.1, to.0, to.1),
            duration,
        )
        .await
    }

    async fn key_event(&self, key_code: i32) -> Result<()> {
        self.input(&format!("keyevent {key_code}"), Duration::ZERO).await
    }

    async fn input_text(&self, text: &str) -> Result<()> {
        self.input(&format!("text '{}'", escape_input_text(text)), Duration::ZERO)
            .await
    }

    async fn gesture(&self, points: &[(i32, i32)], duration: Duration) -> Result<()> {
        if points.len() < 2 {
            return Err(AgentError::new(
                codes::GESTURE_FAILED,
                "gesture needs at least two points",
            ));
        }
        // The shell tool has no multi-point gesture; approximate the path
        // with consecutive swipes sharing the duration budget.
        let segments = points.len() - 1;
        let per_segment =
            Duration::from_millis((duration.as_millis() as u64 / segments as u64).max(1));
        for pair in points.windows(2) {
            self.swipe(pair[0], pair[1], per_segment).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_escaping_covers_spaces_and_quotes() {
        assert_eq!(escape_input_text("hello world"), "hello%sworld");
        assert_eq!(escape_input_text("it's"), "it'\\''s");
        assert_eq!(escape_input_text("plain"), "plain");
    }
}
