//! Sandboxed shell execution

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;

use voice_gateway_config::ToolSettings;

use crate::schema::{required_str, InputSchema, PropertySchema, Tool, ToolSchema};
use crate::ToolError;

const MAX_STDOUT_CHARS: usize = 4000;
const MAX_STDERR_CHARS: usize = 2000;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub struct RunCommandTool {
    blocked: Vec<String>,
    working_dir: Option<String>,
    timeout: Duration,
    demo: bool,
}

impl RunCommandTool {
    pub fn new(settings: &ToolSettings, demo: bool) -> Self {
        Self {
            blocked: settings.blocked_commands.clone(),
            working_dir: settings.allowed_paths.first().cloned(),
            timeout: Duration::from_secs(settings.command_timeout_secs),
            demo,
        }
    }

    /// Reason the command may not run, if any
    fn blocked_reason(&self, command: &str) -> Option<String> {
        let lower = command.trim().to_lowercase();
        if let Some(pattern) = self
            .blocked
            .iter()
            .find(|b| lower.contains(&b.to_lowercase()))
        {
            return Some(format!("Blocked: command contains '{}'", pattern));
        }
        if lower.starts_with("sudo ") {
            return Some("Blocked: sudo not allowed in voice agent".to_string());
        }
        None
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its output. Destructive commands are blocked. 30-second timeout."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: InputSchema::object()
                .property("command", PropertySchema::string("The shell command to execute"), true)
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let command = required_str(&input, "command")?;

        if let Some(reason) = self.blocked_reason(command) {
            tracing::warn!(command = %command, reason = %reason, "Blocked command");
            return Ok(reason);
        }

        if self.demo {
            return Ok(format!("DEMO: Would execute: {}", command));
        }

        tracing::info!(command = %command, "Executing command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.working_dir.as_deref() {
            if std::path::Path::new(dir).is_dir() {
                cmd.current_dir(dir);
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::execution(e.to_string()))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::execution(e.to_string()))?,
            Err(_) => {
                return Err(ToolError::execution(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let (stdout, stderr) = (stdout.trim(), stderr.trim());

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(truncate_chars(stdout, MAX_STDOUT_CHARS));
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR: {}", truncate_chars(stderr, MAX_STDERR_CHARS)));
        }
        if !output.status.success() {
            match output.status.code() {
                Some(code) => parts.push(format!("Exit code: {}", code)),
                None => parts.push("Exit code: terminated by signal".to_string()),
            }
        }

        if parts.is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(parts.join("\n"))
        }
    }

    /// Registry ceiling sits above the command's own timeout
    fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs() + 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn test_blocked_reason() {
        let tool = RunCommandTool::new(&ToolSettings::default(), false);
        assert_eq!(
            tool.blocked_reason("sudo reboot now").as_deref(),
            Some("Blocked: command contains 'reboot'")
        );
        assert_eq!(
            tool.blocked_reason("SUDO ls").as_deref(),
            Some("Blocked: sudo not allowed in voice agent")
        );
        assert!(tool.blocked_reason("ls -la").is_none());
    }
}
