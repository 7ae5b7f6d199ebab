use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::error::ToolError;

/// Captured result of one external process.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Stdout worth parsing. Most scanners exit non-zero when they find
    /// something, so the exit code alone does not mean failure.
    pub fn usable_stdout(self, tool: &str) -> Result<Option<String>, ToolError> {
        if !self.stdout.trim().is_empty() {
            return Ok(Some(self.stdout));
        }
        if self.status.success() {
            return Ok(None);
        }
        Err(ToolError::Exit {
            tool: tool.to_string(),
            code: self.status.code(),
            stderr: truncate(self.stderr.trim(), 2000),
        })
    }
}

/// One bounded invocation of an external binary.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    tool: String,
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(tool: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self) -> Result<ToolOutput, ToolError> {
        tracing::info!(tool = %self.tool, program = %self.program, args = ?self.args, "Launching external tool");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotInstalled {
                    tool: self.tool.clone(),
                    command: self.program.clone(),
                }
            } else {
                ToolError::Spawn {
                    tool: self.tool.clone(),
                    source: e,
                }
            }
        })?;

        // Dropping the pending future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::Spawn {
                tool: self.tool.clone(),
                source: e,
            })?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool: self.tool.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = ToolCommand::new("echo", "sh")
            .args(["-c", "echo '{\"results\": []}'"])
            .timeout(Duration::from_secs(10))
            .run()
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.usable_stdout("echo").unwrap().unwrap().trim(), "{\"results\": []}");
    }

    #[tokio::test]
    async fn missing_binary_is_not_installed() {
        let err = ToolCommand::new("ghost", "/nonexistent/ghost-scanner")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotInstalled { .. }));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = ToolCommand::new("sleeper", "sleep")
            .arg("5")
            .timeout(Duration::from_millis(100))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn failing_exit_without_output_is_an_error() {
        let out = ToolCommand::new("false", "sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run()
            .await
            .unwrap();
        match out.usable_stdout("false") {
            Err(ToolError::Exit { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_with_output_is_usable() {
        let out = ToolCommand::new("findings", "sh")
            .args(["-c", "echo '[]'; exit 1"])
            .run()
            .await
            .unwrap();
        assert_eq!(out.usable_stdout("findings").unwrap().as_deref().map(str::trim), Some("[]"));
    }
}
