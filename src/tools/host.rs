//! Host command bridge
//!
//! Runs code and commands on the local machine for the execution tools.

use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::{Error, Result};

/// Default limit on a single host command
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of a host command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status zero
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes code and launches applications on the host
#[async_trait]
pub trait HostCommandBridge: Send + Sync {
    /// Run a Python program
    async fn execute_python(&self, code: &str) -> Result<CommandOutput>;

    /// Run a PowerShell command
    async fn execute_powershell(&self, command: &str) -> Result<CommandOutput>;

    /// Install a pip package
    async fn install_python_package(&self, package: &str) -> Result<CommandOutput>;

    /// Run a command line through the platform shell
    async fn execute_shell(&self, command: &str) -> Result<CommandOutput>;

    /// Launch a desktop application by name
    async fn launch_app(&self, app_name: &str) -> Result<()>;
}

/// Bridge that spawns local processes
#[derive(Debug, Clone)]
pub struct ProcessBridge {
    python: String,
    timeout: Duration,
}

impl Default for ProcessBridge {
    fn default() -> Self {
        Self {
            python: default_python().to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ProcessBridge {
    /// Create a bridge with default interpreter and timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-command timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the Python interpreter
    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    async fn run(&self, mut cmd: Command, label: &str) -> Result<CommandOutput> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::ToolExecution(format!("failed to spawn {label}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::ToolExecution(format!("{label} timed out after {:?}", self.timeout))
            })?
            .map_err(|e| Error::ToolExecution(format!("{label} process error: {e}")))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        tracing::debug!(
            command = label,
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            "host command finished"
        );

        Ok(result)
    }
}

#[async_trait]
impl HostCommandBridge for ProcessBridge {
    async fn execute_python(&self, code: &str) -> Result<CommandOutput> {
        let mut script = tempfile::Builder::new()
            .prefix("voicelink-")
            .suffix(".py")
            .tempfile()?;
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let mut cmd = Command::new(&self.python);
        cmd.arg(script.path());

        // Script file lives until the process has finished
        let result = self.run(cmd, "python").await;
        drop(script);
        result
    }

    async fn execute_powershell(&self, command: &str) -> Result<CommandOutput> {
        let program = if cfg!(windows) { "powershell" } else { "pwsh" };
        let mut cmd = Command::new(program);
        cmd.args(["-NoProfile", "-Command", command]);
        self.run(cmd, "powershell").await
    }

    async fn install_python_package(&self, package: &str) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "pip", "install", package]);
        self.run(cmd, "pip").await
    }

    async fn execute_shell(&self, command: &str) -> Result<CommandOutput> {
        let cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        self.run(cmd, "shell").await
    }

    async fn launch_app(&self, app_name: &str) -> Result<()> {
        let mut cmd = if cfg!(target_os = "macos") {
            let mut c = Command::new("open");
            c.args(["-a", app_name]);
            c
        } else if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", "", app_name]);
            c
        } else {
            Command::new(app_name.to_lowercase())
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Detached: the application outlives the tool call
        cmd.spawn()
            .map_err(|e| Error::ToolExecution(format!("failed to launch {app_name}: {e}")))?;

        tracing::info!(app = app_name, "application launched");
        Ok(())
    }
}

const fn default_python() -> &'static str {
    if cfg!(windows) { "python" } else { "python3" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_captures_output_and_exit_code() {
        let bridge = ProcessBridge::new();

        let ok = bridge.execute_shell("echo hello").await.unwrap();
        assert_eq!(ok.stdout.trim(), "hello");
        assert!(ok.succeeded());

        let failed = bridge.execute_shell("echo oops >&2; exit 3").await.unwrap();
        assert_eq!(failed.exit_code, 3);
        assert_eq!(failed.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_timeout_is_tool_error() {
        let bridge = ProcessBridge::new().with_timeout(Duration::from_millis(100));
        let err = bridge.execute_shell("sleep 5").await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution(_)));
    }

    #[tokio::test]
    async fn missing_interpreter_is_tool_error() {
        let bridge = ProcessBridge::new().with_python("/nonexistent/python-for-tests");
        let err = bridge.execute_python("print(1)").await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution(_)));
    }
}
