use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Exit code reported when the program cannot be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported for timeouts, signals and spawn errors.
pub const EXIT_ABNORMAL: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    fn abnormal(exit_code: i32, message: String) -> Self {
        Self::new(exit_code, String::new(), message)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// What gets recorded as the job's `error_message` on failure.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("Command exited with code {}", self.exit_code)
        } else {
            stderr.to_string()
        }
    }
}

/// Executes a job's command. Never fails: problems running the command are
/// reported through a non-zero `exit_code`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutput;
}

/// Runs commands through `sh -c` with a hard timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: "sh".to_string(),
            timeout,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CommandOutput::abnormal(
                    EXIT_NOT_FOUND,
                    format!("Command not found: {}", self.shell),
                );
            }
            Err(e) => {
                return CommandOutput::abnormal(
                    EXIT_ABNORMAL,
                    format!("Error executing command: {e}"),
                );
            }
        };

        // Dropping the child on timeout kills it (kill_on_drop).
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => CommandOutput {
                exit_code: out.status.code().unwrap_or(EXIT_ABNORMAL),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            },
            Ok(Err(e)) => {
                CommandOutput::abnormal(EXIT_ABNORMAL, format!("Error executing command: {e}"))
            }
            Err(_) => CommandOutput::abnormal(
                EXIT_ABNORMAL,
                format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs_f64()
                ),
            ),
        }
    }
}
