//! Process execution seam shared by the cowshed drivers.
//!
//! Every external tool invocation (btrfs-progs, chattr, exportfs) goes
//! through the [`Runner`] trait so driver tests can substitute a recording
//! fake for the real binaries. The production [`ShellRunner`] captures
//! combined stdout+stderr and returns it even on failure, because callers
//! inspect the output for tool-specific substrings.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// What went wrong while running an external command.
#[derive(Debug, Error)]
pub enum CommandErrorKind {
    /// The process could not be spawned at all.
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
    /// The process ran but exited non-zero (or was killed).
    #[error("exit status {0}")]
    Exit(std::process::ExitStatus),
}

/// Error from an external command, carrying the combined stdout+stderr
/// captured before the failure so callers can inspect it.
#[derive(Debug, Error)]
#[error("{bin} {}: {kind}: {}", .args.join(" "), .output.trim())]
pub struct CommandError {
    /// Program that was invoked.
    pub bin: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Combined stdout and stderr of the failed invocation.
    pub output: String,
    /// Underlying failure.
    #[source]
    pub kind: CommandErrorKind,
}

impl CommandError {
    /// Builds a non-zero-exit error with the given output. Used by test
    /// fakes that never spawn a real process.
    pub fn failed(bin: &str, args: &[String], output: impl Into<String>) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            bin: bin.to_string(),
            args: args.to_vec(),
            output: output.into(),
            kind: CommandErrorKind::Exit(std::process::ExitStatus::from_raw(1 << 8)),
        }
    }
}

/// Executes external commands and returns their combined output.
///
/// Abstracted behind a trait so tests can record calls and serve canned
/// output instead of shelling out.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `bin` with `args` and returns the combined stdout+stderr.
    async fn run(&self, bin: &str, args: &[&str]) -> Result<String, CommandError>;
}

/// [`Runner`] backed by real process execution.
///
/// The child is killed when the returned future is dropped, so callers get
/// cancellation by simply abandoning the call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

#[async_trait]
impl Runner for ShellRunner {
    async fn run(&self, bin: &str, args: &[&str]) -> Result<String, CommandError> {
        let owned_args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let result = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(err) => {
                return Err(CommandError {
                    bin: bin.to_string(),
                    args: owned_args,
                    output: String::new(),
                    kind: CommandErrorKind::Spawn(err),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));

        if out.status.success() {
            Ok(combined)
        } else {
            Err(CommandError {
                bin: bin.to_string(),
                args: owned_args,
                output: combined,
                kind: CommandErrorKind::Exit(out.status),
            })
        }
    }
}

/// Per-call response function for [`MockRunner`]. An `Err(text)` becomes a
/// non-zero-exit [`CommandError`] whose output is `text`.
pub type MockHandler = Box<dyn Fn(&str, &[&str]) -> Result<String, String> + Send + Sync>;

/// Recording fake for tests: never spawns a process, records every call,
/// and serves canned responses.
///
/// Configure a fixed response with [`MockRunner::with_output`] or
/// [`MockRunner::with_failure`], or dynamic per-call behavior with
/// [`MockRunner::with_handler`].
#[derive(Default)]
pub struct MockRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    output: String,
    fail_output: Option<String>,
    handler: Option<MockHandler>,
}

impl MockRunner {
    /// A mock that succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock that succeeds with the given output on every call.
    pub fn with_output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    /// A mock that fails every call, with the given text as the command's
    /// combined output.
    pub fn with_failure(output: impl Into<String>) -> Self {
        Self {
            fail_output: Some(output.into()),
            ..Self::default()
        }
    }

    /// A mock that dispatches each call to `handler`.
    pub fn with_handler(
        handler: impl Fn(&str, &[&str]) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    /// All recorded calls as `(bin, args)` pairs, in invocation order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("mock call log poisoned").clone()
    }

    /// Number of calls recorded so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock call log poisoned").len()
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn run(&self, bin: &str, args: &[&str]) -> Result<String, CommandError> {
        let owned_args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.calls
            .lock()
            .expect("mock call log poisoned")
            .push((bin.to_string(), owned_args.clone()));

        if let Some(handler) = &self.handler {
            return handler(bin, args)
                .map_err(|output| CommandError::failed(bin, &owned_args, output));
        }
        if let Some(output) = &self.fail_output {
            return Err(CommandError::failed(bin, &owned_args, output.clone()));
        }
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_runner_captures_output() {
        let out = ShellRunner.run("echo", &["hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_shell_runner_failure_keeps_output() {
        let err = ShellRunner
            .run("sh", &["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();
        assert!(err.output.contains("oops"));
        assert!(matches!(err.kind, CommandErrorKind::Exit(_)));
    }

    #[tokio::test]
    async fn test_shell_runner_spawn_error() {
        let err = ShellRunner
            .run("/nonexistent/cowshed-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err.kind, CommandErrorKind::Spawn(_)));
        assert!(err.output.is_empty());
    }

    #[tokio::test]
    async fn test_mock_records_calls_in_order() {
        let mock = MockRunner::with_output("ok");
        mock.run("btrfs", &["subvolume", "create", "/a"]).await.unwrap();
        mock.run("exportfs", &["-v"]).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "btrfs");
        assert_eq!(calls[0].1, vec!["subvolume", "create", "/a"]);
        assert_eq!(calls[1].0, "exportfs");
    }

    #[tokio::test]
    async fn test_mock_failure_carries_output() {
        let mock = MockRunner::with_failure("Could not find export");
        let err = mock.run("exportfs", &["-u", "host:/p"]).await.unwrap_err();
        assert!(err.output.contains("Could not find"));
    }

    #[tokio::test]
    async fn test_mock_handler_dispatch() {
        let mock = MockRunner::with_handler(|bin, args| {
            if bin == "btrfs" && args.contains(&"--version") {
                Ok("btrfs-progs v6.8".to_string())
            } else {
                Err("unknown call".to_string())
            }
        });

        let out = mock.run("btrfs", &["--version"]).await.unwrap();
        assert!(out.starts_with("btrfs-progs"));
        assert!(mock.run("btrfs", &["quota"]).await.is_err());
    }

    #[test]
    fn test_command_error_display_includes_args_and_output() {
        let err = CommandError::failed(
            "btrfs",
            &["subvolume".to_string(), "create".to_string()],
            "no space left\n",
        );
        let text = err.to_string();
        assert!(text.contains("btrfs subvolume create"));
        assert!(text.contains("no space left"));
    }
}
