//! Build invocation: one external process per qualifying change.
//!
//! Builds are fire-and-forget. Several may run at once and their output is
//! printed in completion order.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::Command;
use tokio::task::JoinHandle;

use devloop_core::{indent, BuildCommand};

use crate::error::DaemonError;

/// Seam between the watch loop and whatever runs the build.
pub trait Rebuild: Send + Sync {
    /// Start a build without waiting for it.
    fn rebuild(&self);
}

/// Captured result of one build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub stdout: String,
    pub stderr: String,
    /// Logged only; a failing build is reported through its output.
    pub status: ExitStatus,
}

impl BuildOutput {
    /// Indented console blocks, stdout first, skipping empty streams.
    pub fn render(&self) -> Vec<String> {
        [&self.stdout, &self.stderr]
            .into_iter()
            .filter(|text| !text.is_empty())
            .map(|text| indent(text))
            .collect()
    }

    pub fn report(&self) {
        for block in self.render() {
            println!("{block}");
        }
    }
}

/// Run `command` in `cwd` to completion and capture its output.
pub async fn run_build(command: &BuildCommand, cwd: &Path) -> Result<BuildOutput, DaemonError> {
    let output = Command::new(&command.program)
        .args(&command.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| DaemonError::BuildSpawn {
            command: command.to_string(),
            source,
        })?;

    Ok(BuildOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status,
    })
}

/// Spawns the configured build command on the tokio runtime.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    command: Arc<BuildCommand>,
    cwd: Arc<PathBuf>,
}

impl BuildRunner {
    pub fn new(command: BuildCommand, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: Arc::new(command),
            cwd: Arc::new(cwd.into()),
        }
    }

    /// Spawn one build and print its output when it finishes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self) -> JoinHandle<Option<BuildOutput>> {
        let command = self.command.clone();
        let cwd = self.cwd.clone();
        tokio::spawn(async move {
            match run_build(&command, &cwd).await {
                Ok(output) => {
                    tracing::debug!(command = %command, status = %output.status, "build finished");
                    output.report();
                    Some(output)
                }
                Err(err) => {
                    tracing::error!(error = %err, "build did not run");
                    None
                }
            }
        })
    }
}

impl Rebuild for BuildRunner {
    fn rebuild(&self) {
        drop(self.spawn());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> BuildCommand {
        BuildCommand::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn captures_stdout() {
        let dir = TempDir::new().expect("tempdir");
        let output = run_build(&sh("echo Compiled successfully"), dir.path())
            .await
            .expect("build");
        assert_eq!(output.stdout, "Compiled successfully\n");
        assert!(output.stderr.is_empty());
        assert_eq!(output.render(), vec!["  Compiled successfully\n  ".to_string()]);
    }

    #[tokio::test]
    async fn failing_build_is_reported_through_stderr() {
        let dir = TempDir::new().expect("tempdir");
        let script = "echo partial; echo 'error: bad syntax' >&2; exit 3";
        let output = run_build(&sh(script), dir.path())
            .await
            .expect("a failing build still yields output");
        assert!(!output.status.success());
        assert_eq!(
            output.render(),
            vec!["  partial\n  ".to_string(), "  error: bad syntax\n  ".to_string()]
        );
    }

    #[tokio::test]
    async fn silent_build_renders_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let output = run_build(&sh("true"), dir.path()).await.expect("build");
        assert!(output.render().is_empty());
    }

    #[tokio::test]
    async fn runs_in_given_directory() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("gleam.toml"), "name = \"app\"\n").expect("write");
        let output = run_build(&BuildCommand::new("ls", Vec::<String>::new()), dir.path())
            .await
            .expect("build");
        assert!(output.stdout.contains("gleam.toml"), "got: {}", output.stdout);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = TempDir::new().expect("tempdir");
        let command = BuildCommand::new("devloop-no-such-build-tool", Vec::<String>::new());
        let err = run_build(&command, dir.path()).await.unwrap_err();
        assert!(matches!(err, DaemonError::BuildSpawn { .. }), "got: {err}");
        assert!(err.to_string().contains("devloop-no-such-build-tool"));
    }

    #[tokio::test]
    async fn runner_spawns_independent_builds() {
        let dir = TempDir::new().expect("tempdir");
        let runner = BuildRunner::new(sh("echo x >> builds.log"), dir.path());

        let first = runner.spawn();
        let second = runner.spawn();
        assert!(first.await.expect("join").is_some());
        assert!(second.await.expect("join").is_some());

        let log = std::fs::read_to_string(dir.path().join("builds.log")).expect("log");
        assert_eq!(log.lines().count(), 2);
    }

    #[tokio::test]
    async fn runner_survives_spawn_failure() {
        let dir = TempDir::new().expect("tempdir");
        let runner = BuildRunner::new(
            BuildCommand::new("devloop-no-such-build-tool", Vec::<String>::new()),
            dir.path(),
        );
        assert!(runner.spawn().await.expect("join").is_none());
    }
}
