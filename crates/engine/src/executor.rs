//! Action execution
//!
//! The scheduler hands each cache miss to an [`Executor`]. [`HostExecutor`]
//! runs the action as a child process of the build.

use crate::ExecutionError;
use crate::outputs::clear_outputs;
use async_trait::async_trait;
use kiln_graph::{Action, Label};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Lines of stdout/stderr kept in a failure summary
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 20;

/// Everything an executor needs to run one target's action.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Target being built
    pub label: Label,
    /// The action to run
    pub action: Action,
    /// Absolute paths of the target's sources
    pub sources: Vec<PathBuf>,
    /// Absolute paths of the outputs of the target's dependencies
    pub inputs: Vec<PathBuf>,
    /// Declared outputs, relative to `workdir`
    pub outputs: Vec<String>,
    /// Directory the action runs in and writes its outputs to
    pub workdir: PathBuf,
    /// Workspace root
    pub workspace_root: PathBuf,
}

/// Result of a successful action.
#[derive(Debug, Clone)]
pub struct ActionOutput {
    /// Absolute paths of the declared outputs
    pub outputs: Vec<PathBuf>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock time of the action
    pub duration: Duration,
}

/// Runs build actions.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the action and return its outputs.
    ///
    /// Dropping the returned future must stop the action.
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutput, ExecutionError>;

    /// Get the name of this executor
    fn name(&self) -> &'static str;
}

/// Runs actions as local processes with a cleared environment.
#[derive(Debug, Clone)]
pub struct HostExecutor {
    max_output_lines: usize,
}

impl Default for HostExecutor {
    fn default() -> Self {
        Self {
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
        }
    }
}

impl HostExecutor {
    /// Create a host executor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the captured output quoted in failure summaries
    #[must_use]
    pub const fn with_max_output_lines(mut self, lines: usize) -> Self {
        self.max_output_lines = lines;
        self
    }

    fn command(request: &ActionRequest) -> Command {
        let mut cmd = Command::new(&request.action.command);
        cmd.args(&request.action.args);
        cmd.current_dir(&request.workdir);

        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        for (key, value) in &request.action.env {
            cmd.env(key, value);
        }
        cmd.env("KILN_ROOT", &request.workspace_root);
        cmd.env("KILN_OUT", &request.workdir);
        cmd.env("KILN_SRCS", join_paths(&request.sources));
        cmd.env("KILN_INPUTS", join_paths(&request.inputs));

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Executor for HostExecutor {
    #[tracing::instrument(
        name = "host_execute",
        skip(self, request),
        fields(label = %request.label, command = %request.action.command)
    )]
    async fn execute(&self, request: ActionRequest) -> Result<ActionOutput, ExecutionError> {
        if request.action.command.trim().is_empty() {
            return Err(ExecutionError::EmptyCommand {
                label: request.label,
            });
        }

        clear_outputs(&request.label, &request.workdir, &request.outputs).await?;

        let started = Instant::now();
        let output = Self::command(&request)
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                label: request.label.clone(),
                command: request.action.command.clone(),
                source,
            })?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code();
            tracing::warn!(exit = ?code, "Action failed");
            return Err(ExecutionError::Failed {
                summary: summarize_failure(&request.label, code, &stdout, &stderr, self.max_output_lines),
                label: request.label,
                code,
            });
        }

        let mut outputs = Vec::with_capacity(request.outputs.len());
        for declared in &request.outputs {
            let path = request.workdir.join(declared);
            if tokio::fs::symlink_metadata(&path).await.is_err() {
                return Err(ExecutionError::MissingOutput {
                    label: request.label,
                    output: declared.clone(),
                });
            }
            outputs.push(path);
        }

        tracing::debug!(duration_ms = duration.as_millis(), "Action succeeded");
        Ok(ActionOutput {
            outputs,
            stdout,
            stderr,
            duration,
        })
    }

    fn name(&self) -> &'static str {
        "host"
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn summarize_failure(
    label: &Label,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    max_output_lines: usize,
) -> String {
    let exit = code.map_or_else(|| "a signal".to_string(), |c| format!("exit code {c}"));
    let mut sections = vec![format!("Action for {label} failed with {exit}.")];

    let streams = [("stdout", stdout), ("stderr", stderr)]
        .into_iter()
        .filter_map(|(name, content)| summarize_stream(name, content, max_output_lines))
        .collect::<Vec<_>>();
    if streams.is_empty() {
        sections.push("No output was captured.".to_string());
    } else {
        sections.extend(streams);
    }
    sections.join("\n\n")
}

fn summarize_stream(name: &str, content: &str, max_output_lines: usize) -> Option<String> {
    let normalized = content.trim_end();
    if normalized.is_empty() {
        return None;
    }

    let lines: Vec<&str> = normalized.lines().collect();
    let total = lines.len();
    let start = total.saturating_sub(max_output_lines);
    let snippet = lines[start..].join("\n");

    let header = if total > max_output_lines {
        format!("{name} (last {max_output_lines} of {total} lines):")
    } else {
        format!("{name}:")
    };
    Some(format!("{header}\n{snippet}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &TempDir, action: Action, outputs: &[&str]) -> ActionRequest {
        ActionRequest {
            label: Label::parse("//pkg:t").unwrap(),
            action,
            sources: vec![dir.path().join("src/a.txt")],
            inputs: vec![],
            outputs: outputs.iter().map(ToString::to_string).collect(),
            workdir: dir.path().join("out/pkg"),
            workspace_root: dir.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn runs_in_output_dir_and_collects_outputs() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, Action::shell("mkdir -p gen && echo hi > gen/out.txt"), &["gen/out.txt"]);
        let output = HostExecutor::new().execute(req).await.unwrap();
        assert_eq!(output.outputs, vec![dir.path().join("out/pkg/gen/out.txt")]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/pkg/gen/out.txt")).unwrap(),
            "hi\n"
        );
    }

    #[tokio::test]
    async fn escaping_output_is_refused_before_running() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("victim")).unwrap();
        std::fs::write(dir.path().join("victim/precious.txt"), "keep").unwrap();

        let req = request(&dir, Action::shell("touch ran"), &["../../victim"]);
        let err = HostExecutor::new().execute(req).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidOutput { .. }), "{err:?}");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("victim/precious.txt")).unwrap(),
            "keep"
        );
        assert!(!dir.path().join("out/pkg/ran").exists());
    }

    #[tokio::test]
    async fn environment_is_cleared_and_seeded() {
        let dir = TempDir::new().unwrap();
        let action = Action::shell(
            "printf '%s|%s|%s|%s|%s' \"$KILN_ROOT\" \"$KILN_OUT\" \"$KILN_SRCS\" \"$GREETING\" \"${HOME:-unset}\" > env.txt",
        )
        .with_env("GREETING", "hello");
        let req = request(&dir, action, &["env.txt"]);
        HostExecutor::new().execute(req).await.unwrap();

        let env = std::fs::read_to_string(dir.path().join("out/pkg/env.txt")).unwrap();
        let root = dir.path().display();
        assert_eq!(
            env,
            format!("{root}|{root}/out/pkg|{root}/src/a.txt|hello|unset")
        );
    }

    #[tokio::test]
    async fn failure_carries_exit_code_and_output_tail() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, Action::shell("seq 1 50; echo boom >&2; exit 3"), &[]);
        let err = HostExecutor::new()
            .with_max_output_lines(5)
            .execute(req)
            .await
            .unwrap_err();
        let ExecutionError::Failed { code, summary, .. } = err else {
            panic!("expected action failure, got {err:?}");
        };
        assert_eq!(code, Some(3));
        assert!(summary.contains("exit code 3"));
        assert!(summary.contains("stdout (last 5 of 50 lines):"));
        assert!(summary.contains("50"));
        assert!(!summary.contains("\n45\n"));
        assert!(summary.contains("stderr:\nboom"));
    }

    #[tokio::test]
    async fn missing_declared_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, Action::shell("true"), &["never.txt"]);
        let err = HostExecutor::new().execute(req).await.unwrap_err();
        assert!(matches!(err, ExecutionError::MissingOutput { ref output, .. } if output == "never.txt"));
    }

    #[tokio::test]
    async fn stale_outputs_do_not_satisfy_the_check() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("out/pkg")).unwrap();
        std::fs::write(dir.path().join("out/pkg/result"), "old").unwrap();
        let req = request(&dir, Action::shell("true"), &["result"]);
        let err = HostExecutor::new().execute(req).await.unwrap_err();
        assert!(matches!(err, ExecutionError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn empty_command_and_missing_program() {
        let dir = TempDir::new().unwrap();
        let err = HostExecutor::new()
            .execute(request(&dir, Action::new("", Vec::<String>::new()), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::EmptyCommand { .. }));

        let err = HostExecutor::new()
            .execute(request(&dir, Action::new("kiln-no-such-program", ["x"]), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }

    #[test]
    fn stream_summary_omits_empty_streams() {
        assert!(summarize_stream("stdout", "  \n", 10).is_none());
        assert_eq!(summarize_stream("stderr", "a\nb\n", 10).unwrap(), "stderr:\na\nb");
    }
}
