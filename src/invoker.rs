//! Test invoker: runs the configured test command against one commit's changed files.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::config::{TestCommand, FILES_PLACEHOLDER};
use crate::errors::WalkError;
use crate::model::ChangedFileSet;
use crate::util::{ExecRequest, ExecService};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed {
        exit_code: Option<i32>,
        timed_out: bool,
    },
    /// No changed file matched the pattern; the test command was not run.
    Skipped,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed { .. } => "failed",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Result of one commit's test run, in walk order.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub commit_id: String,
    pub outcome: Outcome,
    pub duration: Duration,
    /// Tail of the combined stdout/stderr; empty when skipped.
    pub output: String,
}

pub struct TestInvoker<'a> {
    command: &'a TestCommand,
    exec: ExecService,
}

impl<'a> TestInvoker<'a> {
    pub fn new(command: &'a TestCommand) -> Self {
        Self {
            command,
            exec: ExecService::new(Duration::ZERO),
        }
    }

    /// Configured args with the files substituted for a lone `{files}` argument, or
    /// appended when no placeholder is present.
    pub fn build_args(&self, files: &ChangedFileSet) -> Vec<String> {
        let mut out = Vec::with_capacity(self.command.args.len() + files.len());
        let mut substituted = false;
        for arg in &self.command.args {
            if arg == FILES_PLACEHOLDER {
                out.extend(files.iter().cloned());
                substituted = true;
            } else {
                out.push(arg.clone());
            }
        }
        if !substituted {
            out.extend(files.iter().cloned());
        }
        out
    }

    /// Run the test command in `workdir`, streaming its output to `sink`.
    ///
    /// An empty file set short-circuits to `Skipped` without spawning anything. A non-zero
    /// exit is a `Failed` outcome; only a failure to start the process is an error.
    pub fn run(
        &self,
        commit_id: &str,
        workdir: &Path,
        files: &ChangedFileSet,
        sink: &mut dyn Write,
    ) -> Result<TestOutcome, WalkError> {
        if files.is_empty() {
            debug!(commit = %commit_id, "no matching files; skipping test run");
            return Ok(TestOutcome {
                commit_id: commit_id.to_string(),
                outcome: Outcome::Skipped,
                duration: Duration::ZERO,
                output: String::new(),
            });
        }

        let mut request = ExecRequest::new(&self.command.command)
            .args(self.build_args(files))
            .cwd(workdir)
            .isolate_process_group(true);
        if let Some(t) = self.command.timeout() {
            request = request.timeout(t);
        }
        let display = request.display();
        let out = self
            .exec
            .stream(request, sink)
            .map_err(|e| WalkError::TestInvocationFailed {
                command: display,
                source: e.into_io(),
            })?;

        let outcome = if out.timed_out {
            Outcome::Failed {
                exit_code: None,
                timed_out: true,
            }
        } else if out.status.success() {
            Outcome::Passed
        } else {
            Outcome::Failed {
                exit_code: out.status.code(),
                timed_out: false,
            }
        };
        Ok(TestOutcome {
            commit_id: commit_id.to_string(),
            outcome,
            duration: out.duration,
            output: out.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> ChangedFileSet {
        paths.iter().map(|s| s.to_string()).collect()
    }

    fn command(cmd: &str, args: &[&str]) -> TestCommand {
        TestCommand {
            command: cmd.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: None,
        }
    }

    #[test]
    fn test_build_args_appends_by_default() {
        let cmd = command("cargo", &["test", "--"]);
        let inv = TestInvoker::new(&cmd);
        assert_eq!(
            inv.build_args(&files(&["b.rs", "a.rs"])),
            vec!["test", "--", "a.rs", "b.rs"]
        );
    }

    #[test]
    fn test_build_args_substitutes_placeholder() {
        let cmd = command("pytest", &["-q", "{files}", "--maxfail=1"]);
        let inv = TestInvoker::new(&cmd);
        assert_eq!(
            inv.build_args(&files(&["t/test_x.py"])),
            vec!["-q", "t/test_x.py", "--maxfail=1"]
        );
    }

    #[test]
    fn test_empty_files_skip_without_spawning() {
        // The command does not exist; a spawn attempt would be an error.
        let cmd = command("walkcheck-definitely-missing-binary", &[]);
        let inv = TestInvoker::new(&cmd);
        let mut sink = Vec::new();
        let td = tempfile::tempdir().expect("tmpdir");
        let out = inv
            .run("abc", td.path(), &ChangedFileSet::default(), &mut sink)
            .expect("skip is not an error");
        assert_eq!(out.outcome, Outcome::Skipped);
        assert!(sink.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failed_outcome() {
        let cmd = command("sh", &["-c", "echo checking \"$@\"; exit 7", "sh"]);
        let inv = TestInvoker::new(&cmd);
        let mut sink = Vec::new();
        let td = tempfile::tempdir().expect("tmpdir");
        let out = inv
            .run("abc", td.path(), &files(&["x.txt"]), &mut sink)
            .expect("failure is an outcome");
        assert_eq!(
            out.outcome,
            Outcome::Failed {
                exit_code: Some(7),
                timed_out: false
            }
        );
        assert!(out.output.contains("checking x.txt"));
        assert!(String::from_utf8_lossy(&sink).contains("checking x.txt"));
    }

    #[test]
    fn test_missing_executable_is_invocation_error() {
        let cmd = command("walkcheck-definitely-missing-binary", &[]);
        let inv = TestInvoker::new(&cmd);
        let mut sink = Vec::new();
        let td = tempfile::tempdir().expect("tmpdir");
        let err = inv
            .run("abc", td.path(), &files(&["x.txt"]), &mut sink)
            .unwrap_err();
        assert!(matches!(err, WalkError::TestInvocationFailed { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_is_failed_outcome() {
        let cmd = TestCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string(), "sh".to_string()],
            timeout_secs: Some(1),
        };
        let inv = TestInvoker::new(&cmd);
        let mut sink = Vec::new();
        let td = tempfile::tempdir().expect("tmpdir");
        let out = inv
            .run("abc", td.path(), &files(&["x.txt"]), &mut sink)
            .expect("timeout is an outcome");
        assert_eq!(
            out.outcome,
            Outcome::Failed {
                exit_code: None,
                timed_out: true
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_background_process_does_not_hold_up_the_result() {
        let cmd = command("sh", &["-c", "sleep 30 & echo done; exit 0", "sh"]);
        let inv = TestInvoker::new(&cmd);
        let mut sink = Vec::new();
        let td = tempfile::tempdir().expect("tmpdir");
        let started = std::time::Instant::now();
        let out = inv
            .run("abc", td.path(), &files(&["x.txt"]), &mut sink)
            .expect("run");
        assert!(started.elapsed() < Duration::from_secs(5), "blocked {:?}", started.elapsed());
        assert!(out.duration < Duration::from_secs(5));
        assert_eq!(out.outcome, Outcome::Passed);
        assert!(out.output.contains("done"));
    }
}
