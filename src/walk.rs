//! Revision walk orchestrator.
//!
//! Resolves the commit range, provisions one worktree, runs setup, then replays each commit
//! in ancestry order: checkout, diff against the previously processed commit, filter, test,
//! report. The worktree is torn down in exactly one place after the loop, whatever the loop
//! returned.

use std::fmt;
use std::io::Write;

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::errors::WalkError;
use crate::git::GitClient;
use crate::invoker::{Outcome, TestInvoker};
use crate::model::{ChangedFileSet, Commit, RevisionWalk};
use crate::report::{Reporter, RunEvent};
use crate::worktree::{WorktreeManager, WorktreeSession};

/// Why a walk ended before its last commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    FailFast,
    Error(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::FailFast => f.write_str("fail-fast"),
            StopReason::Error(msg) => f.write_str(msg),
        }
    }
}

impl Serialize for StopReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub terminated_early: bool,
    pub reason: Option<StopReason>,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    fn stop(&mut self, reason: StopReason) {
        self.terminated_early = true;
        self.reason = Some(reason);
    }
}

/// Process exit code for a finished walk: 130 cancelled, 1 any failure, else 0.
pub fn exit_code_for_summary(summary: &RunSummary) -> u8 {
    if summary.reason == Some(StopReason::Cancelled) {
        130
    } else if summary.failed > 0 {
        1
    } else {
        0
    }
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Base revision; `None` means the default branch.
    pub base: Option<String>,
    pub tip: String,
    pub fail_fast: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            base: None,
            tip: "HEAD".to_string(),
            fail_fast: false,
        }
    }
}

/// One commit of a dry run together with the paths its test run would receive.
#[derive(Debug, Clone)]
pub struct PlannedCommit {
    pub commit: Commit,
    pub files: ChangedFileSet,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub base: String,
    pub commits: Vec<PlannedCommit>,
}

pub struct Walker<'a> {
    git: &'a GitClient,
    config: &'a Config,
    cancel: &'a dyn CancelSignal,
    options: WalkOptions,
}

impl<'a> Walker<'a> {
    pub fn new(
        git: &'a GitClient,
        config: &'a Config,
        cancel: &'a dyn CancelSignal,
        options: WalkOptions,
    ) -> Self {
        Self {
            git,
            config,
            cancel,
            options,
        }
    }

    fn fail_fast(&self) -> bool {
        self.options.fail_fast || self.config.fail_fast
    }

    pub fn resolve(&self) -> Result<RevisionWalk, WalkError> {
        let base = match &self.options.base {
            Some(b) => b.clone(),
            None => self.git.default_branch()?,
        };
        self.git.resolve_commit_range(&base, &self.options.tip)
    }

    /// Resolve the range and compute each commit's filtered changes without touching a worktree.
    ///
    /// Deleted paths are still listed since nothing is checked out.
    pub fn plan(&self) -> Result<Plan, WalkError> {
        let walk = self.resolve()?;
        let mut previous = walk.base().to_string();
        let mut commits = Vec::with_capacity(walk.len());
        for commit in &walk {
            let files = self
                .git
                .diff_files(&previous, &commit.id)?
                .filter(&self.config.pattern);
            previous = commit.id.clone();
            commits.push(PlannedCommit {
                commit: commit.clone(),
                files,
            });
        }
        Ok(Plan {
            base: walk.base().to_string(),
            commits,
        })
    }

    /// Execute the walk, streaming events to `reporter` and subprocess output to `sink`.
    ///
    /// Range errors return before anything is created. Once a worktree exists it is always
    /// removed before this returns, and a `Finished` event is always emitted.
    pub fn run(&self, reporter: &mut dyn Reporter, sink: &mut dyn Write) -> Result<RunSummary, WalkError> {
        let walk = self.resolve()?;
        let total = walk.len();

        if walk.is_empty() || self.cancel.is_cancelled() {
            let mut summary = RunSummary::default();
            if !walk.is_empty() {
                summary.stop(StopReason::Cancelled);
            }
            reporter.report(&RunEvent::Started {
                total_commits: total,
                base_commit: walk.base().to_string(),
                worktree: None,
            });
            reporter.report(&RunEvent::Finished(summary.clone()));
            return Ok(summary);
        }

        let worktrees = WorktreeManager::new(self.git);
        let mut session = worktrees.provision(walk.base())?;
        reporter.report(&RunEvent::Started {
            total_commits: total,
            base_commit: walk.base().to_string(),
            worktree: Some(session.path().to_path_buf()),
        });

        let mut summary = RunSummary::default();
        let result = self.drive(&worktrees, &mut session, &walk, &mut summary, reporter, sink);

        let cleanup = worktrees.teardown(&mut session);
        if cleanup.is_ok() {
            reporter.report(&RunEvent::WorktreeRemoved {
                path: session.path().to_path_buf(),
            });
        }

        // A Ctrl-C that reached a child mid-command surfaces as that command's failure.
        let cancelled = result.is_err() && self.cancel.is_cancelled();
        let outcome = settle(&mut summary, result, cleanup, cancelled);
        reporter.report(&RunEvent::Finished(summary.clone()));
        outcome.map(|()| summary)
    }

    // Setup plus the per-commit loop. Returns why it stopped early, if it did.
    fn drive(
        &self,
        worktrees: &WorktreeManager<'_>,
        session: &mut WorktreeSession,
        walk: &RevisionWalk,
        summary: &mut RunSummary,
        reporter: &mut dyn Reporter,
        sink: &mut dyn Write,
    ) -> Result<Option<StopReason>, WalkError> {
        worktrees.run_setup(session, &self.config.setup, sink)?;

        let invoker = TestInvoker::new(&self.config.test);
        let total = walk.len();
        let mut previous = walk.base().to_string();

        for commit in walk {
            if self.cancel.is_cancelled() {
                info!(position = commit.position, "cancellation requested; not starting further commits");
                return Ok(Some(StopReason::Cancelled));
            }
            reporter.report(&RunEvent::CommitStarted {
                commit_id: commit.id.clone(),
                short_id: commit.short_id.clone(),
                subject: commit.subject.clone(),
                position: commit.position,
                total,
            });

            worktrees.checkout(session, &commit.id)?;
            let changed = self
                .git
                .diff_files(&previous, &commit.id)?
                .filter(&self.config.pattern)
                .present_in(session.path());
            let result = invoker.run(&commit.id, session.path(), &changed, sink)?;
            summary.record(&result.outcome);

            reporter.report(&RunEvent::CommitFinished {
                commit_id: commit.id.clone(),
                short_id: commit.short_id.clone(),
                position: commit.position,
                total,
                changed_files: changed.to_vec(),
                outcome: result.outcome.clone(),
                duration_ms: result.duration.as_millis() as u64,
                output: result.output,
            });
            previous = commit.id.clone();

            if self.fail_fast() && result.outcome.is_failure() && commit.position < total {
                info!(position = commit.position, "stopping after first failure");
                return Ok(Some(StopReason::FailFast));
            }
        }
        Ok(None)
    }
}

// Record how the walk ended in `summary` and pick the error `run` returns, if any.
// The loop's error wins over a teardown error.
fn settle(
    summary: &mut RunSummary,
    result: Result<Option<StopReason>, WalkError>,
    cleanup: Result<(), WalkError>,
    cancelled: bool,
) -> Result<(), WalkError> {
    let result = match result {
        Err(e) if cancelled => {
            info!("{e} (after cancellation)");
            Ok(Some(StopReason::Cancelled))
        }
        other => other,
    };
    match (result, cleanup) {
        (Ok(reason), Ok(())) => {
            if let Some(reason) = reason {
                summary.stop(reason);
            }
            Ok(())
        }
        (Ok(_), Err(cleanup_err)) => {
            summary.stop(StopReason::Error(cleanup_err.to_string()));
            Err(cleanup_err)
        }
        (Err(e), cleanup) => {
            if let Err(cleanup_err) = cleanup {
                warn!("worktree teardown failed after an earlier error: {cleanup_err}");
            }
            summary.stop(StopReason::Error(e.to_string()));
            Err(e)
        }
    }
}
