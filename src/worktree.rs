//! Worktree session lifecycle: provision under the temp dir, run setup, check out commits,
//! tear down.
//!
//! Lifecycle: Uninitialized -> Provisioned -> Active -> TornDown. Teardown is legal from
//! every state and idempotent; a session dropped without teardown (panic unwinding) is
//! removed best-effort from `Drop`.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::SetupStep;
use crate::errors::WalkError;
use crate::git::GitClient;
use crate::util::id::create_session_id;
use crate::util::{ExecRequest, ExecService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Provisioned,
    Active,
    TornDown,
}

/// The one disposable worktree of a run.
#[derive(Debug)]
pub struct WorktreeSession {
    path: PathBuf,
    base: String,
    state: SessionState,
    git: GitClient,
}

impl WorktreeSession {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn teardown_inner(&mut self) -> Result<(), WalkError> {
        if self.state == SessionState::Uninitialized {
            // Nothing was created; still make sure no directory is left behind.
            if !self.path.exists() {
                self.state = SessionState::TornDown;
                return Ok(());
            }
        }
        self.git.remove_worktree(&self.path)?;
        self.state = SessionState::TornDown;
        Ok(())
    }
}

impl Drop for WorktreeSession {
    fn drop(&mut self) {
        if self.state != SessionState::TornDown {
            warn!(path = %self.path.display(), "worktree session dropped without teardown; removing");
            let _ = self.teardown_inner();
        }
    }
}

/// Owns creation, setup and removal of the run's worktree.
pub struct WorktreeManager<'a> {
    git: &'a GitClient,
    temp_root: PathBuf,
    exec: ExecService,
}

impl<'a> WorktreeManager<'a> {
    pub fn new(git: &'a GitClient) -> Self {
        Self {
            git,
            temp_root: std::env::temp_dir(),
            exec: ExecService::new(std::time::Duration::ZERO),
        }
    }

    /// Create a fresh worktree at `base_sha` under the system temp dir.
    #[instrument(level = "debug", skip(self))]
    pub fn provision(&self, base_sha: &str) -> Result<WorktreeSession, WalkError> {
        let path = self.temp_root.join(format!("walkcheck-{}", create_session_id()));
        if crate::util::fs::is_within(&path, self.git.repo_root()) {
            return Err(WalkError::WorktreeCreationFailed {
                path,
                reason: "temporary directory lies inside the repository; set TMPDIR elsewhere".to_string(),
            });
        }
        let mut session = WorktreeSession {
            path,
            base: base_sha.to_string(),
            state: SessionState::Uninitialized,
            git: self.git.clone(),
        };
        if let Err(e) = self.git.create_worktree(&session.path, base_sha) {
            // git may leave a half-created directory or admin entry behind.
            let _ = session.teardown_inner();
            return Err(e);
        }
        session.state = SessionState::Provisioned;
        info!(path = %session.path.display(), base = %base_sha, "worktree provisioned");
        Ok(session)
    }

    /// Run setup steps in order inside the worktree, stopping at the first failure.
    ///
    /// Step output streams to `sink`. Only full success moves the session to Active.
    pub fn run_setup(
        &self,
        session: &mut WorktreeSession,
        steps: &[SetupStep],
        sink: &mut dyn Write,
    ) -> Result<(), WalkError> {
        expect_state(session, SessionState::Provisioned, "set up")?;
        for step in steps {
            info!(step = %step.name, "running setup step");
            let mut request = ExecRequest::new(&step.command)
                .args(&step.args)
                .cwd(&session.path)
                .isolate_process_group(true);
            if let Some(t) = step.timeout() {
                request = request.timeout(t);
            }
            let out = self.exec.stream(request, sink).map_err(|e| WalkError::Process {
                what: format!("setup step '{}'", step.name),
                source: e.into_io(),
            })?;
            if out.timed_out || !out.status.success() {
                return Err(WalkError::SetupStepFailed {
                    step_name: step.name.clone(),
                    exit_code: if out.timed_out { None } else { out.status.code() },
                });
            }
        }
        session.state = SessionState::Active;
        Ok(())
    }

    /// Check out `sha` inside an Active session.
    pub fn checkout(&self, session: &mut WorktreeSession, sha: &str) -> Result<(), WalkError> {
        expect_state(session, SessionState::Active, "check out in")?;
        self.git.checkout(&session.path, sha)
    }

    /// Remove the worktree. Safe from any state and safe to repeat.
    #[instrument(level = "debug", skip(self, session), fields(path = %session.path.display()))]
    pub fn teardown(&self, session: &mut WorktreeSession) -> Result<(), WalkError> {
        if session.state == SessionState::TornDown && !session.path.exists() {
            return Ok(());
        }
        session.teardown_inner()?;
        info!(path = %session.path.display(), "worktree removed");
        Ok(())
    }
}

fn expect_state(
    session: &WorktreeSession,
    expected: SessionState,
    operation: &'static str,
) -> Result<(), WalkError> {
    if session.state != expected {
        return Err(WalkError::Lifecycle {
            operation,
            state: session.state,
        });
    }
    Ok(())
}
