//! Error mapping guide:
//! - Component boundaries (git, worktree, invoker) return `WalkError`; only the walker decides
//!   whether an error aborts the run.
//! - A non-zero test exit is an outcome, never a `WalkError`.
//! - Exit codes: 127 when an executable is missing, 2 for every other fatal walk error.
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::worktree::SessionState;

#[derive(Debug)]
pub enum WalkError {
    GitNotFound,
    NotARepository(PathBuf),
    InvalidRange {
        base: String,
        reason: String,
    },
    Git {
        args: String,
        code: Option<i32>,
        stderr: String,
    },
    WorktreeCreationFailed {
        path: PathBuf,
        reason: String,
    },
    CheckoutFailed {
        sha: String,
        stderr: String,
    },
    WorktreeRemovalFailed {
        path: PathBuf,
        reason: String,
    },
    SetupStepFailed {
        step_name: String,
        exit_code: Option<i32>,
    },
    TestInvocationFailed {
        command: String,
        source: io::Error,
    },
    Process {
        what: String,
        source: io::Error,
    },
    Lifecycle {
        operation: &'static str,
        state: SessionState,
    },
    Locked(PathBuf),
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::GitNotFound => write!(f, "git executable not found in PATH (set WALKCHECK_GIT to override)"),
            WalkError::NotARepository(p) => write!(f, "{} is not inside a git repository", p.display()),
            WalkError::InvalidRange { base, reason } => write!(f, "invalid range from {base}: {reason}"),
            WalkError::Git { args, code, stderr } => {
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                let detail = first_line(stderr);
                if detail.is_empty() {
                    write!(f, "{args} failed (exit {code})")
                } else {
                    write!(f, "{args} failed (exit {code}): {detail}")
                }
            }
            WalkError::WorktreeCreationFailed { path, reason } => {
                write!(f, "could not create worktree at {}: {}", path.display(), cause(reason))
            }
            WalkError::CheckoutFailed { sha, stderr } => {
                write!(f, "could not check out {sha}: {}", cause(stderr))
            }
            WalkError::WorktreeRemovalFailed { path, reason } => {
                write!(f, "could not remove worktree at {}: {}", path.display(), first_line(reason))
            }
            WalkError::SetupStepFailed { step_name, exit_code } => match exit_code {
                Some(code) => write!(f, "setup step '{step_name}' failed with exit code {code}"),
                None => write!(f, "setup step '{step_name}' was terminated (signal or timeout)"),
            },
            WalkError::TestInvocationFailed { command, source } => {
                write!(f, "could not start test command {command}: {source}")
            }
            WalkError::Process { what, source } => write!(f, "{what}: {source}"),
            WalkError::Lifecycle { operation, state } => {
                write!(f, "cannot {operation} a worktree session in state {state:?}")
            }
            WalkError::Locked(p) => write!(
                f,
                "another walk is already running in this repository (lock held at {})",
                p.display()
            ),
        }
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WalkError::TestInvocationFailed { source, .. } | WalkError::Process { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

// git says nothing when a signal kills it.
fn cause(stderr: &str) -> &str {
    match first_line(stderr) {
        "" => "git exited without a message (killed by signal?)",
        line => line,
    }
}

/// Exit code for a fatal walk error: 127 when a required executable is missing, 2 otherwise.
pub fn exit_code_for_walk_error(e: &WalkError) -> u8 {
    match e {
        WalkError::GitNotFound => 127,
        WalkError::TestInvocationFailed { source, .. } | WalkError::Process { source, .. }
            if source.kind() == io::ErrorKind::NotFound =>
        {
            127
        }
        _ => 2,
    }
}
