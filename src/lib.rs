//! walkcheck: replay the commits of a feature branch one at a time in a disposable git
//! worktree and run the tests relevant to each commit's changed files.
//!
//! The binary in `main.rs` is a thin shell over [`Walker`]; everything it does is reachable
//! from here so integration tests can drive a walk with their own [`CancelSignal`] and
//! [`Reporter`].

pub mod cancel;
pub mod color;
pub mod config;
pub mod errors;
pub mod git;
pub mod invoker;
pub mod lock;
pub mod model;
pub mod report;
pub mod telemetry;
pub mod util;
pub mod walk;
pub mod worktree;

pub use cancel::{CancelSignal, CancellationController};
pub use color::{
    color_enabled_stderr, log_error_stderr, log_info_stderr, log_warn_stderr, paint,
    set_color_mode, ColorMode,
};
pub use config::{config_path, Config, SetupStep, TestCommand};
pub use errors::{exit_code_for_walk_error, WalkError};
pub use git::{locate_git, GitClient};
pub use invoker::{Outcome, TestInvoker, TestOutcome};
pub use lock::{acquire_run_lock, RunLock};
pub use model::{ChangedFileSet, Commit, FilePattern, RevisionWalk};
pub use report::{ConsoleReporter, JsonReporter, Reporter, RunEvent};
pub use telemetry::{build_info, telemetry_init};
pub use walk::{exit_code_for_summary, Plan, PlannedCommit, RunSummary, StopReason, WalkOptions, Walker};
pub use worktree::{SessionState, WorktreeManager, WorktreeSession};
