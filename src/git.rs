//! Git client: every repository query goes through the `git` binary as a subprocess and
//! comes back as the structured types in `model`.
//!
//! All invocations capture stdout and stderr; a non-zero exit becomes a typed `WalkError`
//! carrying the captured stderr.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::errors::WalkError;
use crate::model::{ChangedFileSet, Commit, RevisionWalk};
use crate::util::fs::remove_dir_all_with_retries;
use crate::util::{ExecError, ExecOutput, ExecRequest, ExecService};

const GIT_TIMEOUT: Duration = Duration::from_secs(300);
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%h%x1f%P%x1f%s%x1e";

#[derive(Debug, Clone)]
pub struct GitClient {
    program: PathBuf,
    repo: PathBuf,
    exec: ExecService,
}

/// Locate the git executable: `WALKCHECK_GIT` when set, else the first `git` on PATH.
pub fn locate_git() -> Result<PathBuf, WalkError> {
    if let Ok(p) = std::env::var("WALKCHECK_GIT") {
        let t = p.trim();
        if !t.is_empty() {
            return Ok(PathBuf::from(t));
        }
    }
    which::which("git").map_err(|_| WalkError::GitNotFound)
}

impl GitClient {
    pub fn open(program: impl Into<PathBuf>, repo: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            repo: repo.into(),
            exec: ExecService::new(GIT_TIMEOUT),
        }
    }

    /// Find the repository containing `start` and bind a client to its top-level directory.
    pub fn discover(start: &Path) -> Result<Self, WalkError> {
        let probe = Self::open(locate_git()?, start);
        let top = probe
            .stdout(None, &["rev-parse", "--show-toplevel"])
            .map_err(|e| match e {
                WalkError::Git { .. } => WalkError::NotARepository(start.to_path_buf()),
                other => other,
            })?;
        let root = PathBuf::from(top.trim());
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Ok(Self::open(probe.program, root))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo
    }

    /// Absolute path of the shared git directory (the main repo's `.git` even from a worktree).
    pub fn common_dir(&self) -> Result<PathBuf, WalkError> {
        let raw = self.stdout(None, &["rev-parse", "--git-common-dir"])?;
        let p = PathBuf::from(raw.trim());
        Ok(if p.is_absolute() { p } else { self.repo.join(p) })
    }

    /// Resolve a revision to a full commit id, or `InvalidRange` when it names no commit.
    pub fn resolve_commit(&self, rev: &str) -> Result<String, WalkError> {
        if rev.trim().is_empty() || rev.starts_with('-') {
            return Err(WalkError::InvalidRange {
                base: rev.to_string(),
                reason: "not a revision".to_string(),
            });
        }
        let spec = format!("{rev}^{{commit}}");
        let out = self.output(None, &["rev-parse", "--verify", "--quiet", &spec])?;
        let sha = out.stdout.trim();
        if !out.status.success() || sha.is_empty() {
            return Err(WalkError::InvalidRange {
                base: rev.to_string(),
                reason: "does not resolve to a known commit".to_string(),
            });
        }
        Ok(sha.to_string())
    }

    /// Name of the default branch: `origin/HEAD`'s target, else a local `main`, else `master`.
    pub fn default_branch(&self) -> Result<String, WalkError> {
        let out = self.output(
            None,
            &["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"],
        )?;
        let name = out.stdout.trim();
        if out.status.success() && !name.is_empty() {
            return Ok(name.to_string());
        }
        for candidate in ["main", "master"] {
            let refname = format!("refs/heads/{candidate}");
            let out = self.output(None, &["rev-parse", "--verify", "--quiet", &refname])?;
            if out.status.success() {
                return Ok(candidate.to_string());
            }
        }
        Err(WalkError::InvalidRange {
            base: "(default branch)".to_string(),
            reason: "could not determine the default branch; pass a base revision".to_string(),
        })
    }

    /// Commits strictly after `base` up to `tip` along the first-parent chain, oldest first.
    #[instrument(level = "debug", skip(self))]
    pub fn resolve_commit_range(&self, base: &str, tip: &str) -> Result<RevisionWalk, WalkError> {
        let base_sha = self.resolve_commit(base)?;
        let tip_sha = self.resolve_commit(tip)?;
        if base_sha == tip_sha {
            return Ok(RevisionWalk::empty(base_sha));
        }

        let anc = self.output(None, &["merge-base", "--is-ancestor", &base_sha, &tip_sha])?;
        match anc.status.code() {
            Some(0) => {}
            Some(1) => {
                return Err(WalkError::InvalidRange {
                    base: base.to_string(),
                    reason: format!("not an ancestor of {tip}"),
                })
            }
            code => {
                return Err(WalkError::Git {
                    args: "git merge-base --is-ancestor".to_string(),
                    code,
                    stderr: anc.stderr,
                })
            }
        }

        let range = format!("{base_sha}..{tip_sha}");
        let log = self.stdout(None, &["log", "--first-parent", "--reverse", LOG_FORMAT, &range])?;
        let commits = parse_log(&log);
        debug!(count = commits.len(), %range, "resolved commit range");
        RevisionWalk::new(base_sha, commits).map_err(|position| WalkError::InvalidRange {
            base: base.to_string(),
            reason: format!(
                "first-parent history of {tip} does not lead back to the base (broken at commit {position})"
            ),
        })
    }

    /// Paths that differ between two commits. Identical ids yield an empty set.
    #[instrument(level = "debug", skip(self))]
    pub fn diff_files(&self, from: &str, to: &str) -> Result<ChangedFileSet, WalkError> {
        if from == to {
            return Ok(ChangedFileSet::default());
        }
        let out = self.stdout(None, &["diff", "--name-only", "--no-renames", "-z", from, to])?;
        Ok(parse_name_list(&out))
    }

    /// Create a detached worktree at `path` checked out at `sha`. `path` must not exist.
    #[instrument(level = "debug", skip(self))]
    pub fn create_worktree(&self, path: &Path, sha: &str) -> Result<(), WalkError> {
        if path.exists() {
            return Err(WalkError::WorktreeCreationFailed {
                path: path.to_path_buf(),
                reason: "path already exists".to_string(),
            });
        }
        let path_s = path.to_string_lossy();
        let out = self.output(None, &["worktree", "add", "--detach", "--quiet", &path_s, sha])?;
        if !out.status.success() {
            return Err(WalkError::WorktreeCreationFailed {
                path: path.to_path_buf(),
                reason: out.stderr,
            });
        }
        Ok(())
    }

    /// Move the worktree at `path` to `sha` (detached). Local modifications make this fail.
    #[instrument(level = "debug", skip(self))]
    pub fn checkout(&self, path: &Path, sha: &str) -> Result<(), WalkError> {
        let out = self.output(Some(path), &["checkout", "--quiet", "--detach", sha])?;
        if !out.status.success() {
            return Err(WalkError::CheckoutFailed {
                sha: sha.to_string(),
                stderr: out.stderr,
            });
        }
        Ok(())
    }

    /// Delete the worktree directory and its administrative metadata.
    ///
    /// Idempotent: an already-removed path only triggers a prune. Returns once the path
    /// is confirmed absent.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_worktree(&self, path: &Path) -> Result<(), WalkError> {
        if path.exists() {
            let path_s = path.to_string_lossy();
            let out = self.output(None, &["worktree", "remove", "--force", &path_s])?;
            if !out.status.success() {
                debug!(stderr = %out.stderr.trim(), "git worktree remove failed; deleting directly");
            }
            remove_dir_all_with_retries(path, 5, Duration::from_millis(200)).map_err(|e| {
                WalkError::WorktreeRemovalFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;
        }
        // Drop stale entries under .git/worktrees whose directory is gone.
        match self.output(None, &["worktree", "prune"]) {
            Ok(out) if !out.status.success() => {
                warn!(stderr = %out.stderr.trim(), "git worktree prune failed");
            }
            Err(e) => warn!("git worktree prune failed: {e}"),
            Ok(_) => {}
        }
        if path.exists() {
            return Err(WalkError::WorktreeRemovalFailed {
                path: path.to_path_buf(),
                reason: "path still present after removal".to_string(),
            });
        }
        Ok(())
    }

    /// Paths of all worktrees git currently knows about (the main one included).
    pub fn worktree_paths(&self) -> Result<Vec<PathBuf>, WalkError> {
        let out = self.stdout(None, &["worktree", "list", "--porcelain"])?;
        Ok(out
            .lines()
            .filter_map(|l| l.strip_prefix("worktree "))
            .map(PathBuf::from)
            .collect())
    }

    fn request(&self, cwd: Option<&Path>, args: &[&str]) -> ExecRequest {
        ExecRequest::new(&self.program)
            .arg("-C")
            .arg(cwd.unwrap_or(&self.repo))
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .isolate_process_group(true)
    }

    // Run and return the raw output; only spawn/wait problems are errors here.
    fn output(&self, cwd: Option<&Path>, args: &[&str]) -> Result<ExecOutput, WalkError> {
        let request = self.request(cwd, args);
        let display = request.display();
        self.exec.run(request).map_err(|e| match e {
            ExecError::Spawn { ref source, .. } if source.kind() == io::ErrorKind::NotFound => {
                WalkError::GitNotFound
            }
            timed_out @ ExecError::TimedOut { .. } => WalkError::Git {
                args: display,
                code: None,
                stderr: timed_out.to_string(),
            },
            other => WalkError::Process {
                what: display,
                source: other.into_io(),
            },
        })
    }

    // Run and return stdout, turning a non-zero exit into `WalkError::Git`.
    fn stdout(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, WalkError> {
        let out = self.output(cwd, args)?;
        if !out.status.success() {
            let mut words = vec!["git".to_string()];
            words.extend(args.iter().map(|a| a.to_string()));
            return Err(WalkError::Git {
                args: crate::util::shell_join(&words),
                code: out.status.code(),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }
}

/// Parse `git log` records written with `LOG_FORMAT`.
fn parse_log(raw: &str) -> Vec<Commit> {
    raw.split(RECORD_SEP)
        .map(|r| r.trim_matches(|c| c == '\n' || c == '\r'))
        .filter(|r| !r.is_empty())
        .enumerate()
        .filter_map(|(idx, record)| {
            let mut fields = record.splitn(4, FIELD_SEP);
            let id = fields.next()?.trim().to_string();
            let short_id = fields.next()?.trim().to_string();
            let parent = fields
                .next()?
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            let subject = fields.next().unwrap_or("").to_string();
            if id.is_empty() {
                return None;
            }
            Some(Commit {
                id,
                short_id,
                subject,
                position: idx + 1,
                parent,
            })
        })
        .collect()
}

/// Parse NUL-separated path output (`-z`).
fn parse_name_list(raw: &str) -> ChangedFileSet {
    raw.split('\0')
        .map(|p| p.trim_end_matches('\n'))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
