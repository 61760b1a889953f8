/*!
Test support helpers shared across integration tests.

- have_git(): check git availability on PATH
- init_repo_with_default_user(dir): initialize a git repo on `main` with a default identity
- commit(dir, changes, msg): apply writes/deletes, commit everything, return the new sha
- test_config(pattern, script): a walk configuration whose test command is `sh -c <script>`

These helpers do not print skip messages themselves so tests keep their own
"skipping: ..." lines.
*/

use std::io;
use std::path::Path;
use std::process::Command;

use walkcheck::{CancelSignal, Config, FilePattern, TestCommand};

/// Return true if `git` is available on PATH.
#[allow(dead_code)]
pub fn have_git() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run git in `dir` and return trimmed stdout; panics on failure.
#[allow(dead_code)]
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Initialize a git repository at `dir` with `main` as the unborn branch and a test identity.
#[allow(dead_code)]
pub fn init_repo_with_default_user(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for args in [
        &["init", "-q"][..],
        &["symbolic-ref", "HEAD", "refs/heads/main"],
        &["config", "user.name", "Walkcheck Test"],
        &["config", "user.email", "walkcheck@example.com"],
        &["config", "commit.gpgsign", "false"],
    ] {
        let st = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;
        if !st.success() {
            return Err(io::Error::other(format!("git {args:?} failed")));
        }
    }
    Ok(())
}

/// Write (`Some(content)`) or delete (`None`) each path, commit, and return the new HEAD sha.
#[allow(dead_code)]
pub fn commit(dir: &Path, changes: &[(&str, Option<&str>)], msg: &str) -> String {
    for (path, content) in changes {
        let p = dir.join(path);
        match content {
            Some(c) => {
                if let Some(parent) = p.parent() {
                    std::fs::create_dir_all(parent).expect("mkdir");
                }
                std::fs::write(&p, c).expect("write");
            }
            None => std::fs::remove_file(&p).expect("remove"),
        }
    }
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "--allow-empty", "-m", msg]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Configuration running `sh -c <script> sh <files...>` with no setup steps.
#[allow(dead_code)]
pub fn test_config(pattern: &str, script: &str) -> Config {
    Config {
        pattern: FilePattern::new(pattern).expect("valid pattern"),
        fail_fast: false,
        setup: Vec::new(),
        test: TestCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            timeout_secs: Some(60),
        },
    }
}

/// Cancel signal that never fires.
#[allow(dead_code)]
pub struct NeverCancel;

impl CancelSignal for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cancel signal that reports "not cancelled" for the first `polls` queries and
/// "cancelled" ever after.
#[allow(dead_code)]
pub struct CancelAfter {
    remaining: std::cell::Cell<usize>,
}

#[allow(dead_code)]
impl CancelAfter {
    pub fn new(polls: usize) -> Self {
        Self {
            remaining: std::cell::Cell::new(polls),
        }
    }
}

impl CancelSignal for CancelAfter {
    fn is_cancelled(&self) -> bool {
        let left = self.remaining.get();
        if left == 0 {
            return true;
        }
        self.remaining.set(left - 1);
        false
    }
}
