//! Run events and the sinks that render them.
//!
//! Console output goes to stderr (color-aware); `--json` writes one JSON object per line.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::color::paint;
use crate::invoker::Outcome;
use crate::walk::RunSummary;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        total_commits: usize,
        base_commit: String,
        worktree: Option<PathBuf>,
    },
    CommitStarted {
        commit_id: String,
        short_id: String,
        subject: String,
        position: usize,
        total: usize,
    },
    CommitFinished {
        commit_id: String,
        short_id: String,
        position: usize,
        total: usize,
        changed_files: Vec<String>,
        outcome: Outcome,
        duration_ms: u64,
        #[serde(skip_serializing_if = "String::is_empty")]
        output: String,
    },
    WorktreeRemoved {
        path: PathBuf,
    },
    Finished(RunSummary),
}

pub trait Reporter {
    fn report(&mut self, event: &RunEvent);
}

/// Collects events in memory.
impl Reporter for Vec<RunEvent> {
    fn report(&mut self, event: &RunEvent) {
        self.push(event.clone());
    }
}

/// Human-readable progress on stderr.
pub struct ConsoleReporter {
    use_color: bool,
}

impl ConsoleReporter {
    pub fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn render(&self, event: &RunEvent) -> Option<String> {
        let c = self.use_color;
        let line = match event {
            RunEvent::Started {
                total_commits,
                base_commit,
                worktree,
            } => {
                let base = &base_commit[..base_commit.len().min(12)];
                match worktree {
                    Some(w) => format!(
                        "walkcheck: checking {} on top of {} in {}",
                        plural(*total_commits, "commit"),
                        paint(c, "\x1b[34;1m", base),
                        w.display()
                    ),
                    None => format!(
                        "walkcheck: {} on top of {}",
                        plural(*total_commits, "commit"),
                        paint(c, "\x1b[34;1m", base)
                    ),
                }
            }
            RunEvent::CommitStarted {
                short_id,
                subject,
                position,
                total,
                ..
            } => format!(
                "{} {} {}",
                paint(c, "\x1b[36;1m", &format!("[{position}/{total}]")),
                paint(c, "\x1b[33m", short_id),
                subject
            ),
            RunEvent::CommitFinished {
                short_id,
                changed_files,
                outcome,
                duration_ms,
                ..
            } => {
                let took = humantime::format_duration(Duration::from_millis(*duration_ms));
                match outcome {
                    Outcome::Passed => format!(
                        "  {} {} ({}, {})",
                        paint(c, "\x1b[32;1m", &format!("✓ {}", outcome.label())),
                        short_id,
                        plural(changed_files.len(), "file"),
                        took
                    ),
                    Outcome::Failed { exit_code, timed_out } => {
                        let why = if *timed_out {
                            "timed out".to_string()
                        } else {
                            match exit_code {
                                Some(code) => format!("exit {code}"),
                                None => "killed by signal".to_string(),
                            }
                        };
                        format!(
                            "  {} {} ({}, {}, {})",
                            paint(c, "\x1b[31;1m", &format!("✗ {}", outcome.label())),
                            short_id,
                            why,
                            plural(changed_files.len(), "file"),
                            took
                        )
                    }
                    Outcome::Skipped => format!(
                        "  {} {} (no changed files match the pattern)",
                        paint(c, "\x1b[90m", &format!("- {}", outcome.label())),
                        short_id
                    ),
                }
            }
            RunEvent::WorktreeRemoved { path } => {
                format!("walkcheck: removed worktree {}", path.display())
            }
            RunEvent::Finished(s) => {
                let mut line = format!(
                    "walkcheck: {} processed: {} passed, {} failed, {} skipped",
                    s.processed,
                    paint(c, "\x1b[32m", &s.passed.to_string()),
                    paint(c, if s.failed > 0 { "\x1b[31;1m" } else { "\x1b[32m" }, &s.failed.to_string()),
                    s.skipped
                );
                if s.terminated_early {
                    let reason = s
                        .reason
                        .as_ref()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    line.push_str(&format!(
                        "\n{}",
                        paint(c, "\x1b[33m", &format!("walkcheck: stopped early: {reason}"))
                    ));
                }
                line
            }
        };
        Some(line)
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: &RunEvent) {
        if let Some(line) = self.render(event) {
            eprintln!("{line}");
        }
    }
}

/// One JSON object per event, newline-delimited.
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn report(&mut self, event: &RunEvent) {
        let res = serde_json::to_writer(&mut self.out, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush());
        if let Err(e) = res {
            tracing::warn!("failed to write json event: {e}");
        }
    }
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::StopReason;

    fn finished(outcome: Outcome) -> RunEvent {
        RunEvent::CommitFinished {
            commit_id: "0123456789abcdef".to_string(),
            short_id: "0123456".to_string(),
            position: 2,
            total: 5,
            changed_files: vec!["src/lib.rs".to_string()],
            outcome,
            duration_ms: 1500,
            output: String::new(),
        }
    }

    #[test]
    fn test_json_lines_shape() {
        let mut rep = JsonReporter::new(Vec::new());
        rep.report(&finished(Outcome::Failed {
            exit_code: Some(1),
            timed_out: false,
        }));
        rep.report(&RunEvent::Finished(RunSummary {
            processed: 2,
            passed: 1,
            failed: 1,
            skipped: 0,
            terminated_early: true,
            reason: Some(StopReason::Cancelled),
        }));
        let text = String::from_utf8(rep.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "commit_finished");
        assert_eq!(first["position"], 2);
        assert_eq!(first["total"], 5);
        assert_eq!(first["outcome"]["status"], "failed");
        assert_eq!(first["outcome"]["exit_code"], 1);
        assert_eq!(first["duration_ms"], 1500);
        assert!(first.get("output").is_none());

        let last: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last["event"], "finished");
        assert_eq!(last["processed"], 2);
        assert_eq!(last["reason"], "cancelled");
    }

    #[test]
    fn test_console_lines_without_color() {
        let rep = ConsoleReporter::new(false);
        let passed = rep.render(&finished(Outcome::Passed)).unwrap();
        assert_eq!(passed, "  ✓ passed 0123456 (1 file, 1s 500ms)");
        let skipped = rep.render(&finished(Outcome::Skipped)).unwrap();
        assert!(skipped.contains("- skipped 0123456"));
        let timed = rep
            .render(&finished(Outcome::Failed {
                exit_code: None,
                timed_out: true,
            }))
            .unwrap();
        assert!(timed.contains("✗ failed 0123456 (timed out"));
    }

    #[test]
    fn test_console_summary_mentions_early_stop() {
        let rep = ConsoleReporter::new(false);
        let line = rep
            .render(&RunEvent::Finished(RunSummary {
                processed: 2,
                passed: 2,
                failed: 0,
                skipped: 0,
                terminated_early: true,
                reason: Some(StopReason::Cancelled),
            }))
            .unwrap();
        assert!(line.starts_with("walkcheck: 2 processed: 2 passed, 0 failed, 0 skipped"));
        assert!(line.ends_with("walkcheck: stopped early: cancelled"));
    }
}
