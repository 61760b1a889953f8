use clap::Parser;
use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use walkcheck::{
    acquire_run_lock, build_info, color_enabled_stderr, config_path, exit_code_for_summary,
    exit_code_for_walk_error, log_error_stderr, log_info_stderr, log_warn_stderr, set_color_mode,
    telemetry_init, CancellationController, Config, ConsoleReporter, GitClient, JsonReporter,
    Plan, WalkError, WalkOptions, Walker,
};

mod cli;

use cli::Cli;

/// Exit code for an unusable configuration file.
const EXIT_CONFIG: u8 = 3;

fn fail(use_err: bool, e: &WalkError) -> ExitCode {
    log_error_stderr(use_err, &format!("walkcheck: {e}"));
    ExitCode::from(exit_code_for_walk_error(e))
}

fn print_plan(plan: &Plan, json: bool) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if json {
        for p in &plan.commits {
            let line = serde_json::json!({
                "event": "planned",
                "commit_id": p.commit.id,
                "short_id": p.commit.short_id,
                "subject": p.commit.subject,
                "position": p.commit.position,
                "total": plan.commits.len(),
                "changed_files": p.files.to_vec(),
            });
            writeln!(out, "{line}")?;
        }
        return Ok(());
    }
    let base = &plan.base[..plan.base.len().min(12)];
    writeln!(out, "{} commit(s) on top of {base}:", plan.commits.len())?;
    for p in &plan.commits {
        writeln!(
            out,
            "[{}/{}] {} {}",
            p.commit.position,
            plan.commits.len(),
            p.commit.short_id,
            p.commit.subject
        )?;
        if p.files.is_empty() {
            writeln!(out, "    (skip: no matching files)")?;
        }
        for f in p.files.iter() {
            writeln!(out, "    {f}")?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(mode) = cli.color {
        set_color_mode(mode);
    }
    let use_err = color_enabled_stderr();
    telemetry_init(cli.verbose, use_err);
    if cli.verbose {
        log_info_stderr(use_err, &format!("walkcheck: {}", build_info()));
    }

    let cwd = match env::current_dir() {
        Ok(d) => d,
        Err(e) => {
            return fail(
                use_err,
                &WalkError::Process {
                    what: "current directory".to_string(),
                    source: e,
                },
            )
        }
    };
    let git = match GitClient::discover(&cwd) {
        Ok(g) => g,
        Err(e) => return fail(use_err, &e),
    };

    let config = match config_path(cli.config.as_deref(), git.repo_root())
        .and_then(|p| Config::load(&p))
    {
        Ok(c) => c,
        Err(e) => {
            log_error_stderr(use_err, &format!("walkcheck: {e:#}"));
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let options = WalkOptions {
        base: cli.base.clone(),
        tip: cli.tip.clone(),
        fail_fast: cli.fail_fast,
    };

    if cli.dry_run {
        // Nothing long-running happens, so the handlers are not needed.
        let cancel = CancellationController::default();
        let walker = Walker::new(&git, &config, &cancel, options);
        return match walker.plan() {
            Ok(plan) => {
                if let Err(e) = print_plan(&plan, cli.json) {
                    log_warn_stderr(use_err, &format!("walkcheck: failed to print plan: {e}"));
                }
                ExitCode::from(0)
            }
            Err(e) => fail(use_err, &e),
        };
    }

    let lock = match git.common_dir().and_then(|d| acquire_run_lock(&d)) {
        Ok(l) => l,
        Err(e) => return fail(use_err, &e),
    };
    let cancel = match CancellationController::install() {
        Ok(c) => c,
        Err(e) => return fail(use_err, &e),
    };

    let walker = Walker::new(&git, &config, &cancel, options);
    let mut sink = io::stderr();
    let result = if cli.json {
        let mut reporter = JsonReporter::new(io::stdout());
        walker.run(&mut reporter, &mut sink)
    } else {
        let mut reporter = ConsoleReporter::new(use_err);
        walker.run(&mut reporter, &mut sink)
    };
    drop(lock);

    match result {
        Ok(summary) => ExitCode::from(exit_code_for_summary(&summary)),
        Err(e) => fail(use_err, &e),
    }
}
