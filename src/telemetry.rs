//! Diagnostic logging setup.
//!
//! `tracing` events go to stderr through a `fmt` layer. The filter comes from
//! `WALKCHECK_LOG`, then `RUST_LOG`, and defaults to `warn` (`info` with `--verbose`).

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

fn filter_directive(verbose: bool) -> String {
    for key in ["WALKCHECK_LOG", "RUST_LOG"] {
        if let Ok(v) = env::var(key) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    if verbose { "info" } else { "warn" }.to_string()
}

/// Install the global subscriber once. Later calls are no-ops.
pub fn telemetry_init(verbose: bool, use_color: bool) {
    if INIT.get().is_some() {
        return;
    }
    let filter = EnvFilter::try_new(filter_directive(verbose)).unwrap_or_else(|e| {
        eprintln!("walkcheck: ignoring invalid log filter: {e}");
        EnvFilter::new("warn")
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_color)
        .with_target(false);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        eprintln!("walkcheck: log init skipped (global subscriber already set)");
    }
    let _ = INIT.set(());
}

/// One line describing this build, shown with `--verbose`.
pub fn build_info() -> String {
    format!(
        "walkcheck {} ({} {}, built {} with {})",
        env!("CARGO_PKG_VERSION"),
        env!("WALKCHECK_BUILD_TARGET"),
        env!("WALKCHECK_BUILD_PROFILE"),
        env!("WALKCHECK_BUILD_DATE"),
        env!("WALKCHECK_BUILD_RUSTC"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_names_version() {
        let s = build_info();
        assert!(s.starts_with(&format!("walkcheck {}", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn test_filter_directive_defaults() {
        if env::var("WALKCHECK_LOG").is_err() && env::var("RUST_LOG").is_err() {
            assert_eq!(filter_directive(false), "warn");
            assert_eq!(filter_directive(true), "info");
        }
    }
}
