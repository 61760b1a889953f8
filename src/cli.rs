use std::path::PathBuf;

use clap::Parser;

use walkcheck::ColorMode;

#[derive(Parser, Debug)]
#[command(
    name = "walkcheck",
    version,
    about = "Replay each commit of a branch in a throwaway worktree and run the tests its changes touch."
)]
pub(crate) struct Cli {
    /// Base revision; commits after it up to --tip are checked (default: the default branch)
    pub(crate) base: Option<String>,

    /// Last revision to check
    #[arg(long, default_value = "HEAD")]
    pub(crate) tip: String,

    /// Configuration file (default: $WALKCHECK_CONFIG, then .walkcheck.yml in the repo root)
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,

    /// Stop after the first failing commit
    #[arg(long)]
    pub(crate) fail_fast: bool,

    /// Emit one JSON event per line on stdout
    #[arg(long)]
    pub(crate) json: bool,

    /// Print the commits and the files each would test, then exit without creating a worktree
    #[arg(long)]
    pub(crate) dry_run: bool,

    /// Colorize stderr output: auto|always|never
    #[arg(long = "color", value_enum)]
    pub(crate) color: Option<ColorMode>,

    /// Print build info and info-level logs
    #[arg(long)]
    pub(crate) verbose: bool,
}
