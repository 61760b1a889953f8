//! Walk configuration: path filter, setup steps and the test command, read once from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::FilePattern;

/// File names looked up in the repository root when no explicit path is given.
pub const DEFAULT_CONFIG_NAMES: [&str; 2] = [".walkcheck.yml", ".walkcheck.yaml"];

/// Placeholder argument replaced by the changed-file list.
pub const FILES_PLACEHOLDER: &str = "{files}";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub pattern: FilePattern,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub setup: Vec<SetupStep>,
    pub test: TestCommand,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupStep {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SetupStep {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

impl TestCommand {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(s).context("invalid walkcheck configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.test.command.trim().is_empty() {
            bail!("test.command must not be empty");
        }
        for (idx, step) in self.setup.iter().enumerate() {
            if step.name.trim().is_empty() {
                bail!("setup step #{} has an empty name", idx + 1);
            }
            if step.command.trim().is_empty() {
                bail!("setup step '{}' has an empty command", step.name);
            }
        }
        Ok(())
    }
}

/// Pick the configuration file: explicit path, then `WALKCHECK_CONFIG`, then the defaults
/// in `repo_root`.
pub fn config_path(explicit: Option<&Path>, repo_root: &Path) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("WALKCHECK_CONFIG") {
        let t = p.trim();
        if !t.is_empty() {
            return Ok(PathBuf::from(t));
        }
    }
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| repo_root.join(name))
        .find(|p| p.is_file())
        .with_context(|| {
            format!(
                "no configuration found: create {} in {} or pass --config",
                DEFAULT_CONFIG_NAMES[0],
                repo_root.display()
            )
        })
}
