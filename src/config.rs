//! Host configuration loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use scriptvm_core::RuntimeConfig;
use serde::{Deserialize, Serialize};

/// File name looked up inside the user's config directory.
const CONFIG_FILE: &str = "config.toml";

/// Everything the host needs to run scripts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directories searched, in order, for script images.
    pub script_dirs: Vec<PathBuf>,
    /// Extension appended to script names that carry none.
    pub extension: String,
    /// Resolution of the host timer.
    pub ticks_per_second: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Pause between scheduler ticks in the CLI run loop.
    pub tick_interval_ms: u64,
    /// Upper bound on ticks for one CLI run. `None` runs until no program is left.
    pub max_ticks: Option<u64>,
    /// Scheduler and stack limits handed to the core runtime.
    pub runtime: RuntimeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            script_dirs: vec![PathBuf::from(".")],
            extension: "int".to_string(),
            ticks_per_second: 1000,
            log_level: "info".to_string(),
            tick_interval_ms: 10,
            max_ticks: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl HostConfig {
    /// `<config dir>/scriptvm/config.toml`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| anyhow!("unable to determine configuration directory"))?;
        Ok(base.join("scriptvm").join(CONFIG_FILE))
    }

    /// Reads `path`, or the default location when `path` is `None`. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path()?;
                if !path.exists() {
                    return Ok((Self::default(), None));
                }
                path
            }
        };
        let data = fs::read_to_string(&path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        let config = Self::parse(&data)
            .with_context(|| format!("parsing configuration {}", path.display()))?;
        Ok((config, Some(path)))
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(data)?;
        config.runtime.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("writing configuration to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = HostConfig::parse(
            r#"
extension = "svm"

[runtime]
burst_size = 25
"#,
        )
        .expect("parses");
        assert_eq!(config.extension, "svm");
        assert_eq!(config.runtime.burst_size, 25);
        assert_eq!(config.runtime.stack_capacity, RuntimeConfig::default().stack_capacity);
        assert_eq!(config.ticks_per_second, 1000);
    }

    #[test]
    fn invalid_runtime_limits_are_rejected() {
        let err = HostConfig::parse("[runtime]\nburst_size = 0\n").expect_err("zero burst");
        assert!(err.to_string().contains("burst size"));
    }
}
