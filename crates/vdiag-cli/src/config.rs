//! Configuration file handling for vdiag
//!
//! The file is the engine configuration plus an optional `[cli]` table:
//!
//! ```toml
//! knowledge_dir = "knowledge"
//! reference_files = ["reference/obd2.vdr"]
//!
//! [cli]
//! output = "json"
//! no_color = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vdiag_engine::EngineConfig;

use crate::output::OutputFormat;

/// CLI presentation defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliSection {
    /// Default output format
    pub output: Option<OutputFormat>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

/// Configuration for the CLI tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cli: CliSection,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self {
            engine: config.engine.resolve_paths(base),
            cli: config.cli,
        })
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("vdiag");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        self,
        knowledge_dir: Option<&Path>,
        output: Option<OutputFormat>,
        no_color: bool,
    ) -> MergedConfig {
        let mut engine = self.engine;
        if let Some(dir) = knowledge_dir {
            engine.knowledge_dir = dir.to_path_buf();
        }
        MergedConfig {
            engine,
            output: output.or(self.cli.output).unwrap_or_default(),
            no_color: no_color || self.cli.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub engine: EngineConfig,
    pub output: OutputFormat,
    pub no_color: bool,
}
