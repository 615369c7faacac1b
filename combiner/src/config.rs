//! Application configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::combiner::CombinerConfig;

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".stochastic-combiner.yml";

/// Main configuration for the `combiner` binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub log_level: Option<String>,

    /// Combiner engine settings
    pub combiner: CombinerConfig,

    /// Inputs and volume for `combiner simulate`
    pub simulation: SimulationConfig,
}

impl Config {
    /// Resolve the settings `combiner` runs with
    ///
    /// A `--config` path wins outright. Otherwise the working directory's
    /// `.stochastic-combiner.yml` is consulted, then the per-user file, and
    /// finally the built-in engine defaults. A fallback file that fails to
    /// parse or validate is reported and passed over.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // --config is authoritative: missing or invalid is fatal
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Override dropped next to where the simulation is launched
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Per-user settings under the platform config directory
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("stochastic-combiner").join("stochastic-combiner.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.combiner.validate().context("Invalid combiner section")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pre-filled inputs to register
    pub inputs: Vec<InputSpec>,

    /// Items to drain from the output before stopping
    pub take: usize,

    /// Empty timeout applied to every input, in milliseconds
    pub empty_timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            inputs: vec![InputSpec::new("heavy", 9.0, 1000), InputSpec::new("light", 1.0, 1000)],
            take: 1000,
            empty_timeout_ms: 10_000,
        }
    }
}

/// One simulated input: `NAME=PRIORITY:ITEMS` on the command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub priority: f64,
    pub items: usize,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, priority: f64, items: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            items,
        }
    }
}

impl FromStr for InputSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("Expected NAME=PRIORITY:ITEMS, got: {}", s))?;
        let (priority, items) = rest
            .split_once(':')
            .ok_or_else(|| format!("Expected PRIORITY:ITEMS after '=', got: {}", rest))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(format!("Input name is empty in: {}", s));
        }
        let priority: f64 = priority
            .trim()
            .parse()
            .map_err(|_| format!("Invalid priority: {}", priority))?;
        let items: usize = items.trim().parse().map_err(|_| format!("Invalid item count: {}", items))?;

        Ok(Self::new(name, priority, items))
    }
}
