//! Layered application configuration
//!
//! Sources, lowest to highest precedence: built-in defaults, the TOML file
//! given by `--config`, `KEEL_*` environment variables (`__` separates
//! sections), and command-line flags.

use std::path::Path;

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use keel_memory::core::size::MB;
use serde::{Deserialize, Serialize};

/// Resolved application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Pool capacity in MiB
    pub memory_pool_size_mb: u64,
    /// Processing cycles performed by `run`
    pub processing_cycles: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            memory_pool_size_mb: 256,
            processing_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub memory_pool_size_mb: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl AppConfig {
    /// Loads and validates the configuration from every source.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            let table = read_table(path)?;
            let normalized = toml::to_string(&table).context("failed to re-encode configuration")?;
            figment = figment.merge(Toml::string(&normalized));
        }

        figment = figment.merge(Env::prefixed("KEEL_").split("__"));

        if let Some(size) = overrides.memory_pool_size_mb {
            figment = figment.merge(Serialized::default("core.memory_pool_size_mb", size));
        }
        if let Some(level) = &overrides.log_level {
            figment = figment.merge(Serialized::default("log.level", level));
        }
        if let Some(format) = overrides.log_format {
            figment = figment.merge(Serialized::default("log.format", format));
        }

        let config: Self = figment.extract().context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pool cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.core.memory_pool_size_mb == 0 {
            bail!("core.memory_pool_size_mb must be a positive integer");
        }
        self.pool_capacity()?;
        Ok(())
    }

    /// Pool capacity in bytes.
    pub fn pool_capacity(&self) -> Result<usize> {
        let size = self.core.memory_pool_size_mb;
        usize::try_from(size)
            .ok()
            .and_then(|mb| mb.checked_mul(MB))
            .with_context(|| format!("core.memory_pool_size_mb = {size} overflows the address space"))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to encode configuration")
    }
}

/// Reads a TOML file, folding section names to lowercase so `[Core]` and
/// `[core]` name the same section.
fn read_table(path: &Path) -> Result<toml::Table> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed: toml::Table = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    let mut table = toml::Table::new();
    for (key, value) in parsed {
        let key = key.to_lowercase();
        match value {
            toml::Value::Table(section) => {
                let entry = table
                    .entry(key)
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()));
                if let toml::Value::Table(existing) = entry {
                    existing.extend(section);
                } else {
                    *entry = toml::Value::Table(section);
                }
            }
            value => {
                table.insert(key, value);
            }
        }
    }
    Ok(table)
}
