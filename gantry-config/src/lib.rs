// Configuration for Gantry applications
//
// Sources are layered in the order they are added to the builder; later
// sources override earlier ones key by key.

pub mod env;
pub mod error;
pub mod loader;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat, merge};

use gantry_core::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
use gantry_core::{PipelineOptions, ProviderDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Provider token under which [`GantryConfig`] is registered
pub const CONFIG_TOKEN: &str = "GantryConfig";

/// Logging section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
    /// `stdout`, `stderr` or a file path
    pub output: String,
    pub targets: bool,
    pub spans: bool,
    pub colors: bool,
    pub filter: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "stdout".to_string(),
            targets: true,
            spans: false,
            colors: false,
            filter: None,
        }
    }
}

/// Typed application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GantryConfig {
    pub pipeline: PipelineOptions,
    pub logging: LoggingSection,
}

impl GantryConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Deserialize and validate a merged configuration tree
    pub fn from_value(value: Value) -> Result<Self> {
        let config: GantryConfig = serde_json::from_value(value)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.handler_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "pipeline.handler_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if LogLevel::from_str(&self.logging.level).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "logging.level '{}' is not one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        if LogFormat::from_str(&self.logging.format).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "logging.format '{}' is not one of json, pretty, compact",
                self.logging.format
            )));
        }
        if self.logging.output.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.output cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        self.pipeline.clone()
    }

    /// Logging settings for [`LogConfig::init`]
    pub fn log_config(&self) -> Result<LogConfig> {
        self.validate()?;
        let level = LogLevel::from_str(&self.logging.level).unwrap_or(LogLevel::Info);
        let format = LogFormat::from_str(&self.logging.format).unwrap_or(LogFormat::Json);
        let output = match self.logging.output.to_lowercase().as_str() {
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            _ => LogOutput::File(self.logging.output.clone()),
        };

        let mut config = LogConfig::new()
            .level(level)
            .format(format)
            .output(output)
            .with_targets(self.logging.targets)
            .with_spans(self.logging.spans)
            .with_colors(self.logging.colors);
        if let Some(filter) = &self.logging.filter {
            config = config.with_env_filter(filter.clone());
        }
        Ok(config)
    }

    /// Singleton provider exposing this configuration to the container
    pub fn provider(&self) -> ProviderDescriptor {
        ProviderDescriptor::value(CONFIG_TOKEN, self.clone())
    }
}

enum Source {
    File(PathBuf),
    OptionalFile(PathBuf),
    Env(EnvLoader),
    Value(Value),
}

/// Layers configuration sources into a [`GantryConfig`]
#[derive(Default)]
pub struct ConfigBuilder {
    sources: Vec<Source>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A JSON, TOML or `.env` file that must exist
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources.push(Source::File(path.as_ref().to_path_buf()));
        self
    }

    /// A file that is skipped when missing
    pub fn optional_file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources
            .push(Source::OptionalFile(path.as_ref().to_path_buf()));
        self
    }

    /// `GANTRY_SECTION__KEY` variables from the process environment
    pub fn env(self) -> Self {
        self.env_loader(EnvLoader::default())
    }

    pub fn env_loader(mut self, loader: EnvLoader) -> Self {
        self.sources.push(Source::Env(loader));
        self
    }

    /// An in-memory overlay
    pub fn value(mut self, value: Value) -> Self {
        self.sources.push(Source::Value(value));
        self
    }

    /// The merged tree before deserialization
    pub fn merged(&self) -> Result<Value> {
        let mut tree = Value::Object(serde_json::Map::new());
        for source in &self.sources {
            let overlay = match source {
                Source::File(path) => ConfigLoader::auto(path)?.load_file(path)?,
                Source::OptionalFile(path) => {
                    if !path.exists() {
                        gantry_log::debug!(target: "gantry::config", "Skipping missing {}", path.display());
                        continue;
                    }
                    ConfigLoader::auto(path)?.load_file(path)?
                }
                Source::Env(loader) => loader.load(),
                Source::Value(value) => value.clone(),
            };
            merge(&mut tree, overlay);
        }
        Ok(tree)
    }

    pub fn build(self) -> Result<GantryConfig> {
        let tree = self.merged()?;
        let config = GantryConfig::from_value(tree)?;
        gantry_log::info!(
            target: "gantry::config",
            "Loaded configuration from {} source(s)",
            self.sources.len()
        );
        Ok(config)
    }
}
