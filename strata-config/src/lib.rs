//! Layered configuration loading utilities.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use strata_book::BookConfig;
use strata_sim::CalibrationParams;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Symbols to register in the book registry at startup.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub book: BookConfig,
    #[serde(default)]
    pub calibration: CalibrationParams,
}

impl AppConfig {
    /// Load configuration from a single TOML file.
    ///
    /// Calibration values are validated after deserialization; an
    /// out-of-range value fails the load instead of degrading at
    /// simulation time.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .build()
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let app: Self = config
            .try_deserialize()
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        app.validate()?;
        Ok(app)
    }

    /// Reject configurations whose calibration is out of range.
    pub fn validate(&self) -> Result<()> {
        self.calibration
            .validate()
            .context("invalid calibration parameters")?;
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `STRATA_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("STRATA")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    let app: AppConfig = config.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
