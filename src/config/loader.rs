//! Configuration Loader
//!
//! Layers, lowest precedence first:
//!
//! 1. `{config_dir}/base.toml`
//! 2. `{config_dir}/{environment}.toml` (optional)
//! 3. `STORYLOOM__SECTION__KEY` environment variables
//! 4. `DATABASE_URL` / `RABBITMQ_URL` when set (only in [`ConfigLoader::load`])
//!
//! The environment comes from `STORYLOOM_ENV`, then `APP_ENV`, and defaults
//! to `development`.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::StoryloomConfig;

const DEFAULT_CONFIG_DIR: &str = "config/storyloom";

#[derive(Debug)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load with environment auto-detection from `STORYLOOM_CONFIG_DIR` or
    /// `config/storyloom`
    pub fn load() -> ConfigResult<StoryloomConfig> {
        let directory = env::var("STORYLOOM_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));
        let environment = Self::detect_environment();

        let builder = Self::builder(&directory, &environment)?
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("messaging.rabbitmq.url", env::var("RABBITMQ_URL").ok())?;

        Self::finish(builder, &environment)
    }

    /// Load from an explicit directory and environment without reading the
    /// well-known URL variables; useful in tests
    pub fn load_from_directory_with_env(directory: &Path, environment: &str) -> ConfigResult<StoryloomConfig> {
        let builder = Self::builder(directory, environment)?;
        Self::finish(builder, environment)
    }

    pub fn detect_environment() -> String {
        env::var("STORYLOOM_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn builder(
        directory: &Path,
        environment: &str,
    ) -> ConfigResult<config::ConfigBuilder<config::builder::DefaultState>> {
        let base = directory.join("base.toml");
        if !base.exists() {
            return Err(ConfigurationError::load(
                base.display().to_string(),
                "base configuration file not found",
            ));
        }
        let overlay = directory.join(format!("{environment}.toml"));

        debug!(
            base = %base.display(),
            overlay = %overlay.display(),
            overlay_present = overlay.exists(),
            "Loading configuration"
        );

        Ok(Config::builder()
            .add_source(File::from(base))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix("STORYLOOM")
                    .separator("__")
                    .try_parsing(true),
            ))
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        environment: &str,
    ) -> ConfigResult<StoryloomConfig> {
        let config: StoryloomConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(environment = %environment, config = ?config, "Configuration loaded successfully");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogFormat, MessagingProvider};
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_missing_base_file() {
        let dir = TempDir::new().unwrap();
        let err = ConfigLoader::load_from_directory_with_env(dir.path(), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::Load { .. }));
    }

    #[test]
    fn test_partial_base_uses_defaults() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "base.toml",
            r#"
[orchestration]
generation_limit_per_owner = 3
"#,
        );

        let config = ConfigLoader::load_from_directory_with_env(dir.path(), "development").unwrap();
        assert_eq!(config.orchestration.generation_limit_per_owner, 3);
        assert_eq!(config.consumer.batch_size, 10);
        assert_eq!(config.messaging.queues.results, "generation_results");
    }

    #[test]
    fn test_environment_overlay_wins() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "base.toml",
            r#"
[messaging]
provider = "rabbitmq"

[telemetry]
log_format = "pretty"
"#,
        );
        write(
            dir.path(),
            "test.toml",
            r#"
[messaging]
provider = "in_memory"

[telemetry]
log_format = "json"
"#,
        );

        let config = ConfigLoader::load_from_directory_with_env(dir.path(), "test").unwrap();
        assert_eq!(config.messaging.provider, MessagingProvider::InMemory);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);

        let config = ConfigLoader::load_from_directory_with_env(dir.path(), "production").unwrap();
        assert_eq!(config.messaging.provider, MessagingProvider::RabbitMq);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "base.toml",
            r#"
[consumer]
batch_size = 0
"#,
        );

        let err = ConfigLoader::load_from_directory_with_env(dir.path(), "test").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_shipped_configuration_is_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_DIR);
        for environment in ["development", "test", "production"] {
            ConfigLoader::load_from_directory_with_env(&dir, environment).unwrap();
        }
    }
}
