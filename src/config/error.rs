//! Configuration Error Types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration from {source_name}: {error}")]
    Load { source_name: String, error: String },

    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    #[error("Configuration validation failed: {error}")]
    ValidationError { error: String },
}

impl ConfigurationError {
    pub fn load(source_name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Load {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, value: impl ToString, context: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn validation_error(error: impl Into<String>) -> Self {
        Self::ValidationError { error: error.into() }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::load("layered sources", err)
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
