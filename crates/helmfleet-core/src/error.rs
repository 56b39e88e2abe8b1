//! Core error types

use thiserror::Error;

/// Errors raised while resolving a parameter template into values
///
/// Any of these aborts a whole `resolve()` call; no partial values escape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Missing required parameter: {key}")]
    MissingRequiredParameter { key: String },

    #[error("Dynamic parameter '{key}' has no template string")]
    MissingTemplateString { key: String },

    #[error("Failed to render template for '{key}': {message}")]
    TemplateRender { key: String, message: String },

    #[error("Key '{key}' is used both as a value and as a parent of other keys")]
    KeyConflict { key: String },

    #[error("Invalid parameter key: '{key}'")]
    InvalidKey { key: String },

    #[error("Invalid image reference: '{reference}'")]
    InvalidImage { reference: String },

    #[error("Invalid value token '{token}'. Expected path=value")]
    InvalidToken { token: String },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Invalid template '{name}': {message}")]
    InvalidTemplate { name: String, message: String },

    #[error("Environment not found: {id}")]
    EnvironmentNotFound { id: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
