//! CLI error types with exit code handling
//!
//! Every command returns [`CliError`], which carries a miette diagnostic for
//! display and maps to one of the codes in [`exit_codes`].

use miette::Diagnostic;
use thiserror::Error;

use helmfleet_core::{ConfigError, CoreError};
use helmfleet_kube::KubeError;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Configuration file, environment, or argument problem
    #[error("Configuration error: {message}")]
    #[diagnostic(code(helmfleet::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Template could not be found or loaded
    #[error("Template error: {message}")]
    #[diagnostic(code(helmfleet::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Parameters could not be resolved into values
    #[error("Render error: {message}")]
    #[diagnostic(code(helmfleet::cli::render))]
    Render { message: String },

    /// Cluster or helm failure
    #[error("Cluster error: {message}")]
    #[diagnostic(code(helmfleet::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Batch completed but not every replica succeeded
    #[error("{failed} replica(s) failed, {not_ready} namespace(s) not ready")]
    #[diagnostic(code(helmfleet::cli::deploy))]
    DeployFailed { failed: usize, not_ready: usize },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(helmfleet::cli::io))]
    Io { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(helmfleet::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Template { .. } | CliError::Render { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::DeployFailed { .. } => exit_codes::DEPLOY_FAILED,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Render {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TemplateNotFound { .. } => CliError::Template {
                message: err.to_string(),
                help: Some("Templates are read from <template-dir>/<name>.yaml".to_string()),
            },
            CoreError::InvalidTemplate { .. } => CliError::Template {
                message: err.to_string(),
                help: None,
            },
            CoreError::Config(e) => e.into(),
            CoreError::EnvironmentNotFound { .. } => CliError::config_with_help(
                err.to_string(),
                "Add it under `environments` in the config file",
            ),
            CoreError::Io(e) => e.into(),
            other => CliError::config(other.to_string()),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Config(e) => e.into(),
            KubeError::Core(e) => e.into(),
            KubeError::Kubeconfig { .. } => CliError::Cluster {
                message: err.to_string(),
                help: Some(
                    "Check that the context exists with `kubectl config get-contexts`".to_string(),
                ),
            },
            KubeError::Spawn { .. } => CliError::Cluster {
                message: err.to_string(),
                help: Some(
                    "Set `helm.binary` in the config file if helm is not on PATH".to_string(),
                ),
            },
            other => CliError::Cluster {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let missing = CliError::from(CoreError::TemplateNotFound {
            name: "x".to_string(),
        });
        assert_eq!(missing.exit_code(), exit_codes::TEMPLATE_ERROR);

        let render = CliError::from(KubeError::Config(ConfigError::MissingRequiredParameter {
            key: "a".to_string(),
        }));
        assert!(matches!(render, CliError::Render { .. }));

        let env = CliError::from(CoreError::EnvironmentNotFound {
            id: "prod".to_string(),
        });
        assert_eq!(env.exit_code(), exit_codes::CONFIG_ERROR);

        let failed = CliError::DeployFailed {
            failed: 1,
            not_ready: 0,
        };
        assert_eq!(failed.exit_code(), exit_codes::DEPLOY_FAILED);
    }
}
