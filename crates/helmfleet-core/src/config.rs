//! helmfleet configuration
//!
//! Stored in `~/.config/helmfleet/config.yaml`:
//!
//! ```yaml
//! environments:
//!   - id: staging
//!     context: kind-staging
//! defaults:
//!   maxRetries: 3
//!   retryDelay: 10s
//!   helmTimeout: 10m
//!   readinessTimeout: 10m
//! helm:
//!   binary: helm
//! templateDir: /etc/helmfleet/templates
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    /// Clusters releases can be deployed to
    #[serde(default)]
    pub environments: Vec<Environment>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub helm: HelmSettings,

    /// Directory holding `<name>.yaml` release templates
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
}

/// A target cluster, identified by its kubeconfig context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,

    /// kubeconfig context the environment requires
    pub context: String,

    /// kubeconfig file (default resolution when unset)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

impl Environment {
    pub fn new(id: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: context.into(),
            kubeconfig: None,
        }
    }
}

/// Retry and timeout defaults for deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    #[serde(default = "default_helm_timeout", with = "humantime_serde")]
    pub helm_timeout: Duration,

    #[serde(default = "default_readiness_timeout", with = "humantime_serde")]
    pub readiness_timeout: Duration,

    /// Pass `--wait` to helm
    #[serde(default)]
    pub wait: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_helm_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(600)
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            helm_timeout: default_helm_timeout(),
            readiness_timeout: default_readiness_timeout(),
            wait: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSettings {
    /// helm executable (looked up on PATH when relative)
    #[serde(default = "default_helm_binary")]
    pub binary: PathBuf,
}

fn default_helm_binary() -> PathBuf {
    PathBuf::from("helm")
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self {
            binary: default_helm_binary(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("helmfleet").join("config.yaml"))
    }

    /// Look up an environment by id
    pub fn environment(&self, id: &str) -> Result<&Environment> {
        self.environments
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| CoreError::EnvironmentNotFound { id: id.to_string() })
    }

    fn validate(&self) -> Result<()> {
        for (i, env) in self.environments.iter().enumerate() {
            if env.id.is_empty() || env.context.is_empty() {
                return Err(CoreError::InvalidConfig {
                    message: format!("environment #{} needs both id and context", i),
                });
            }
            if self.environments[..i].iter().any(|e| e.id == env.id) {
                return Err(CoreError::InvalidConfig {
                    message: format!("duplicate environment id '{}'", env.id),
                });
            }
        }
        Ok(())
    }
}
