//! CLI commands

pub mod install;
pub mod render;
pub mod teardown;

use std::path::{Path, PathBuf};

use helmfleet_core::{DirectoryStore, FleetConfig};

use crate::error::Result;

/// Load `--config` when given, else the default location (defaults when absent)
pub fn load_config(path: Option<&Path>) -> Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::load_from(path)?,
        None => FleetConfig::load()?,
    };
    tracing::debug!(environments = config.environments.len(), "configuration loaded");
    Ok(config)
}

/// Template directory: `--templates`, then the config file, then `./templates`
pub fn template_store(config: &FleetConfig, templates: Option<&Path>) -> DirectoryStore {
    let root = templates
        .map(Path::to_path_buf)
        .or_else(|| config.template_dir.clone())
        .unwrap_or_else(|| PathBuf::from("templates"));
    DirectoryStore::new(root)
}
