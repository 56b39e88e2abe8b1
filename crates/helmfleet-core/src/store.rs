//! Release template stores
//!
//! A store answers one question: "give me the template called X". The
//! production source of templates lives elsewhere; this crate ships a YAML
//! directory store and an in-memory store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::params::ReleaseTemplate;

/// Source of release templates
pub trait TemplateStore: Send + Sync {
    /// Load and validate the template called `name`
    fn load(&self, name: &str) -> Result<ReleaseTemplate>;

    /// Names of all templates the store knows about
    fn names(&self) -> Result<Vec<String>>;
}

/// Templates stored as `<root>/<name>.yaml`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
    }
}

impl TemplateStore for DirectoryStore {
    fn load(&self, name: &str) -> Result<ReleaseTemplate> {
        let path = self.path_for(name).ok_or_else(|| CoreError::TemplateNotFound {
            name: name.to_string(),
        })?;

        let content = std::fs::read_to_string(&path)?;
        let template: ReleaseTemplate = serde_yaml::from_str(&content)?;
        template
            .validate()
            .map_err(|e| CoreError::InvalidTemplate {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(name, path = %path.display(), "loaded release template");
        Ok(template)
    }

    fn names(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml")
            );
            if is_yaml && let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// In-memory store, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    templates: HashMap<String, ReleaseTemplate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = ReleaseTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    pub fn insert(&mut self, template: ReleaseTemplate) {
        self.templates.insert(template.name.clone(), template);
    }
}

impl TemplateStore for MemoryStore {
    fn load(&self, name: &str) -> Result<ReleaseTemplate> {
        let template = self
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::TemplateNotFound {
                name: name.to_string(),
            })?;
        template.validate().map_err(|e| CoreError::InvalidTemplate {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(template)
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
