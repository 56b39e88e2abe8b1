//! Per-replica rendering context

use serde::Serialize;

use crate::params::ImageRef;

/// Attributes available to dynamic parameter templates
///
/// Field names serialize in PascalCase so `{{ .Tag }}` style placeholders
/// resolve directly against this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RenderContext {
    pub registry: String,
    pub namespace: String,
    pub repository: String,
    pub tag: String,
    pub index: usize,
}

impl RenderContext {
    /// Build the context for replica `index` of `image`
    pub fn for_replica(image: &ImageRef, index: usize) -> Self {
        Self {
            registry: image.registry.clone(),
            namespace: image.namespace.clone(),
            repository: image.repository.clone(),
            tag: image.tag.clone(),
            index,
        }
    }
}
