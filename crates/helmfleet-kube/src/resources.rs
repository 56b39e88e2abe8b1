//! Namespace, custom resource and Job operations on a cluster session
//!
//! Deletes treat NotFound as "already gone" and report it through a `false`
//! return; creates treat Conflict as "already there". Every other API failure
//! is surfaced with its [`ApiErrorKind`](crate::error::ApiErrorKind).

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Api, ResourceExt,
    api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::ApiResource,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KubeError, Result};
use crate::readiness::ReadinessOutcome;
use crate::session::ClusterSession;

/// A custom resource type addressed by group/version/kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// URL path segment, e.g. `podchaos`
    pub plural: String,
}

impl CustomResourceKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

impl std::fmt::Display for CustomResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}/{}", self.plural, self.group, self.version)
    }
}

fn delete_background() -> DeleteParams {
    DeleteParams {
        propagation_policy: Some(kube::api::PropagationPolicy::Background),
        ..DeleteParams::default()
    }
}

/// Merge patch that clears `metadata.finalizers`
fn clear_finalizers_patch() -> serde_json::Value {
    serde_json::json!({ "metadata": { "finalizers": null } })
}

/// `Ok(true)` on success, `Ok(false)` when the object was already gone
fn absent_ok<T>(result: std::result::Result<T, kube::Error>) -> Result<bool> {
    match result.map_err(KubeError::from) {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// `Ok(true)` on success, `Ok(false)` when the object already existed
fn created_ok<T>(result: std::result::Result<T, kube::Error>) -> Result<bool> {
    match result.map_err(KubeError::from) {
        Ok(_) => Ok(true),
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}

impl ClusterSession {
    fn dynamic_api(&self, kind: &CustomResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client().clone(), namespace, &kind.api_resource())
    }

    /// Create `name` unless it already exists; `true` when it was created
    pub async fn ensure_namespace(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client().clone());
        if api.get_opt(name).await?.is_some() {
            tracing::debug!(namespace = name, "namespace exists");
            return Ok(false);
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        let created = created_ok(api.create(&PostParams::default(), &namespace).await)?;
        if created {
            tracing::info!(namespace = name, "namespace created");
        }
        Ok(created)
    }

    /// Delete a namespace and everything in it; `false` when already gone
    pub async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client().clone());
        let deleted = absent_ok(api.delete(name, &delete_background()).await)?;
        tracing::info!(namespace = name, deleted, "namespace delete requested");
        Ok(deleted)
    }

    /// Names of all `kind` objects in `namespace`
    pub async fn list_custom(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
    ) -> Result<Vec<String>> {
        let list = self
            .dynamic_api(kind, namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items.iter().map(|o| o.name_any()).collect())
    }

    pub async fn delete_custom(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let deleted = absent_ok(
            self.dynamic_api(kind, namespace)
                .delete(name, &DeleteParams::default())
                .await,
        )?;
        tracing::info!(%kind, namespace, name, deleted, "custom resource delete requested");
        Ok(deleted)
    }

    /// Strip finalizers from one object so a pending delete can complete
    pub async fn remove_finalizers(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let patch = clear_finalizers_patch();
        absent_ok(
            self.dynamic_api(kind, namespace)
                .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await,
        )
    }

    /// Strip finalizers from every `kind` object in `namespace` that has any
    ///
    /// Returns how many objects were patched.
    pub async fn remove_all_finalizers(
        &self,
        kind: &CustomResourceKind,
        namespace: &str,
    ) -> Result<usize> {
        let list = self
            .dynamic_api(kind, namespace)
            .list(&ListParams::default())
            .await?;

        let mut patched = 0;
        for object in list.items.iter().filter(|o| !o.finalizers().is_empty()) {
            if self
                .remove_finalizers(kind, namespace, &object.name_any())
                .await?
            {
                patched += 1;
            }
        }
        tracing::info!(%kind, namespace, patched, "finalizers removed");
        Ok(patched)
    }

    /// Delete every Job in `namespace`, cascading to their Pods
    pub async fn delete_jobs(&self, namespace: &str) -> Result<usize> {
        let api: Api<Job> = Api::namespaced(self.client().clone(), namespace);
        let deleted = api
            .delete_collection(&delete_background(), &ListParams::default())
            .await?
            .left()
            .map_or(0, |list| list.items.len());
        tracing::info!(namespace, deleted, "jobs deleted");
        Ok(deleted)
    }

    /// Names of all Deployments in `namespace`
    pub async fn deployment_names(&self, namespace: &str) -> Result<Vec<String>> {
        let api: Api<Deployment> = Api::namespaced(self.client().clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|d| d.name_any()).collect())
    }
}

/// Cluster operations needed to roll replicas out and back
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn ensure_namespace(&self, name: &str) -> Result<bool>;

    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    async fn delete_jobs(&self, namespace: &str) -> Result<usize>;

    async fn deployment_names(&self, namespace: &str) -> Result<Vec<String>>;

    async fn watch_ready(
        &self,
        names: &[String],
        namespace: &str,
        timeout: Duration,
    ) -> ReadinessOutcome;
}

#[async_trait]
impl ClusterOps for ClusterSession {
    async fn ensure_namespace(&self, name: &str) -> Result<bool> {
        ClusterSession::ensure_namespace(self, name).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        ClusterSession::delete_namespace(self, name).await
    }

    async fn delete_jobs(&self, namespace: &str) -> Result<usize> {
        ClusterSession::delete_jobs(self, namespace).await
    }

    async fn deployment_names(&self, namespace: &str) -> Result<Vec<String>> {
        ClusterSession::deployment_names(self, namespace).await
    }

    async fn watch_ready(
        &self,
        names: &[String],
        namespace: &str,
        timeout: Duration,
    ) -> ReadinessOutcome {
        ClusterSession::watch_ready(self, names, namespace, timeout).await
    }
}
