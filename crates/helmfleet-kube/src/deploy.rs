//! Multi-replica rollout and teardown
//!
//! For each replica index the [`Deployer`] derives the namespace and release
//! name, ensures the namespace, decides whether the release must be
//! installed, skipped or reinstalled, renders its values and hands it to
//! helm. Readiness of every touched namespace is then awaited concurrently.
//!
//! A replica that fails is tallied in the [`BatchReport`]; its siblings
//! still run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use helmfleet_core::{Defaults, Overrides, ReleaseTemplate, resolve};

use crate::error::Result;
use crate::helm::{CommandRunner, InstallPolicy, ReleaseDescriptor, ReleaseManager};
use crate::readiness::{BatchReadiness, ReadinessRequest, join_readiness};
use crate::resources::ClusterOps;

/// Options for a multi-replica install
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Number of replicas
    pub replicas: usize,

    /// Index of the first replica
    pub first_index: usize,

    /// Values for overridable fixed parameters
    pub overrides: Overrides,

    /// Reinstall releases that already exist
    pub force: bool,

    pub policy: InstallPolicy,

    /// Wait for Deployments after installing
    pub wait_ready: bool,

    pub readiness_timeout: Duration,
}

impl DeployOptions {
    pub fn new(replicas: usize, defaults: &Defaults) -> Self {
        Self {
            replicas,
            first_index: 0,
            overrides: Overrides::new(),
            force: false,
            policy: InstallPolicy::from_defaults(defaults),
            wait_ready: true,
            readiness_timeout: defaults.readiness_timeout,
        }
    }

    pub fn starting_at(mut self, index: usize) -> Self {
        self.first_index = index;
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_policy(mut self, policy: InstallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Return once helm finishes, without watching Deployments
    pub fn no_wait(mut self) -> Self {
        self.wait_ready = false;
        self
    }

    fn indices(&self) -> std::ops::Range<usize> {
        self.first_index..self.first_index + self.replicas
    }
}

/// What to do with a release given whether it already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    Install,
    Skip,
    Reinstall,
}

pub fn plan_action(exists: bool, force: bool) -> InstallAction {
    match (exists, force) {
        (false, _) => InstallAction::Install,
        (true, false) => InstallAction::Skip,
        (true, true) => InstallAction::Reinstall,
    }
}

/// Build the helm descriptor for replica `index`
///
/// Values are rendered in full or not at all.
pub fn descriptor_for(
    template: &ReleaseTemplate,
    index: usize,
    overrides: Option<&Overrides>,
) -> Result<ReleaseDescriptor> {
    let namespace = template.namespace_for(index)?;
    let release = template.release_name_for(index)?;
    let values = resolve(template, index, overrides)?;

    let mut descriptor =
        ReleaseDescriptor::for_chart(release, &template.chart, namespace).with_values(&values);
    if let Some(file) = &template.values_file {
        descriptor = descriptor.with_values_file(file);
    }
    Ok(descriptor)
}

/// Final state of one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum ReplicaStatus {
    Installed,
    Reinstalled,
    /// Release already present and not forced
    Skipped,
    /// Release uninstalled
    Removed,
    /// Nothing to uninstall
    Absent,
    Failed(String),
}

impl ReplicaStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ReplicaStatus::Failed(_))
    }

    /// The release should now be running in the cluster
    fn is_deployed(&self) -> bool {
        matches!(
            self,
            ReplicaStatus::Installed | ReplicaStatus::Reinstalled | ReplicaStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaReport {
    pub index: usize,
    pub namespace: String,
    pub release: String,
    #[serde(flatten)]
    pub status: ReplicaStatus,
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub installed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub absent: usize,
    pub failed: usize,
    /// Namespaces whose Deployments did not all become ready
    pub not_ready: usize,
}

/// Outcome of a rollout or teardown
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub replicas: Vec<ReplicaReport>,
    #[serde(skip)]
    pub readiness: BatchReadiness,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        !self.replicas.iter().any(|r| r.status.is_failed()) && self.readiness.all_ready()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReplicaReport> {
        self.replicas.iter().filter(|r| r.status.is_failed())
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            not_ready: self.readiness.failed().len(),
            ..BatchSummary::default()
        };
        for replica in &self.replicas {
            match replica.status {
                ReplicaStatus::Installed | ReplicaStatus::Reinstalled => summary.installed += 1,
                ReplicaStatus::Skipped => summary.skipped += 1,
                ReplicaStatus::Removed => summary.removed += 1,
                ReplicaStatus::Absent => summary.absent += 1,
                ReplicaStatus::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Rolls a release template out to, and back from, one cluster
pub struct Deployer<'a, C: ClusterOps + 'static, R: CommandRunner> {
    cluster: Arc<C>,
    helm: &'a ReleaseManager<R>,
}

impl<'a, C: ClusterOps + 'static, R: CommandRunner> Deployer<'a, C, R> {
    pub fn new(cluster: Arc<C>, helm: &'a ReleaseManager<R>) -> Self {
        Self { cluster, helm }
    }

    /// Install `options.replicas` copies of `template`
    pub async fn install_replicas(
        &self,
        template: &ReleaseTemplate,
        options: &DeployOptions,
    ) -> BatchReport {
        let started_at = Utc::now();
        tracing::info!(
            template = %template.name,
            replicas = options.replicas,
            force = options.force,
            "installing replicas"
        );

        let mut replicas = Vec::with_capacity(options.replicas);
        for index in options.indices() {
            replicas.push(self.install_one(template, index, options).await);
        }

        let readiness = if options.wait_ready && !options.policy.dry_run {
            self.await_readiness(&mut replicas, options.readiness_timeout)
                .await
        } else {
            BatchReadiness::default()
        };

        BatchReport {
            started_at,
            finished_at: Utc::now(),
            replicas,
            readiness,
        }
    }

    async fn install_one(
        &self,
        template: &ReleaseTemplate,
        index: usize,
        options: &DeployOptions,
    ) -> ReplicaReport {
        let (namespace, release) =
            match (template.namespace_for(index), template.release_name_for(index)) {
                (Ok(namespace), Ok(release)) => (namespace, release),
                (Err(e), _) | (_, Err(e)) => {
                    return ReplicaReport {
                        index,
                        namespace: String::new(),
                        release: String::new(),
                        status: ReplicaStatus::Failed(e.to_string()),
                    };
                }
            };

        let status = match self
            .roll_out(template, index, &namespace, &release, options)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(index, %namespace, %release, error = %e, "replica failed");
                ReplicaStatus::Failed(e.to_string())
            }
        };

        ReplicaReport {
            index,
            namespace,
            release,
            status,
        }
    }

    async fn roll_out(
        &self,
        template: &ReleaseTemplate,
        index: usize,
        namespace: &str,
        release: &str,
        options: &DeployOptions,
    ) -> Result<ReplicaStatus> {
        let dry_run = options.policy.dry_run;

        if !dry_run {
            self.cluster.ensure_namespace(namespace).await?;
        }

        let action = plan_action(self.helm.exists(release, namespace).await?, options.force);
        if action == InstallAction::Skip {
            tracing::info!(%release, %namespace, "release exists, skipping");
            return Ok(ReplicaStatus::Skipped);
        }

        let descriptor = descriptor_for(template, index, Some(&options.overrides))?;

        match action {
            InstallAction::Reinstall if dry_run => {
                self.helm
                    .upgrade(&descriptor, false, &options.policy)
                    .await?;
                Ok(ReplicaStatus::Reinstalled)
            }
            InstallAction::Reinstall => {
                self.helm
                    .uninstall(release, namespace, true, options.policy.timeout)
                    .await?;
                self.helm.install(&descriptor, &options.policy).await?;
                Ok(ReplicaStatus::Reinstalled)
            }
            _ => {
                self.helm.install(&descriptor, &options.policy).await?;
                Ok(ReplicaStatus::Installed)
            }
        }
    }

    /// Watch every deployed namespace concurrently
    ///
    /// A namespace whose Deployments cannot be listed marks its replica failed.
    async fn await_readiness(
        &self,
        replicas: &mut [ReplicaReport],
        timeout: Duration,
    ) -> BatchReadiness {
        let mut requests = Vec::new();
        for replica in replicas.iter_mut().filter(|r| r.status.is_deployed()) {
            match self.cluster.deployment_names(&replica.namespace).await {
                Ok(names) => requests.push(ReadinessRequest::new(&replica.namespace, names)),
                Err(e) => {
                    tracing::error!(
                        namespace = %replica.namespace,
                        error = %e,
                        "cannot list deployments"
                    );
                    replica.status = ReplicaStatus::Failed(e.to_string());
                }
            }
        }

        let cluster = self.cluster.clone();
        join_readiness(requests, move |request| {
            let cluster = cluster.clone();
            async move {
                cluster
                    .watch_ready(&request.names, &request.namespace, timeout)
                    .await
            }
        })
        .await
    }

    /// Uninstall `replicas` releases starting at `first_index` and delete their namespaces
    pub async fn teardown(
        &self,
        template: &ReleaseTemplate,
        first_index: usize,
        replicas: usize,
        timeout: Option<Duration>,
    ) -> BatchReport {
        let started_at = Utc::now();
        tracing::info!(template = %template.name, replicas, "tearing down replicas");

        let mut reports = Vec::with_capacity(replicas);
        for index in first_index..first_index + replicas {
            let (namespace, release) =
                match (template.namespace_for(index), template.release_name_for(index)) {
                    (Ok(namespace), Ok(release)) => (namespace, release),
                    (Err(e), _) | (_, Err(e)) => {
                        reports.push(ReplicaReport {
                            index,
                            namespace: String::new(),
                            release: String::new(),
                            status: ReplicaStatus::Failed(e.to_string()),
                        });
                        continue;
                    }
                };

            let status = match self.tear_down_one(&namespace, &release, timeout).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!(index, %namespace, %release, error = %e, "teardown failed");
                    ReplicaStatus::Failed(e.to_string())
                }
            };
            reports.push(ReplicaReport {
                index,
                namespace,
                release,
                status,
            });
        }

        BatchReport {
            started_at,
            finished_at: Utc::now(),
            replicas: reports,
            readiness: BatchReadiness::default(),
        }
    }

    async fn tear_down_one(
        &self,
        namespace: &str,
        release: &str,
        timeout: Option<Duration>,
    ) -> Result<ReplicaStatus> {
        let removed = self.helm.uninstall(release, namespace, true, timeout).await?;
        self.cluster.delete_jobs(namespace).await?;
        self.cluster.delete_namespace(namespace).await?;

        Ok(if removed {
            ReplicaStatus::Removed
        } else {
            ReplicaStatus::Absent
        })
    }
}
