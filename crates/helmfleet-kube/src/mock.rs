//! In-memory stand-ins for helm and the cluster
//!
//! [`MockRunner`] replays a queue of canned outputs instead of spawning
//! processes and records every argument list it was asked to run.
//! [`MockCluster`] keeps namespaces and Deployments in memory, useful for
//! exercising rollouts without a Kubernetes cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{KubeError, Result};
use crate::helm::{CommandOutput, CommandRunner};
use crate::readiness::ReadinessOutcome;
use crate::resources::ClusterOps;

/// In-memory command runner for testing
#[derive(Clone, Default)]
pub struct MockRunner {
    script: Arc<Mutex<VecDeque<CommandOutput>>>,
    /// Output once the script is drained (success when unset)
    fallback: Option<CommandOutput>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockRunner {
    /// Runner that succeeds on every call
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the output for the next call
    pub fn then(self, output: CommandOutput) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(output);
        }
        self
    }

    /// Fail every call not covered by the script
    pub fn fail_always(mut self, code: i32, stderr: impl Into<String>) -> Self {
        self.fallback = Some(CommandOutput::failed(code, stderr));
        self
    }

    /// Argument lists of every call, in order
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls whose first argument is `subcommand`
    pub fn calls_to(&self, subcommand: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|args| args.first().map(String::as_str) == Some(subcommand))
            .count()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, _program: &Path, args: &[String]) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args.to_vec());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        Ok(scripted
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub namespaces_created: usize,
    pub namespaces_deleted: usize,
    pub job_cleanups: usize,
    pub watches: usize,
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    deployments: BTreeMap<String, Vec<String>>,
    counts: OperationCounts,
}

/// In-memory cluster for testing
///
/// Every Deployment is ready unless marked otherwise with [`MockCluster::stalled`].
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
    stalled: HashSet<String>,
    forbidden: HashSet<String>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a namespace
    pub fn with_namespace(self, name: &str) -> Self {
        self.with_state(|s| {
            s.namespaces.insert(name.to_string());
        });
        self
    }

    /// Deployments that appear in `namespace`
    pub fn with_deployments(self, namespace: &str, names: &[&str]) -> Self {
        self.with_state(|s| {
            s.deployments.insert(
                namespace.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            );
        });
        self
    }

    /// Deployment that never becomes ready
    pub fn stalled(mut self, name: &str) -> Self {
        self.stalled.insert(name.to_string());
        self
    }

    /// Namespace whose creation is rejected with 403
    pub fn forbid(mut self, namespace: &str) -> Self {
        self.forbidden.insert(namespace.to_string());
        self
    }

    pub fn namespaces(&self) -> BTreeSet<String> {
        self.with_state(|s| s.namespaces.clone())
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.with_state(|s| s.counts.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

#[async_trait]
impl ClusterOps for MockCluster {
    async fn ensure_namespace(&self, name: &str) -> Result<bool> {
        if self.forbidden.contains(name) {
            return Err(KubeError::Api(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("namespaces \"{}\" is forbidden", name),
                reason: "Forbidden".to_string(),
                code: 403,
            })));
        }
        Ok(self.with_state(|s| {
            let created = s.namespaces.insert(name.to_string());
            if created {
                s.counts.namespaces_created += 1;
            }
            created
        }))
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        Ok(self.with_state(|s| {
            s.deployments.remove(name);
            let deleted = s.namespaces.remove(name);
            if deleted {
                s.counts.namespaces_deleted += 1;
            }
            deleted
        }))
    }

    async fn delete_jobs(&self, _namespace: &str) -> Result<usize> {
        self.with_state(|s| s.counts.job_cleanups += 1);
        Ok(0)
    }

    async fn deployment_names(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self.with_state(|s| s.deployments.get(namespace).cloned().unwrap_or_default()))
    }

    async fn watch_ready(
        &self,
        names: &[String],
        _namespace: &str,
        timeout: Duration,
    ) -> ReadinessOutcome {
        self.with_state(|s| s.counts.watches += 1);

        let pending: BTreeSet<String> = names
            .iter()
            .filter(|n| self.stalled.contains(n.as_str()))
            .cloned()
            .collect();
        if pending.is_empty() {
            ReadinessOutcome::ready()
        } else {
            tokio::time::sleep(timeout).await;
            ReadinessOutcome::not_ready(pending)
        }
    }
}
