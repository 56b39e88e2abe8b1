//! Watch-based Deployment readiness
//!
//! A Deployment is ready once `spec.replicas`, `status.replicas`,
//! `status.readyReplicas` and `status.availableReplicas` all agree. Status
//! counts the API server omits are read as zero, so a Deployment scaled to
//! zero is ready as soon as it is observed.
//!
//! Tracking is bounded by a hard deadline and returns the moment the pending
//! set drains. A timeout is an ordinary [`ReadinessOutcome`], not an error.

use futures::{Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use kube::runtime::{WatchStreamExt, watcher};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use crate::session::ClusterSession;

/// Longest server-side watch window requested in one call
const MAX_WATCH_SECONDS: u64 = 290;

/// The replica counts readiness is judged on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub name: String,

    /// `spec.replicas`
    pub desired: Option<i32>,

    pub replicas: i32,

    pub ready: i32,

    pub available: i32,
}

impl ReplicaSnapshot {
    /// Extract counts from a Deployment; `None` when it has no name
    pub fn from_deployment(deployment: &Deployment) -> Option<Self> {
        let name = deployment.metadata.name.clone()?;
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas);
        let status = deployment.status.as_ref();

        Some(Self {
            name,
            desired,
            replicas: status.and_then(|s| s.replicas).unwrap_or(0),
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            available: status.and_then(|s| s.available_replicas).unwrap_or(0),
        })
    }

    pub fn is_ready(&self) -> bool {
        match self.desired {
            Some(desired) => {
                desired == self.replicas && desired == self.ready && desired == self.available
            }
            None => false,
        }
    }
}

/// Result of waiting on a set of Deployments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessOutcome {
    pub all_ready: bool,

    /// Names not confirmed ready before the watch ended
    pub pending: BTreeSet<String>,
}

impl ReadinessOutcome {
    pub fn ready() -> Self {
        Self {
            all_ready: true,
            pending: BTreeSet::new(),
        }
    }

    pub fn not_ready(pending: BTreeSet<String>) -> Self {
        Self {
            all_ready: false,
            pending,
        }
    }
}

/// Consume snapshots until every name is ready, the stream ends, or `timeout` passes
///
/// A stream error ends tracking the same way a timeout does.
pub async fn track_readiness<S, E, I>(events: S, names: I, timeout: Duration) -> ReadinessOutcome
where
    S: Stream<Item = Result<ReplicaSnapshot, E>>,
    E: std::fmt::Display,
    I: IntoIterator<Item = String>,
{
    let mut pending: BTreeSet<String> = names.into_iter().collect();
    if pending.is_empty() {
        return ReadinessOutcome::ready();
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut events = std::pin::pin!(events);

    loop {
        match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(Ok(snapshot))) => {
                if snapshot.is_ready() && pending.remove(&snapshot.name) {
                    tracing::debug!(
                        deployment = %snapshot.name,
                        remaining = pending.len(),
                        "deployment ready"
                    );
                    if pending.is_empty() {
                        return ReadinessOutcome::ready();
                    }
                }
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(error = %e, "watch failed");
                break;
            }
            Ok(None) => {
                tracing::warn!("watch ended before all deployments were ready");
                break;
            }
            Err(_) => {
                tracing::warn!(?timeout, pending = ?pending, "timed out waiting for readiness");
                break;
            }
        }
    }

    ReadinessOutcome::not_ready(pending)
}

/// Deployments to wait on in one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessRequest {
    pub namespace: String,
    pub names: Vec<String>,
}

impl ReadinessRequest {
    pub fn new(namespace: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            names,
        }
    }
}

/// Per-namespace readiness of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReadiness {
    pub outcomes: BTreeMap<String, ReadinessOutcome>,
}

impl BatchReadiness {
    pub fn all_ready(&self) -> bool {
        self.outcomes.values().all(|o| o.all_ready)
    }

    /// Namespaces with at least one Deployment still pending
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.all_ready)
            .map(|(ns, _)| ns.as_str())
            .collect()
    }

    fn record(&mut self, namespace: String, outcome: ReadinessOutcome) {
        match self.outcomes.get_mut(&namespace) {
            Some(existing) => {
                existing.all_ready &= outcome.all_ready;
                existing.pending.extend(outcome.pending);
            }
            None => {
                self.outcomes.insert(namespace, outcome);
            }
        }
    }
}

/// Run one readiness probe per request on its own task and collect every outcome
///
/// A failing namespace never cancels its siblings. A probe task that panics
/// is reported as not ready with all of its names pending.
pub async fn join_readiness<P, Fut>(requests: Vec<ReadinessRequest>, probe: P) -> BatchReadiness
where
    P: Fn(ReadinessRequest) -> Fut,
    Fut: Future<Output = ReadinessOutcome> + Send + 'static,
{
    let tasks: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let handle = tokio::spawn(probe(request.clone()));
            (request, handle)
        })
        .collect();

    let mut batch = BatchReadiness::default();
    for (request, handle) in tasks {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    namespace = %request.namespace,
                    error = %e,
                    "readiness task failed"
                );
                ReadinessOutcome::not_ready(request.names.iter().cloned().collect())
            }
        };
        batch.record(request.namespace, outcome);
    }
    batch
}

impl ClusterSession {
    /// Watch Deployments in `namespace` until `names` are all ready or `timeout` passes
    pub async fn watch_ready(
        &self,
        names: &[String],
        namespace: &str,
        timeout: Duration,
    ) -> ReadinessOutcome {
        let api: Api<Deployment> = Api::namespaced(self.client().clone(), namespace);
        let window = timeout.as_secs().clamp(1, MAX_WATCH_SECONDS) as u32;
        let config = watcher::Config::default().timeout(window);

        let events = watcher(api, config)
            .applied_objects()
            .try_filter_map(|deployment| {
                futures::future::ready(Ok(ReplicaSnapshot::from_deployment(&deployment)))
            });

        tracing::info!(namespace, deployments = names.len(), ?timeout, "waiting for deployments");
        track_readiness(events, names.iter().cloned(), timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::convert::Infallible;

    fn snapshot(name: &str, desired: i32, ready: i32) -> ReplicaSnapshot {
        ReplicaSnapshot {
            name: name.to_string(),
            desired: Some(desired),
            replicas: desired,
            ready,
            available: ready,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_snapshot_from_deployment() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("ts-order-service".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(2),
                ready_replicas: Some(2),
                available_replicas: Some(1),
                ..Default::default()
            }),
        };

        let snap = ReplicaSnapshot::from_deployment(&deployment).unwrap();
        assert_eq!(snap.available, 1);
        assert!(!snap.is_ready());
    }

    #[test]
    fn test_scaled_to_zero_is_ready() {
        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some("idle".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(0),
                ..Default::default()
            }),
            status: None,
        };

        assert!(ReplicaSnapshot::from_deployment(&deployment).unwrap().is_ready());
    }

    #[test]
    fn test_missing_spec_replicas_is_not_ready() {
        let snap = ReplicaSnapshot {
            name: "x".to_string(),
            desired: None,
            replicas: 0,
            ready: 0,
            available: 0,
        };
        assert!(!snap.is_ready());
        assert!(ReplicaSnapshot::from_deployment(&Deployment::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_as_soon_as_all_ready() {
        let events = stream::iter(vec![
            Ok::<_, Infallible>(snapshot("a", 1, 0)),
            Ok(snapshot("unrelated", 1, 1)),
            Ok(snapshot("a", 1, 1)),
            Ok(snapshot("b", 3, 3)),
        ])
        // Keep the stream open so only readiness can end tracking
        .chain(stream::pending());

        let start = tokio::time::Instant::now();
        let outcome = track_readiness(events, names(&["a", "b"]), Duration::from_secs(60)).await;

        assert!(outcome.all_ready);
        assert!(outcome.pending.is_empty());
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_residual_pending() {
        let events = stream::iter(vec![
            Ok::<_, Infallible>(snapshot("a", 1, 1)),
            Ok(snapshot("b", 2, 1)),
        ])
        .chain(stream::pending());

        let start = tokio::time::Instant::now();
        let outcome = track_readiness(events, names(&["a", "b"]), Duration::from_secs(30)).await;

        assert!(!outcome.all_ready);
        assert_eq!(outcome.pending, BTreeSet::from(["b".to_string()]));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_stream_error_ends_tracking() {
        let events = stream::iter(vec![
            Ok(snapshot("a", 1, 1)),
            Err("connection reset".to_string()),
            Ok(snapshot("b", 1, 1)),
        ]);

        let outcome = track_readiness(events, names(&["a", "b"]), Duration::from_secs(30)).await;
        assert_eq!(outcome.pending, BTreeSet::from(["b".to_string()]));
    }

    #[tokio::test]
    async fn test_stream_end_is_failure() {
        let events = stream::iter(vec![Ok::<_, Infallible>(snapshot("a", 1, 0))]);
        let outcome = track_readiness(events, names(&["a"]), Duration::from_secs(30)).await;
        assert!(!outcome.all_ready);
    }

    #[tokio::test]
    async fn test_empty_name_set_is_ready() {
        let events = stream::pending::<Result<ReplicaSnapshot, Infallible>>();
        let outcome = track_readiness(events, Vec::new(), Duration::from_secs(1)).await;
        assert!(outcome.all_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_readiness_collects_every_namespace() {
        let requests = vec![
            ReadinessRequest::new("ts0", names(&["a"])),
            ReadinessRequest::new("ts1", names(&["a", "b"])),
            ReadinessRequest::new("ts2", names(&["c"])),
        ];

        let batch = join_readiness(requests, |request| async move {
            match request.namespace.as_str() {
                "ts1" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    ReadinessOutcome::not_ready(BTreeSet::from(["b".to_string()]))
                }
                "ts2" => panic!("watch blew up"),
                _ => ReadinessOutcome::ready(),
            }
        })
        .await;

        assert_eq!(batch.outcomes.len(), 3);
        assert!(batch.outcomes["ts0"].all_ready);
        assert_eq!(batch.failed(), vec!["ts1", "ts2"]);
        assert_eq!(
            batch.outcomes["ts2"].pending,
            BTreeSet::from(["c".to_string()])
        );
        assert!(!batch.all_ready());
    }

    #[test]
    fn test_duplicate_namespace_outcomes_merge() {
        let mut batch = BatchReadiness::default();
        batch.record("ts0".to_string(), ReadinessOutcome::ready());
        batch.record(
            "ts0".to_string(),
            ReadinessOutcome::not_ready(BTreeSet::from(["x".to_string()])),
        );

        assert!(!batch.all_ready());
        assert_eq!(batch.outcomes["ts0"].pending.len(), 1);
    }

    mod api_server {
        use super::*;
        use crate::mock::api::{Exchange, session};
        use http::Method;
        use serde_json::json;

        const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/ts0/deployments";

        fn deployment(name: &str, desired: i32, ready: i32) -> serde_json::Value {
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": { "name": name, "namespace": "ts0", "resourceVersion": "11" },
                "spec": { "replicas": desired, "selector": {}, "template": {} },
                "status": {
                    "replicas": desired,
                    "readyReplicas": ready,
                    "availableReplicas": ready,
                },
            })
        }

        #[tokio::test]
        async fn test_watch_ready_after_list_and_update() {
            let list = json!({
                "apiVersion": "apps/v1",
                "kind": "DeploymentList",
                "metadata": { "resourceVersion": "10" },
                "items": [deployment("ts-ui", 1, 1), deployment("ts-order", 2, 1)],
            });
            let update = json!({ "type": "MODIFIED", "object": deployment("ts-order", 2, 2) });
            let (cluster, server) = session(vec![
                Exchange::new(Method::GET, DEPLOYMENTS, 200, list),
                Exchange::new(
                    Method::GET,
                    DEPLOYMENTS,
                    200,
                    serde_json::Value::String(format!("{}\n", update)),
                ),
            ]);

            let outcome = cluster
                .watch_ready(&names(&["ts-ui", "ts-order"]), "ts0", Duration::from_secs(30))
                .await;

            assert_eq!(outcome, ReadinessOutcome::ready());
            assert_eq!(server.await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_watch_ready_list_failure() {
            let (cluster, server) =
                session(vec![Exchange::failure(Method::GET, DEPLOYMENTS, 403)]);

            let outcome = cluster
                .watch_ready(&names(&["ts-ui", "ts-order"]), "ts0", Duration::from_secs(30))
                .await;

            assert!(!outcome.all_ready);
            assert_eq!(
                outcome.pending,
                BTreeSet::from(["ts-order".to_string(), "ts-ui".to_string()])
            );
            server.await.unwrap();
        }
    }
}
