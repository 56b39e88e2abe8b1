//! helmfleet Kube - helm releases and cluster sessions
//!
//! This crate provides:
//! - **Release Manager**: `helm` install/upgrade/uninstall/status with fixed-delay retries
//! - **Sessions**: one lazily built API client per environment, rebuilt on context change
//! - **Readiness**: deadline-bounded Deployment watches, one task per namespace
//! - **Resources**: namespaces, custom resources, finalizers, and Jobs
//! - **Deployer**: multi-replica rollout and teardown with per-replica tallies

pub mod deploy;
pub mod error;
pub mod helm;
pub mod mock;
pub mod readiness;
pub mod resources;
pub mod session;

pub use deploy::{
    BatchReport, BatchSummary, DeployOptions, Deployer, InstallAction, ReplicaReport,
    ReplicaStatus, descriptor_for, plan_action,
};
pub use error::{ApiErrorKind, KubeError, Result};
pub use helm::{
    CommandOutput, CommandRunner, InstallPolicy, ReleaseDescriptor, ReleaseManager, SystemRunner,
};
pub use mock::{MockCluster, MockRunner, OperationCounts};
pub use readiness::{
    BatchReadiness, ReadinessOutcome, ReadinessRequest, ReplicaSnapshot, join_readiness,
    track_readiness,
};
pub use resources::{ClusterOps, CustomResourceKind};
pub use session::{
    ClientFactory, ClusterSession, KubeconfigFactory, SessionHandle, SessionRegistry, SessionState,
};
