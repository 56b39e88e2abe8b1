//! Per-environment cluster sessions
//!
//! A [`SessionRegistry`] owns at most one [`ClusterSession`] per environment
//! id. Sessions are built lazily on first acquire, reused while the context
//! they were built against still matches the environment, and rebuilt when
//! it does not. Rebuilding a given environment's session is serialized;
//! callers holding an older session keep a valid handle to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use helmfleet_core::Environment;

use crate::error::{KubeError, Result};

/// Builds API clients for an environment
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, env: &Environment) -> Result<Client>;
}

/// Builds clients from kubeconfig, selecting the environment's context
///
/// The context is chosen per client; the kubeconfig's `current-context` is
/// never modified.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeconfigFactory;

#[async_trait]
impl ClientFactory for KubeconfigFactory {
    async fn connect(&self, env: &Environment) -> Result<Client> {
        let options = KubeConfigOptions {
            context: Some(env.context.clone()),
            ..Default::default()
        };
        let to_error = |e: kube::config::KubeconfigError| KubeError::Kubeconfig {
            context: env.context.clone(),
            message: e.to_string(),
        };

        let config = match &env.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(to_error)?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(to_error)?
            }
            None => kube::Config::from_kubeconfig(&options)
                .await
                .map_err(to_error)?,
        };

        Ok(Client::try_from(config)?)
    }
}

/// API handles for one environment, bound to the context they were built with
pub struct ClusterSession {
    env_id: String,
    context: String,
    client: Client,
    created_at: DateTime<Utc>,
}

impl ClusterSession {
    pub fn new(env_id: impl Into<String>, context: impl Into<String>, client: Client) -> Self {
        Self {
            env_id: env_id.into(),
            context: context.into(),
            client,
            created_at: Utc::now(),
        }
    }

    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    /// kubeconfig context this session was built against
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Debug for ClusterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSession")
            .field("env_id", &self.env_id)
            .field("context", &self.context)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of an environment's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
}

struct Slot {
    state: Mutex<SessionState>,
    /// Held across connect so that rebuilds for one environment never overlap
    session: tokio::sync::Mutex<Option<Arc<ClusterSession>>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Uninitialized),
            session: tokio::sync::Mutex::new(None),
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Environment id → session, shared by every consumer of the cluster
pub struct SessionRegistry<F: ClientFactory = KubeconfigFactory> {
    factory: F,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    leases: Arc<AtomicUsize>,
}

impl SessionRegistry<KubeconfigFactory> {
    pub fn new() -> Self {
        Self::with_factory(KubeconfigFactory)
    }
}

impl Default for SessionRegistry<KubeconfigFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ClientFactory> SessionRegistry<F> {
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
            leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn slot(&self, env_id: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(env_id.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Get a session for `env`, building or rebuilding it when needed
    ///
    /// The returned handle must be held for as long as the session is in
    /// use; dropping it releases the lease.
    pub async fn acquire(&self, env: &Environment) -> Result<SessionHandle> {
        let slot = self.slot(&env.id);
        let mut current = slot.session.lock().await;

        if let Some(session) = current.as_ref()
            && session.context == env.context
        {
            return Ok(self.lease(session.clone()));
        }

        match current.as_ref() {
            Some(old) => tracing::info!(
                env = %env.id,
                from = %old.context,
                to = %env.context,
                "switching cluster context"
            ),
            None => tracing::info!(env = %env.id, context = %env.context, "connecting to cluster"),
        }

        slot.set_state(SessionState::Initializing);
        match self.factory.connect(env).await {
            Ok(client) => {
                let session = Arc::new(ClusterSession::new(&env.id, &env.context, client));
                *current = Some(session.clone());
                slot.set_state(SessionState::Ready);
                Ok(self.lease(session))
            }
            Err(e) => {
                *current = None;
                slot.set_state(SessionState::Uninitialized);
                tracing::warn!(env = %env.id, error = %e, "cluster session failed to initialize");
                Err(e)
            }
        }
    }

    fn lease(&self, session: Arc<ClusterSession>) -> SessionHandle {
        self.leases.fetch_add(1, Ordering::SeqCst);
        SessionHandle {
            session,
            leases: self.leases.clone(),
        }
    }

    /// Current lifecycle state for an environment id
    pub fn state(&self, env_id: &str) -> SessionState {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(env_id)
            .map(|slot| slot.state())
            .unwrap_or(SessionState::Uninitialized)
    }

    /// Forget every session; outstanding handles stay usable
    pub fn clear(&self) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of handles currently held
    pub fn active_leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }
}

/// Leased access to a session; the lease ends when the handle is dropped
pub struct SessionHandle {
    session: Arc<ClusterSession>,
    leases: Arc<AtomicUsize>,
}

impl SessionHandle {
    /// Shared ownership of the session, for spawning tasks that outlive a borrow
    pub fn session(&self) -> Arc<ClusterSession> {
        self.session.clone()
    }

    /// End the lease explicitly
    pub fn release(self) {}
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("env_id", &self.session.env_id)
            .field("context", &self.session.context)
            .finish_non_exhaustive()
    }
}

impl Deref for SessionHandle {
    type Target = ClusterSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Connects without touching a real cluster and counts attempts
    #[derive(Default)]
    struct CountingFactory {
        connects: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn connect(&self, env: &Environment) -> Result<Client> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                return Err(KubeError::Kubeconfig {
                    context: env.context.clone(),
                    message: "context not found".to_string(),
                });
            }
            let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
            Ok(Client::try_from(config)?)
        }
    }

    fn connects(registry: &SessionRegistry<CountingFactory>) -> usize {
        registry.factory().connects.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_session_reused_while_context_matches() {
        let registry = SessionRegistry::with_factory(CountingFactory::default());
        let env = Environment::new("staging", "kind-staging");

        assert_eq!(registry.state("staging"), SessionState::Uninitialized);

        let first = registry.acquire(&env).await.unwrap();
        let second = registry.acquire(&env).await.unwrap();

        assert_eq!(connects(&registry), 1);
        assert!(Arc::ptr_eq(&first.session(), &second.session()));
        assert_eq!(first.context(), "kind-staging");
        assert_eq!(registry.state("staging"), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_context_switch_rebuilds() {
        let registry = SessionRegistry::with_factory(CountingFactory::default());
        let old = registry
            .acquire(&Environment::new("staging", "ctx-a"))
            .await
            .unwrap();
        let new = registry
            .acquire(&Environment::new("staging", "ctx-b"))
            .await
            .unwrap();

        assert_eq!(connects(&registry), 2);
        assert_eq!(new.context(), "ctx-b");
        // The old handle is still bound to what it was built with
        assert_eq!(old.context(), "ctx-a");
    }

    #[tokio::test]
    async fn test_concurrent_acquire_connects_once() {
        let registry = SessionRegistry::with_factory(CountingFactory::default());
        let env = Environment::new("prod", "prod-admin");

        let (a, b) = tokio::join!(registry.acquire(&env), registry.acquire(&env));

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connects(&registry), 1);
    }

    #[tokio::test]
    async fn test_separate_environments_get_separate_sessions() {
        let registry = SessionRegistry::with_factory(CountingFactory::default());
        let a = registry.acquire(&Environment::new("a", "ctx")).await.unwrap();
        let b = registry.acquire(&Environment::new("b", "ctx")).await.unwrap();

        assert_eq!(connects(&registry), 2);
        assert_eq!(a.env_id(), "a");
        assert_eq!(b.env_id(), "b");
    }

    #[tokio::test]
    async fn test_failed_connect_resets_state() {
        let registry = SessionRegistry::with_factory(CountingFactory {
            fail: true,
            ..Default::default()
        });
        let env = Environment::new("broken", "missing");

        let err = registry.acquire(&env).await.unwrap_err();
        assert!(matches!(err, KubeError::Kubeconfig { .. }));
        assert_eq!(registry.state("broken"), SessionState::Uninitialized);

        // Nothing cached, so the next acquire tries again
        assert!(registry.acquire(&env).await.is_err());
        assert_eq!(connects(&registry), 2);
        assert_eq!(registry.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_leases_released_on_drop() {
        let registry = SessionRegistry::with_factory(CountingFactory::default());
        let env = Environment::new("staging", "kind-staging");

        let a = registry.acquire(&env).await.unwrap();
        let b = registry.acquire(&env).await.unwrap();
        assert_eq!(registry.active_leases(), 2);

        drop(a);
        assert_eq!(registry.active_leases(), 1);
        b.release();
        assert_eq!(registry.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_clear_forgets_sessions() {
        let registry = SessionRegistry::with_factory(CountingFactory::default());
        let env = Environment::new("staging", "kind-staging");

        let held = registry.acquire(&env).await.unwrap();
        registry.clear();
        assert_eq!(registry.state("staging"), SessionState::Uninitialized);

        registry.acquire(&env).await.unwrap();
        assert_eq!(connects(&registry), 2);
        assert_eq!(held.context(), "kind-staging");
    }
}
