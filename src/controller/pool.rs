//! IPPool controller implementation
//!
//! One pass: fetch the pool, open a mutation session, gate on pause and
//! ownership, run the normal or delete path through the pool manager, and
//! flush the session. The flush runs on every exit path once the pool was
//! fetched, and a failed flush replaces the outcome of the pass.

use std::sync::Arc;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::gate::{evaluate_gate, DeferReason, Gate};
use super::patch::PatchSession;
use super::requeue::{classify, Classified, Outcome, REQUEUE_AFTER};
use super::store::{KubePoolStore, PoolStore};
use crate::crd::IPPool;
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::manager::{ClaimBookkeeper, PoolManager};
use crate::retry::RetryConfig;
use crate::Error;

/// Name the controller reports as in events and logs
pub const CONTROLLER_NAME: &str = "ippool-controller";

/// Controller context shared by every reconciliation
///
/// ```ignore
/// let ctx = Context::from_client(client)
///     .with_watch_filter(args.watch_filter)
///     .with_cancellation(shutdown.clone());
/// ```
pub struct Context {
    /// Object store access (trait object for testability)
    pub store: Arc<dyn PoolStore>,
    /// Pool manager driven by the reconciler
    pub manager: Arc<dyn PoolManager>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Watch-filter value; pools labelled for another value are skipped
    pub watch_filter: Option<String>,
    /// Cancelled on shutdown; in-flight passes stop and requeue
    pub cancel: CancellationToken,
    backoff: RetryConfig,
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a context from explicit collaborators
    pub fn new(
        store: Arc<dyn PoolStore>,
        manager: Arc<dyn PoolManager>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            manager,
            events,
            watch_filter: None,
            cancel: CancellationToken::new(),
            backoff: RetryConfig::reconcile_errors(),
            failures: DashMap::new(),
        }
    }

    /// Create a production context backed by the given Kubernetes client
    pub fn from_client(client: Client) -> Self {
        Self::new(
            Arc::new(KubePoolStore::new(client.clone())),
            Arc::new(ClaimBookkeeper::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
        )
    }

    /// Only reconcile pools carrying this watch-filter label value
    pub fn with_watch_filter(mut self, watch_filter: Option<String>) -> Self {
        self.watch_filter = watch_filter.filter(|v| !v.is_empty());
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the error backoff
    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn record_failure(&self, key: &str) -> u32 {
        let mut attempts = self.failures.entry(key.to_string()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        *attempts
    }

    fn clear_failures(&self, key: &str) {
        self.failures.remove(key);
    }
}

fn pool_key(pool: &IPPool) -> String {
    match pool.namespace() {
        Some(ns) => format!("{ns}/{}", pool.name_any()),
        None => pool.name_any(),
    }
}

/// Reconcile an IPPool
///
/// The watched object only identifies the pool; the pass works on a fresh
/// read from the store.
#[instrument(skip(pool, ctx), fields(pool = %pool_key(&pool)))]
pub async fn reconcile(pool: Arc<IPPool>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = pool_key(&pool);
    let result = reconcile_pool(&pool.name_any(), pool.namespace(), &ctx).await;

    match &result {
        Ok(action) => {
            debug!(?action, "reconcile finished");
            ctx.clear_failures(&key);
        }
        Err(e) => {
            ctx.events
                .publish(
                    &pool.object_ref(&()),
                    EventType::Warning,
                    reasons::RECONCILE_FAILED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
        }
    }
    result
}

/// Error policy for the controller
///
/// Consecutive failures of the same pool back off exponentially; errors that
/// cannot succeed without a change to the pool wait the maximum delay.
pub fn error_policy(pool: Arc<IPPool>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = pool_key(&pool);
    let attempt = ctx.record_failure(&key);
    let delay = if error.is_retryable() {
        ctx.backoff.delay_for_attempt(attempt)
    } else {
        ctx.backoff.max_delay
    };

    error!(
        ?error,
        pool = %key,
        attempt,
        retry_after_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}

async fn reconcile_pool(
    name: &str,
    namespace: Option<String>,
    ctx: &Context,
) -> Result<Action, Error> {
    if ctx.cancel.is_cancelled() {
        debug!("shutting down, requeueing");
        return Ok(Action::requeue(REQUEUE_AFTER));
    }

    let Some(fetched) = ctx.store.get_pool(name, namespace).await? else {
        debug!("IPPool not found");
        return Ok(Action::await_change());
    };

    let mut session = PatchSession::new(fetched)?;
    let result = run_pass(session.object_mut(), ctx).await;

    match flush(&session, ctx).await {
        Ok(()) => result,
        Err(e) => {
            warn!(error = %e, "failed to patch IPPool");
            Err(e)
        }
    }
}

async fn flush(session: &PatchSession<IPPool>, ctx: &Context) -> Result<(), Error> {
    let patch = session.diff()?;
    if patch.is_empty() {
        return Ok(());
    }
    ctx.store.patch_pool(&patch).await
}

async fn run_pass(pool: &mut IPPool, ctx: &Context) -> Result<Action, Error> {
    let cluster = match evaluate_gate(pool, ctx.store.as_ref(), ctx.watch_filter.as_deref()).await? {
        Gate::Proceed { cluster } => cluster,
        Gate::Skip => return Ok(Action::await_change()),
        Gate::Defer { after, reason } => {
            let reason = match reason {
                DeferReason::Paused => reasons::PAUSED,
                DeferReason::OwnerNotFound => reasons::OWNER_NOT_FOUND,
            };
            ctx.events
                .publish(
                    &pool.object_ref(&()),
                    EventType::Normal,
                    reason,
                    actions::RECONCILE,
                    None,
                )
                .await;
            return Ok(Action::requeue(after));
        }
    };

    if let Some(cluster) = &cluster {
        ctx.manager.set_cluster_owner_ref(pool, cluster)?;
    }

    if pool.is_deleting() {
        reconcile_delete(pool, ctx).await
    } else {
        reconcile_normal(pool, ctx).await
    }
}

async fn reconcile_normal(pool: &mut IPPool, ctx: &Context) -> Result<Action, Error> {
    ctx.manager.set_finalizer(pool);

    let Some(outcome) = update_addresses(pool, ctx).await else {
        return Ok(Action::requeue(REQUEUE_AFTER));
    };
    Ok(classify(outcome, "failed to create the missing data")?.into_action())
}

async fn reconcile_delete(pool: &mut IPPool, ctx: &Context) -> Result<Action, Error> {
    let Some(outcome) = update_addresses(pool, ctx).await else {
        return Ok(Action::requeue(REQUEUE_AFTER));
    };

    match classify(outcome, "failed to delete the old addresses")? {
        Classified::Retry(after) => Ok(Action::requeue(after)),
        Classified::Proceed(0) => {
            ctx.manager.unset_finalizer(pool);
            info!("all addresses released, finalizer removed");
            ctx.events
                .publish(
                    &pool.object_ref(&()),
                    EventType::Normal,
                    reasons::FINALIZER_REMOVED,
                    actions::DELETE,
                    None,
                )
                .await;
            Ok(Action::await_change())
        }
        Classified::Proceed(remaining) => {
            debug!(remaining, "addresses still allocated, keeping finalizer");
            Ok(Action::await_change())
        }
    }
}

/// Run the manager's address reconciliation unless shutdown wins the race
async fn update_addresses(pool: &mut IPPool, ctx: &Context) -> Option<Outcome<usize>> {
    if ctx.cancel.is_cancelled() {
        debug!("shutting down before address update, requeueing");
        return None;
    }
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            debug!("shutting down during address update, requeueing");
            None
        }
        outcome = ctx.manager.update_addresses(pool) => Some(outcome),
    }
}
