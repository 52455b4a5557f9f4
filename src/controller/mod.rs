//! Reconcilers for BucketClaim and BucketAccessRequest
//!
//! Each request kind has a [`Listener`] with Add/Update/Delete entry points.
//! `reconcile_*` adapt those listeners to `kube::runtime::Controller`, which
//! delivers the current object only: an object carrying a deletion timestamp
//! is routed to `update`, anything else to `add`.
//!
//! Listeners return `Ok(())` for terminal failures after recording a Warning
//! event, so the controller only ever requeues errors that retrying can fix.

mod access;
mod class;
mod claim;
mod status;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, warn};

use crate::config::RequeueConfig;
use crate::crd::{BucketAccessRequest, BucketClaim};
use crate::error::{Error, ErrorKind};
use crate::events::{reasons, EventPublisher, KubeEventPublisher};
use crate::retry::{RetryConfig, Sleeper, TokioSleeper};
use crate::store::{IdentityStore, KubeStore, ObjectStore, PolicyStore};
use crate::DEFAULT_CONTROLLER_NAME;

pub use access::BucketAccessRequestListener;
pub use claim::BucketClaimListener;
pub use class::{resolve_bucket_access_class, resolve_bucket_class};
pub use status::{commit, StoredRequest, Subresource};

/// Controller context shared by every reconcile
///
/// All collaborators are injected at construction; there is no way to build
/// a context with a missing store or recorder.
///
/// ```text
/// let ctx = Context::builder(client)
///     .controller_name("cosi-controller")
///     .retry(config.retry_config())
///     .build();
/// ```
pub struct Context {
    /// Object store for requests, classes and provisioned objects
    pub store: Arc<dyn ObjectStore>,
    /// ServiceAccount lookups
    pub identities: Arc<dyn IdentityStore>,
    /// ConfigMap lookups
    pub policies: Arc<dyn PolicyStore>,
    /// Kubernetes Event recorder
    pub events: Arc<dyn EventPublisher>,
    /// Delay source for the optimistic retry loop
    pub sleeper: Arc<dyn Sleeper>,
    /// Retry budget for optimistic writes
    pub retry: RetryConfig,
    /// Requeue intervals for the error policy
    pub requeue: RequeueConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom collaborators
    ///
    /// Retries run without jitter and without real delays.
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore>,
        identities: Arc<dyn IdentityStore>,
        policies: Arc<dyn PolicyStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            identities,
            policies,
            events,
            sleeper: Arc::new(crate::retry::RecordingSleeper::default()),
            retry: RetryConfig::default().without_jitter(),
            requeue: RequeueConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// Every collaborator defaults to the kube-backed implementation built from
/// the client; overrides exist for alternative backends.
pub struct ContextBuilder {
    client: Client,
    controller_name: String,
    store: Option<Arc<dyn ObjectStore>>,
    identities: Option<Arc<dyn IdentityStore>>,
    policies: Option<Arc<dyn PolicyStore>>,
    events: Option<Arc<dyn EventPublisher>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    retry: RetryConfig,
    requeue: RequeueConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            store: None,
            identities: None,
            policies: None,
            events: None,
            sleeper: None,
            retry: RetryConfig::default(),
            requeue: RequeueConfig::default(),
        }
    }

    /// Name reported as the source of Kubernetes Events
    pub fn controller_name(mut self, name: impl Into<String>) -> Self {
        self.controller_name = name.into();
        self
    }

    /// Override the object store
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the identity store
    pub fn identities(mut self, identities: Arc<dyn IdentityStore>) -> Self {
        self.identities = Some(identities);
        self
    }

    /// Override the policy store
    pub fn policies(mut self, policies: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the retry delay source
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Retry budget for optimistic writes
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Requeue intervals for the error policy
    pub fn requeue(mut self, requeue: RequeueConfig) -> Self {
        self.requeue = requeue;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let kube = Arc::new(KubeStore::new(self.client.clone()));
        Context {
            store: self.store.unwrap_or_else(|| kube.clone()),
            identities: self.identities.unwrap_or_else(|| kube.clone()),
            policies: self.policies.unwrap_or_else(|| kube.clone()),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(
                    self.client.clone(),
                    &self.controller_name,
                ))
            }),
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            retry: self.retry,
            requeue: self.requeue,
        }
    }
}

/// Add/Update/Delete notifications for one request kind
///
/// `Ok(())` means the notification is fully handled and must not be
/// requeued; `Err` asks the dispatcher to retry with backoff.
#[async_trait]
pub trait Listener<K>: Send + Sync {
    /// A request was created, or must be re-driven toward its desired state
    async fn add(&self, obj: &K) -> Result<(), Error>;

    /// A request changed; a deletion timestamp on `new` starts cleanup
    async fn update(&self, old: &K, new: &K) -> Result<(), Error>;

    /// A request left the store
    async fn delete(&self, obj: &K) -> Result<(), Error>;
}

/// Where a request is in its provisioning lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// No finalizer and no linkage yet
    Unprovisioned,
    /// Finalizer attached, linkage not committed
    Provisioning,
    /// Linkage committed
    Provisioned,
    /// Marked for deletion with the finalizer still present
    Deleting,
    /// Marked for deletion and cleanup finished
    Deleted,
}

impl LifecycleState {
    /// Derive the state from what is stored on the request
    pub fn of<R: StoredRequest>(request: &R) -> Self {
        let protected = crate::finalizer::has_finalizer(request.meta(), R::FINALIZER);
        if request.meta().deletion_timestamp.is_some() {
            return if protected {
                LifecycleState::Deleting
            } else {
                LifecycleState::Deleted
            };
        }
        match (request.bound_name().is_some(), protected) {
            (true, _) => LifecycleState::Provisioned,
            (false, true) => LifecycleState::Provisioning,
            (false, false) => LifecycleState::Unprovisioned,
        }
    }
}

/// Map a listener result onto the dispatcher contract
///
/// Terminal errors are recorded as a Warning event and swallowed. Retryable
/// errors are returned; a dependency that is not ready yet also gets a Normal
/// event so the wait is visible on the request.
async fn settle(
    ctx: &Context,
    object: &ObjectReference,
    action: &str,
    failure_reason: &str,
    result: Result<(), Error>,
) -> Result<(), Error> {
    let err = match result {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    match err.kind() {
        ErrorKind::Terminal => {
            warn!(error = %err, reason = failure_reason, "Request cannot be reconciled; not requeueing");
            ctx.events
                .publish(
                    object,
                    EventType::Warning,
                    failure_reason,
                    action,
                    Some(err.to_string()),
                )
                .await;
            Ok(())
        }
        ErrorKind::Retryable => {
            if matches!(err, Error::NotReadyYet { .. }) {
                ctx.events
                    .publish(
                        object,
                        EventType::Normal,
                        reasons::WAITING_FOR_BUCKET,
                        action,
                        Some(err.to_string()),
                    )
                    .await;
            }
            Err(err)
        }
    }
}

/// Route the current state of an object to the listener
async fn drive<K, L>(listener: &L, obj: &K) -> Result<Action, Error>
where
    K: Resource + Sync,
    L: Listener<K>,
{
    if obj.meta().deletion_timestamp.is_some() {
        listener.update(obj, obj).await?;
    } else {
        listener.add(obj).await?;
    }
    Ok(Action::await_change())
}

/// Reconcile a BucketClaim
pub async fn reconcile_bucket_claim(
    claim: Arc<BucketClaim>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    debug!(claim = %claim.name_any(), namespace = ?claim.namespace(), "reconciling bucket claim");
    drive(&BucketClaimListener::new(ctx), claim.as_ref()).await
}

/// Reconcile a BucketAccessRequest
pub async fn reconcile_bucket_access_request(
    request: Arc<BucketAccessRequest>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    debug!(request = %request.name_any(), namespace = ?request.namespace(), "reconciling bucket access request");
    drive(&BucketAccessRequestListener::new(ctx), request.as_ref()).await
}

/// Requeue policy for failed reconciles
pub fn error_policy<K: Resource>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = match error {
        Error::NotReadyYet { .. } => ctx.requeue.not_ready,
        _ => ctx.requeue.error,
    };
    error!(
        %error,
        object = %obj.name_any(),
        namespace = ?obj.namespace(),
        requeue_secs = delay.as_secs(),
        "reconciliation failed"
    );
    Action::requeue(delay)
}
