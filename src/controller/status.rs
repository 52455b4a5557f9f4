//! Optimistic commits of request metadata and status
//!
//! Both request kinds are written the same way: re-read the latest copy,
//! reapply one mutation, and resubmit with the version just read. A
//! version conflict restarts the loop within the retry budget; exhausting the
//! budget surfaces the last conflict as a retryable error.

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::debug;

use super::Context;
use crate::crd::{BucketAccessRequest, BucketClaim};
use crate::error::Error;
use crate::finalizer::{BUCKET_ACCESS_FINALIZER, BUCKET_CLAIM_FINALIZER};
use crate::retry::retry_with_backoff;
use crate::store::{ObjectStore, StoreError};

/// Which part of a request a commit writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subresource {
    /// Metadata and spec (finalizers live here)
    Metadata,
    /// The status subresource
    Status,
}

/// A namespaced request the projector can read and write
#[async_trait]
pub trait StoredRequest: Resource<DynamicType = ()> + Clone + Send + Sync + 'static {
    /// Kind name used in errors and logs
    const KIND: &'static str;

    /// Protection finalizer for this kind
    const FINALIZER: &'static str;

    /// Name of the object this request is linked to, once committed
    fn bound_name(&self) -> Option<&str>;

    /// Read the latest copy
    async fn fetch(store: &dyn ObjectStore, namespace: &str, name: &str)
        -> Result<Self, StoreError>;

    /// Write metadata and spec
    async fn submit(store: &dyn ObjectStore, obj: &Self) -> Result<Self, StoreError>;

    /// Write status
    async fn submit_status(store: &dyn ObjectStore, obj: &Self) -> Result<Self, StoreError>;
}

#[async_trait]
impl StoredRequest for BucketClaim {
    const KIND: &'static str = "BucketClaim";
    const FINALIZER: &'static str = BUCKET_CLAIM_FINALIZER;

    fn bound_name(&self) -> Option<&str> {
        self.bound_bucket()
    }

    async fn fetch(
        store: &dyn ObjectStore,
        namespace: &str,
        name: &str,
    ) -> Result<Self, StoreError> {
        store.get_bucket_claim(namespace, name).await
    }

    async fn submit(store: &dyn ObjectStore, obj: &Self) -> Result<Self, StoreError> {
        store.update_bucket_claim(obj).await
    }

    async fn submit_status(store: &dyn ObjectStore, obj: &Self) -> Result<Self, StoreError> {
        store.update_bucket_claim_status(obj).await
    }
}

#[async_trait]
impl StoredRequest for BucketAccessRequest {
    const KIND: &'static str = "BucketAccessRequest";
    const FINALIZER: &'static str = BUCKET_ACCESS_FINALIZER;

    fn bound_name(&self) -> Option<&str> {
        self.bound_access()
    }

    async fn fetch(
        store: &dyn ObjectStore,
        namespace: &str,
        name: &str,
    ) -> Result<Self, StoreError> {
        store.get_bucket_access_request(namespace, name).await
    }

    async fn submit(store: &dyn ObjectStore, obj: &Self) -> Result<Self, StoreError> {
        store.update_bucket_access_request(obj).await
    }

    async fn submit_status(store: &dyn ObjectStore, obj: &Self) -> Result<Self, StoreError> {
        store.update_bucket_access_request_status(obj).await
    }
}

/// Apply `mutate` to the stored copy of `request` and write it back
///
/// `mutate` returns whether it changed anything; when it does not, nothing is
/// written and the latest copy is returned as-is. If the stored object has a
/// different UID than `request`, the request this call was made for is gone
/// and the commit fails with `NotFound`.
pub async fn commit<R, F>(
    ctx: &Context,
    request: &R,
    target: Subresource,
    mutate: F,
) -> Result<R, Error>
where
    R: StoredRequest,
    F: Fn(&mut R) -> bool + Send + Sync,
{
    let namespace = request
        .namespace()
        .ok_or_else(|| Error::invalid_reference(format!("{} has no namespace", R::KIND)))?;
    let name = request.name_any();
    let uid = request.uid();
    let operation = format!("commit {:?} of {} {}/{}", target, R::KIND, namespace, name);

    let store = ctx.store.as_ref();
    let mutate = &mutate;
    let (namespace, name, uid) = (namespace.as_str(), name.as_str(), uid.as_deref());

    let latest = retry_with_backoff(
        &ctx.retry,
        ctx.sleeper.as_ref(),
        &operation,
        StoreError::is_conflict,
        || async move {
            let mut latest = R::fetch(store, namespace, name).await?;
            if uid.is_some() && latest.uid().as_deref() != uid {
                return Err(StoreError::NotFound {
                    kind: R::KIND,
                    name: format!("{}/{} with uid {}", namespace, name, uid.unwrap_or_default()),
                });
            }
            if !mutate(&mut latest) {
                debug!(kind = R::KIND, namespace, name, ?target, "commit is a no-op, skipping write");
                return Ok(latest);
            }
            match target {
                Subresource::Metadata => R::submit(store, &latest).await,
                Subresource::Status => R::submit_status(store, &latest).await,
            }
        },
    )
    .await?;

    Ok(latest)
}
