//! BucketClaim listener
//!
//! A claim either adopts the Bucket it names in `existingBucketName` or gets a
//! new Bucket named `{prefix}-{uid}`. The target is checked before anything is
//! written, so a claim that can never be satisfied is left untouched. Then the
//! claim is protected with a finalizer, the Bucket is written, and finally the
//! claim is linked to it through `status.bucketName`. Every step can be
//! replayed: creating an existing Bucket, adding a present finalizer and
//! committing an unchanged status are all no-ops.
//!
//! On deletion the Bucket is deleted unless its frozen policy is `Retain`, and
//! the finalizer is released either way.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::class::resolve_bucket_class;
use super::status::{commit, StoredRequest, Subresource};
use super::{settle, Context, LifecycleState, Listener};
use crate::crd::{
    Bucket, BucketClaim, BucketClaimStatus, BucketClass, BucketSpec, DeletionPolicy,
    RequestReference,
};
use crate::error::Error;
use crate::events::{actions, reasons};
use crate::finalizer::{add_finalizer, remove_finalizer};
use crate::naming::bucket_name;
use crate::retry::retry_with_backoff;
use crate::store::ObjectStore;

/// How a claim ended up linked to its Bucket
#[derive(Debug, PartialEq, Eq)]
enum Provisioned {
    /// Linkage was already committed; nothing was done
    AlreadyProvisioned,
    /// A Bucket was created (or found from an earlier attempt)
    Created(String),
    /// A pre-existing Bucket was bound
    Adopted(String),
}

/// Handles BucketClaim notifications
pub struct BucketClaimListener {
    ctx: Arc<Context>,
}

impl BucketClaimListener {
    /// Create a listener over the given context
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(claim = %claim.name_any(), namespace = ?claim.namespace()))]
    async fn provision(&self, claim: &BucketClaim) -> Result<Provisioned, Error> {
        if let Some(bucket) = claim.bound_bucket() {
            debug!(bucket, "claim already provisioned");
            return Ok(Provisioned::AlreadyProvisioned);
        }
        let uid = claim_uid(claim)?;
        let class = resolve_bucket_class(self.ctx.store.as_ref(), &claim.spec.bucket_class_name)
            .await?;

        self.check_target(claim, uid).await?;

        // The finalizer must land before the Bucket exists; anything written
        // after it is released on deletion.
        commit(&self.ctx, claim, Subresource::Metadata, |c: &mut BucketClaim| {
            add_finalizer(&mut c.metadata, BucketClaim::FINALIZER)
        })
        .await?;

        let (bucket, created) = match claim.spec.existing_bucket() {
            Some(existing) => {
                self.adopt(claim, uid, existing).await?;
                (existing.to_string(), false)
            }
            None => (self.create(claim, uid, &class).await?, true),
        };

        let latest = commit(&self.ctx, claim, Subresource::Status, |c: &mut BucketClaim| {
            link_bucket(c, &bucket)
        })
        .await?;

        if let Some(linked) = latest.bound_bucket().filter(|linked| *linked != bucket) {
            let linked = linked.to_string();
            self.discard(uid, &bucket, created).await?;
            return Err(Error::AlreadyLinked {
                kind: "BucketClaim",
                name: format!("{}/{}", claim.namespace().unwrap_or_default(), claim.name_any()),
                linked,
            });
        }

        info!(bucket = %bucket, "claim bound to bucket");
        Ok(if created {
            Provisioned::Created(bucket)
        } else {
            Provisioned::Adopted(bucket)
        })
    }

    /// Fail early when the Bucket this claim targets can never be its own
    async fn check_target(&self, claim: &BucketClaim, uid: &str) -> Result<(), Error> {
        let store = self.ctx.store.as_ref();
        if let Some(existing) = claim.spec.existing_bucket() {
            let bucket = adoption_target(store, existing).await?;
            return check_adoptable(&bucket, uid);
        }

        let name = bucket_name(claim.spec.naming_prefix(), uid);
        match store.get_bucket(&name).await {
            Ok(bucket) if !bucket.is_bound_to(uid) => Err(Error::NameCollision { kind: "Bucket", name }),
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Undo the Bucket write of a claim that turned out to be linked elsewhere
    async fn discard(&self, uid: &str, bucket: &str, created: bool) -> Result<(), Error> {
        if !created {
            return self.unbind(bucket, uid).await;
        }
        match self.ctx.store.delete_bucket(bucket).await {
            Ok(()) => {
                info!(bucket, "deleted bucket of a claim linked elsewhere");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the claim's Bucket, accepting one left by an earlier attempt
    async fn create(&self, claim: &BucketClaim, uid: &str, class: &BucketClass) -> Result<String, Error> {
        let name = bucket_name(claim.spec.naming_prefix(), uid);
        let bucket = build_bucket(&name, claim, class);

        match self.ctx.store.create_bucket(&bucket).await {
            Ok(_) => {
                info!(bucket = %name, class = %class.name_any(), "created bucket");
                Ok(name)
            }
            Err(e) if e.is_already_exists() => {
                let existing = self.ctx.store.get_bucket(&name).await?;
                if !existing.is_bound_to(uid) {
                    return Err(Error::NameCollision { kind: "Bucket", name });
                }
                debug!(bucket = %name, "bucket already exists from an earlier attempt");
                Ok(name)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bind a pre-existing Bucket to the claim
    async fn adopt(&self, claim: &BucketClaim, uid: &str, existing: &str) -> Result<(), Error> {
        let store = self.ctx.store.as_ref();
        let back_ref = RequestReference::to(claim);
        let back_ref = &back_ref;
        let operation = format!("adopt bucket {}", existing);

        retry_with_backoff(
            &self.ctx.retry,
            self.ctx.sleeper.as_ref(),
            &operation,
            |e: &Error| matches!(e, Error::Store(s) if s.is_conflict()),
            || async move {
                let mut bucket = adoption_target(store, existing).await?;
                check_adoptable(&bucket, uid)?;

                if !apply_claim_overrides(&mut bucket, claim, back_ref) {
                    debug!(bucket = existing, "bucket already bound to this claim");
                    return Ok(());
                }
                store.update_bucket(&bucket).await?;
                info!(bucket = existing, "adopted existing bucket");
                Ok(())
            },
        )
        .await
    }

    #[instrument(skip_all, fields(claim = %claim.name_any(), namespace = ?claim.namespace()))]
    async fn release(&self, claim: &BucketClaim) -> Result<(), Error> {
        match LifecycleState::of(claim) {
            LifecycleState::Deleting => {}
            state => {
                debug!(?state, "no finalizer to release");
                return Ok(());
            }
        }

        if let Some(name) = candidate_bucket(claim) {
            self.release_bucket(claim, &name).await?;
        }

        match commit(&self.ctx, claim, Subresource::Metadata, |c: &mut BucketClaim| {
            remove_finalizer(&mut c.metadata, BucketClaim::FINALIZER)
        })
        .await
        {
            Ok(_) => {}
            Err(Error::Store(e)) if e.is_not_found() => debug!("claim already removed"),
            Err(e) => return Err(e),
        }
        info!("released claim finalizer");
        Ok(())
    }

    /// Delete or retain the Bucket bound to a deleting claim
    async fn release_bucket(&self, claim: &BucketClaim, name: &str) -> Result<(), Error> {
        let uid = claim.uid().unwrap_or_default();
        let bucket = match self.ctx.store.get_bucket(name).await {
            Ok(bucket) => bucket,
            Err(e) if e.is_not_found() => {
                debug!(bucket = name, "bucket already deleted");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !bucket.is_bound_to(&uid) {
            warn!(bucket = name, "bucket is not bound to this claim; leaving it in place");
            return Ok(());
        }

        let obj_ref = claim.object_ref(&());
        if bucket.spec.deletion_policy == DeletionPolicy::Retain {
            self.unbind(name, &uid).await?;
            info!(bucket = name, "retaining bucket per deletion policy");
            self.ctx
                .events
                .publish(
                    &obj_ref,
                    EventType::Normal,
                    reasons::BUCKET_RETAINED,
                    actions::DELETE,
                    Some(format!("Bucket {} retained by its deletion policy", name)),
                )
                .await;
            return Ok(());
        }

        match self.ctx.store.delete_bucket(name).await {
            Ok(()) => info!(bucket = name, "deleted bucket"),
            Err(e) if e.is_not_found() => debug!(bucket = name, "bucket already deleted"),
            Err(e) => return Err(e.into()),
        }
        self.ctx
            .events
            .publish(
                &obj_ref,
                EventType::Normal,
                reasons::BUCKET_DELETED,
                actions::DELETE,
                Some(format!("Deleted bucket {}", name)),
            )
            .await;
        Ok(())
    }

    /// Clear a retained Bucket's back-reference so another claim can adopt it
    async fn unbind(&self, name: &str, uid: &str) -> Result<(), Error> {
        let store = self.ctx.store.as_ref();
        let operation = format!("unbind bucket {}", name);
        retry_with_backoff(
            &self.ctx.retry,
            self.ctx.sleeper.as_ref(),
            &operation,
            |e: &Error| matches!(e, Error::Store(s) if s.is_conflict()),
            || async move {
                let mut bucket = match store.get_bucket(name).await {
                    Ok(bucket) => bucket,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                if !bucket.is_bound_to(uid) {
                    return Ok(());
                }
                bucket.spec.bucket_claim = None;
                store.update_bucket(&bucket).await?;
                Ok(())
            },
        )
        .await
    }
}

#[async_trait]
impl Listener<BucketClaim> for BucketClaimListener {
    async fn add(&self, claim: &BucketClaim) -> Result<(), Error> {
        match LifecycleState::of(claim) {
            LifecycleState::Deleting | LifecycleState::Deleted => return Ok(()),
            LifecycleState::Provisioned => return Ok(()),
            LifecycleState::Unprovisioned | LifecycleState::Provisioning => {}
        }

        let obj_ref = claim.object_ref(&());
        let result = self.provision(claim).await;
        if let Ok(outcome) = &result {
            let event = match outcome {
                Provisioned::Created(bucket) => Some((reasons::BUCKET_PROVISIONED, bucket)),
                Provisioned::Adopted(bucket) => Some((reasons::BUCKET_ADOPTED, bucket)),
                Provisioned::AlreadyProvisioned => None,
            };
            if let Some((reason, bucket)) = event {
                self.ctx
                    .events
                    .publish(
                        &obj_ref,
                        EventType::Normal,
                        reason,
                        actions::PROVISION,
                        Some(format!("Bound to bucket {}", bucket)),
                    )
                    .await;
            }
        }

        settle(
            &self.ctx,
            &obj_ref,
            actions::PROVISION,
            reasons::FAILED_CREATE_BUCKET,
            result.map(|_| ()),
        )
        .await
    }

    async fn update(&self, _old: &BucketClaim, new: &BucketClaim) -> Result<(), Error> {
        if new.meta().deletion_timestamp.is_none() {
            return self.add(new).await;
        }
        let obj_ref = new.object_ref(&());
        let result = self.release(new).await;
        settle(
            &self.ctx,
            &obj_ref,
            actions::DELETE,
            reasons::FAILED_DELETE_BUCKET,
            result,
        )
        .await
    }

    async fn delete(&self, claim: &BucketClaim) -> Result<(), Error> {
        debug!(claim = %claim.name_any(), namespace = ?claim.namespace(), "claim removed from store");
        Ok(())
    }
}

fn claim_uid(claim: &BucketClaim) -> Result<&str, Error> {
    claim
        .meta()
        .uid
        .as_deref()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| Error::invalid_reference("BucketClaim has no uid"))
}

/// Fetch the Bucket a claim asks to adopt
async fn adoption_target(store: &dyn ObjectStore, existing: &str) -> Result<Bucket, Error> {
    match store.get_bucket(existing).await {
        Ok(bucket) => Ok(bucket),
        Err(e) if e.is_not_found() => Err(Error::BucketNotFound {
            bucket: existing.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// A Bucket held by a different claim cannot be adopted
fn check_adoptable(bucket: &Bucket, uid: &str) -> Result<(), Error> {
    match bucket.spec.bucket_claim.as_ref() {
        Some(holder) if !holder.uid.is_empty() && !holder.refers_to(uid) => Err(Error::BucketBound {
            bucket: bucket.name_any(),
            claim: format!("{}/{}", holder.namespace, holder.name),
        }),
        _ => Ok(()),
    }
}

/// Bucket the deleting claim is (or may be) bound to
///
/// The committed linkage wins. Without it, a claim that crashed between
/// create and status commit still owns the deterministic name.
fn candidate_bucket(claim: &BucketClaim) -> Option<String> {
    if let Some(bound) = claim.bound_bucket() {
        return Some(bound.to_string());
    }
    if let Some(existing) = claim.spec.existing_bucket() {
        return Some(existing.to_string());
    }
    let uid = claim.uid().filter(|uid| !uid.is_empty())?;
    if claim.spec.naming_prefix().is_empty() {
        return None;
    }
    Some(bucket_name(claim.spec.naming_prefix(), &uid))
}

/// New Bucket for `claim`, with every class field copied by value
fn build_bucket(name: &str, claim: &BucketClaim, class: &BucketClass) -> Bucket {
    let mut parameters = class.spec.parameters.clone();
    parameters.extend(claim.spec.parameters.clone());

    let protocols = if claim.spec.protocols.is_empty() {
        class.spec.protocols.clone()
    } else {
        claim.spec.protocols.clone()
    };

    Bucket::new(
        name,
        BucketSpec {
            driver_name: class.spec.driver_name.clone(),
            bucket_class_name: class.name_any(),
            bucket_claim: Some(RequestReference::to(claim)),
            protocols,
            parameters,
            deletion_policy: class.spec.deletion_policy,
            existing_bucket_id: None,
        },
    )
}

/// Point an adopted Bucket at `claim` and layer the claim's overrides on it
///
/// Returns whether anything changed.
fn apply_claim_overrides(bucket: &mut Bucket, claim: &BucketClaim, back_ref: &RequestReference) -> bool {
    let before = bucket.spec.clone();

    bucket.spec.bucket_claim = Some(back_ref.clone());
    if !claim.spec.protocols.is_empty() {
        bucket.spec.protocols = claim.spec.protocols.clone();
    }
    bucket
        .spec
        .parameters
        .extend(claim.spec.parameters.clone());

    bucket.spec != before
}

/// Record the claim's Bucket in its status; returns whether anything changed
fn link_bucket(claim: &mut BucketClaim, bucket: &str) -> bool {
    match claim.bound_bucket() {
        Some(bound) if bound == bucket && claim.is_ready() => return false,
        Some(bound) if bound != bucket => {
            warn!(bound, bucket, "claim already linked to a different bucket; keeping it");
            return false;
        }
        _ => {}
    }
    let status = claim.status.get_or_insert_with(BucketClaimStatus::default);
    status.bucket_name = Some(bucket.to_string());
    status.bucket_ready = true;
    true
}
