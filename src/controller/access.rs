//! BucketAccessRequest listener
//!
//! Access is only granted against a claim that is already bound and ready;
//! until then the request waits with a retryable `NotReadyYet`. A granted
//! request is first protected with a finalizer, then gets a BucketAccess named
//! `{accessClass}-{uid}` carrying the policy ConfigMap's data as a JSON object,
//! and last a status pointing at the access.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::class::resolve_bucket_access_class;
use super::status::{commit, StoredRequest, Subresource};
use super::{settle, Context, LifecycleState, Listener};
use crate::crd::{
    BucketAccess, BucketAccessClass, BucketAccessRequest, BucketAccessRequestStatus,
    BucketAccessSpec, RequestReference,
};
use crate::error::Error;
use crate::events::{actions, reasons};
use crate::finalizer::{add_finalizer, remove_finalizer};
use crate::naming::bucket_access_name;

/// Handles BucketAccessRequest notifications
pub struct BucketAccessRequestListener {
    ctx: Arc<Context>,
}

impl BucketAccessRequestListener {
    /// Create a listener over the given context
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Drive the request to a granted BucketAccess; returns the access name
    /// when one was newly bound
    #[instrument(skip_all, fields(request = %request.name_any(), namespace = ?request.namespace()))]
    async fn provision(&self, request: &BucketAccessRequest) -> Result<Option<String>, Error> {
        if let Some(access) = request.bound_access() {
            debug!(access, "access already granted");
            return Ok(None);
        }
        let namespace = request
            .namespace()
            .ok_or_else(|| Error::invalid_reference("BucketAccessRequest has no namespace"))?;
        let uid = request
            .uid()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| Error::invalid_reference("BucketAccessRequest has no uid"))?;

        let claim_name = request.spec.bucket_claim_name.as_str();
        if claim_name.is_empty() {
            return Err(Error::invalid_reference("spec.bucketClaimName is empty"));
        }
        // A claim that does not exist yet may still be created; keep retrying.
        let claim = self.ctx.store.get_bucket_claim(&namespace, claim_name).await?;
        let bucket = match (claim.is_ready(), claim.bound_bucket()) {
            (true, Some(bucket)) => bucket.to_string(),
            _ => {
                return Err(Error::NotReadyYet {
                    claim: claim_name.to_string(),
                })
            }
        };

        let class = resolve_bucket_access_class(
            self.ctx.store.as_ref(),
            &request.spec.bucket_access_class_name,
        )
        .await?;

        let service_account = match request
            .spec
            .service_account_name
            .as_deref()
            .filter(|sa| !sa.is_empty())
        {
            Some(sa) => {
                let sa = self.ctx.identities.get_service_account(&namespace, sa).await?;
                Some(RequestReference::to(&sa))
            }
            None => None,
        };

        let policy = self.policy_actions(&class, &namespace).await?;
        let name = bucket_access_name(&class.name_any(), &uid);
        let access = BucketAccess::new(
            &name,
            BucketAccessSpec {
                bucket_name: bucket,
                bucket_access_request: Some(RequestReference::to(request)),
                service_account,
                policy_actions_config_map_data: policy,
                driver_name: class.spec.driver_name.clone(),
                parameters: class.spec.parameters.clone(),
                principal: None,
                minted_secret_name: None,
            },
        );

        match self.ctx.store.get_bucket_access(&name).await {
            Ok(existing) if !existing.is_bound_to(&uid) => {
                return Err(Error::NameCollision {
                    kind: "BucketAccess",
                    name,
                })
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        // The finalizer must land before the access exists; anything written
        // after it is revoked on deletion.
        commit(
            &self.ctx,
            request,
            Subresource::Metadata,
            |r: &mut BucketAccessRequest| add_finalizer(&mut r.metadata, BucketAccessRequest::FINALIZER),
        )
        .await?;

        match self.ctx.store.create_bucket_access(&access).await {
            Ok(_) => info!(access = %name, "created bucket access"),
            Err(e) if e.is_already_exists() => {
                let existing = self.ctx.store.get_bucket_access(&name).await?;
                if !existing.is_bound_to(&uid) {
                    return Err(Error::NameCollision {
                        kind: "BucketAccess",
                        name,
                    });
                }
                debug!(access = %name, "bucket access already exists from an earlier attempt");
            }
            Err(e) => return Err(e.into()),
        }

        let latest = commit(
            &self.ctx,
            request,
            Subresource::Status,
            |r: &mut BucketAccessRequest| link_access(r, &name),
        )
        .await?;

        if let Some(linked) = latest.bound_access().filter(|linked| *linked != name) {
            let linked = linked.to_string();
            match self.ctx.store.delete_bucket_access(&name).await {
                Ok(()) => info!(access = %name, "deleted bucket access of a request linked elsewhere"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            return Err(Error::AlreadyLinked {
                kind: "BucketAccessRequest",
                name: format!("{}/{}", namespace, request.name_any()),
                linked,
            });
        }

        info!(access = %name, "access request bound to bucket access");
        Ok(Some(name))
    }

    /// Serialize the class' policy ConfigMap data as a JSON object
    ///
    /// An empty ConfigMap namespace means the request's own namespace.
    async fn policy_actions(&self, class: &BucketAccessClass, namespace: &str) -> Result<String, Error> {
        let reference = class
            .spec
            .policy_actions_config_map
            .as_ref()
            .filter(|r| !r.name.is_empty())
            .ok_or_else(|| Error::NilConfig {
                class: class.name_any(),
            })?;
        let cm_namespace = if reference.namespace.is_empty() {
            namespace
        } else {
            reference.namespace.as_str()
        };
        let cm = self
            .ctx
            .policies
            .get_config_map(cm_namespace, &reference.name)
            .await?;
        // BTreeMap keeps the keys sorted, so the payload is stable across runs.
        Ok(serde_json::to_string(&cm.data.unwrap_or_default())?)
    }

    #[instrument(skip_all, fields(request = %request.name_any(), namespace = ?request.namespace()))]
    async fn release(&self, request: &BucketAccessRequest) -> Result<(), Error> {
        if LifecycleState::of(request) != LifecycleState::Deleting {
            debug!("no finalizer to release");
            return Ok(());
        }

        if let Some(name) = candidate_access(request) {
            self.release_access(request, &name).await?;
        }

        match commit(
            &self.ctx,
            request,
            Subresource::Metadata,
            |r: &mut BucketAccessRequest| remove_finalizer(&mut r.metadata, BucketAccessRequest::FINALIZER),
        )
        .await
        {
            Ok(_) => {}
            Err(Error::Store(e)) if e.is_not_found() => debug!("access request already removed"),
            Err(e) => return Err(e),
        }
        info!("released access request finalizer");
        Ok(())
    }

    async fn release_access(&self, request: &BucketAccessRequest, name: &str) -> Result<(), Error> {
        let uid = request.uid().unwrap_or_default();
        match self.ctx.store.get_bucket_access(name).await {
            Ok(access) if !access.is_bound_to(&uid) => {
                warn!(access = name, "bucket access is not bound to this request; leaving it in place");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(access = name, "bucket access already deleted");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        match self.ctx.store.delete_bucket_access(name).await {
            Ok(()) => info!(access = name, "deleted bucket access"),
            Err(e) if e.is_not_found() => debug!(access = name, "bucket access already deleted"),
            Err(e) => return Err(e.into()),
        }
        self.ctx
            .events
            .publish(
                &request.object_ref(&()),
                EventType::Normal,
                reasons::BUCKET_ACCESS_DELETED,
                actions::DELETE,
                Some(format!("Deleted bucket access {}", name)),
            )
            .await;
        Ok(())
    }
}

#[async_trait]
impl Listener<BucketAccessRequest> for BucketAccessRequestListener {
    async fn add(&self, request: &BucketAccessRequest) -> Result<(), Error> {
        match LifecycleState::of(request) {
            LifecycleState::Unprovisioned | LifecycleState::Provisioning => {}
            _ => return Ok(()),
        }

        let obj_ref = request.object_ref(&());
        let result = self.provision(request).await;
        if let Ok(Some(access)) = &result {
            self.ctx
                .events
                .publish(
                    &obj_ref,
                    EventType::Normal,
                    reasons::ACCESS_GRANTED,
                    actions::GRANT,
                    Some(format!("Bound to bucket access {}", access)),
                )
                .await;
        }

        settle(
            &self.ctx,
            &obj_ref,
            actions::GRANT,
            reasons::FAILED_GRANT_ACCESS,
            result.map(|_| ()),
        )
        .await
    }

    async fn update(
        &self,
        _old: &BucketAccessRequest,
        new: &BucketAccessRequest,
    ) -> Result<(), Error> {
        if new.meta().deletion_timestamp.is_none() {
            return self.add(new).await;
        }
        let obj_ref = new.object_ref(&());
        let result = self.release(new).await;
        settle(
            &self.ctx,
            &obj_ref,
            actions::DELETE,
            reasons::FAILED_REVOKE_ACCESS,
            result,
        )
        .await
    }

    async fn delete(&self, request: &BucketAccessRequest) -> Result<(), Error> {
        debug!(request = %request.name_any(), namespace = ?request.namespace(), "access request removed from store");
        Ok(())
    }
}

/// BucketAccess a deleting request is (or may be) bound to
fn candidate_access(request: &BucketAccessRequest) -> Option<String> {
    if let Some(bound) = request.bound_access() {
        return Some(bound.to_string());
    }
    let uid = request.uid().filter(|uid| !uid.is_empty())?;
    let class = request.spec.bucket_access_class_name.as_str();
    if class.is_empty() {
        return None;
    }
    Some(bucket_access_name(class, &uid))
}

/// Record the request's BucketAccess in its status; returns whether anything changed
fn link_access(request: &mut BucketAccessRequest, access: &str) -> bool {
    let granted = request.status.as_ref().is_some_and(|s| s.access_granted);
    match request.bound_access() {
        Some(bound) if bound == access && granted => return false,
        Some(bound) if bound != access => {
            warn!(bound, access, "request already linked to a different access; keeping it");
            return false;
        }
        _ => {}
    }
    let status = request
        .status
        .get_or_insert_with(BucketAccessRequestStatus::default);
    status.bucket_access_name = Some(access.to_string());
    status.access_granted = true;
    true
}
