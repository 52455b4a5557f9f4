//! In-memory store for listener tests
//!
//! Behaves like the API server for the calls the reconcilers make: writes are
//! checked against `metadata.resourceVersion`, objects marked for deletion
//! disappear once their last finalizer is removed, and conflicts can be
//! injected to simulate a concurrent writer.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};

use super::{IdentityStore, ObjectStore, PolicyStore, StoreError};
use crate::crd::{
    Bucket, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketClaim, BucketClass,
};

/// Annotation stamped by an injected concurrent writer
pub const CONCURRENT_WRITE_ANNOTATION: &str = "test.objectstorage.k8s.io/concurrent-write";

/// Per-kind write counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub bucket_creates: u32,
    pub bucket_updates: u32,
    pub bucket_deletes: u32,
    pub access_creates: u32,
    pub access_deletes: u32,
    pub request_updates: u32,
    pub request_status_updates: u32,
    pub conflicts_returned: u32,
}

#[derive(Default)]
struct State {
    version: u64,
    bucket_classes: BTreeMap<String, BucketClass>,
    access_classes: BTreeMap<String, BucketAccessClass>,
    claims: BTreeMap<String, BucketClaim>,
    buckets: BTreeMap<String, Bucket>,
    access_requests: BTreeMap<String, BucketAccessRequest>,
    accesses: BTreeMap<String, BucketAccess>,
    service_accounts: BTreeMap<String, ServiceAccount>,
    config_maps: BTreeMap<String, ConfigMap>,
    pending_conflicts: u32,
    pending_status_conflicts: u32,
    calls: Calls,
}

impl State {
    /// Run a status write with one status-only conflict armed, if any remain
    fn with_status_conflicts<T>(&mut self, write: impl FnOnce(&mut State) -> T) -> T {
        let armed = self.pending_status_conflicts > 0;
        if armed {
            self.pending_status_conflicts -= 1;
            self.pending_conflicts += 1;
        }
        let returned = self.calls.conflicts_returned;
        let result = write(self);
        if armed && self.calls.conflicts_returned == returned {
            self.pending_conflicts -= 1;
            self.pending_status_conflicts += 1;
        }
        result
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Consume one injected conflict, simulating another writer touching `obj`
    fn take_conflict<K: Resource>(&mut self, obj: &mut K) -> bool {
        if self.pending_conflicts == 0 {
            return false;
        }
        self.pending_conflicts -= 1;
        self.calls.conflicts_returned += 1;
        let version = self.next_version();
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.clone());
        meta.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(CONCURRENT_WRITE_ANNOTATION.to_string(), version);
        true
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn request_key<K: Resource>(obj: &K) -> String {
    key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

fn get<K: Clone>(
    map: &BTreeMap<String, K>,
    kind: &'static str,
    key: &str,
) -> Result<K, StoreError> {
    map.get(key).cloned().ok_or_else(|| StoreError::NotFound {
        kind,
        name: key.to_string(),
    })
}

fn create<K: Resource + Clone>(
    state: &mut State,
    select: fn(&mut State) -> &mut BTreeMap<String, K>,
    kind: &'static str,
    key: String,
    obj: &K,
) -> Result<K, StoreError> {
    if select(state).contains_key(&key) {
        return Err(StoreError::AlreadyExists { kind, name: key });
    }
    let version = state.next_version();
    let mut stored = obj.clone();
    let meta = stored.meta_mut();
    meta.resource_version = Some(version.clone());
    if meta.uid.is_none() {
        meta.uid = Some(format!("uid-{}", version));
    }
    select(state).insert(key, stored.clone());
    Ok(stored)
}

/// Version-checked write; `apply` copies the written fields onto the stored copy
fn replace<K: Resource + Clone>(
    state: &mut State,
    select: fn(&mut State) -> &mut BTreeMap<String, K>,
    kind: &'static str,
    key: String,
    obj: &K,
    apply: fn(&mut K, &K),
) -> Result<K, StoreError> {
    let mut stored = get(select(state), kind, &key)?;
    if obj.meta().resource_version.is_some()
        && obj.meta().resource_version != stored.meta().resource_version
    {
        state.calls.conflicts_returned += 1;
        return Err(StoreError::Conflict { kind, name: key });
    }
    if state.take_conflict(&mut stored) {
        select(state).insert(key.clone(), stored);
        return Err(StoreError::Conflict { kind, name: key });
    }

    apply(&mut stored, obj);
    stored.meta_mut().resource_version = Some(state.next_version());

    let released =
        stored.meta().deletion_timestamp.is_some() && stored.finalizers().is_empty();
    if released {
        select(state).remove(&key);
    } else {
        select(state).insert(key, stored.clone());
    }
    Ok(stored)
}

/// Copy metadata (keeping server-owned fields) and spec
fn apply_claim(stored: &mut BucketClaim, new: &BucketClaim) {
    stored.metadata.finalizers = new.metadata.finalizers.clone();
    stored.metadata.labels = new.metadata.labels.clone();
    stored.metadata.annotations = new.metadata.annotations.clone();
    stored.spec = new.spec.clone();
}

fn apply_claim_status(stored: &mut BucketClaim, new: &BucketClaim) {
    stored.status = new.status.clone();
}

fn apply_access_request(stored: &mut BucketAccessRequest, new: &BucketAccessRequest) {
    stored.metadata.finalizers = new.metadata.finalizers.clone();
    stored.metadata.labels = new.metadata.labels.clone();
    stored.metadata.annotations = new.metadata.annotations.clone();
    stored.spec = new.spec.clone();
}

fn apply_access_request_status(stored: &mut BucketAccessRequest, new: &BucketAccessRequest) {
    stored.status = new.status.clone();
}

fn apply_bucket(stored: &mut Bucket, new: &Bucket) {
    stored.metadata.finalizers = new.metadata.finalizers.clone();
    stored.metadata.labels = new.metadata.labels.clone();
    stored.metadata.annotations = new.metadata.annotations.clone();
    stored.spec = new.spec.clone();
}

fn mark_deleted<K: Resource + Clone>(
    map: &mut BTreeMap<String, K>,
    key: &str,
    version: String,
) -> Option<K> {
    let mut obj = map.get(key).cloned()?;
    let meta = obj.meta_mut();
    meta.deletion_timestamp = Some(Time(Utc::now()));
    meta.resource_version = Some(version);
    if obj.finalizers().is_empty() {
        map.remove(key);
    } else {
        map.insert(key.to_string(), obj.clone());
    }
    Some(obj)
}

/// Thread-safe in-memory object store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a BucketClass
    pub fn put_bucket_class(&self, class: BucketClass) {
        let mut state = self.state.lock().unwrap();
        state.bucket_classes.insert(class.name_any(), class);
    }

    /// Create or overwrite a BucketAccessClass
    pub fn put_bucket_access_class(&self, class: BucketAccessClass) {
        let mut state = self.state.lock().unwrap();
        state.access_classes.insert(class.name_any(), class);
    }

    /// Seed a BucketClaim, returning the stored copy
    pub fn put_bucket_claim(&self, claim: BucketClaim) -> BucketClaim {
        let mut state = self.state.lock().unwrap();
        let key = request_key(&claim);
        let mut claim = claim;
        claim.metadata.resource_version = Some(state.next_version());
        state.claims.insert(key, claim.clone());
        claim
    }

    /// Seed a Bucket, returning the stored copy
    pub fn put_bucket(&self, bucket: Bucket) -> Bucket {
        let mut state = self.state.lock().unwrap();
        let mut bucket = bucket;
        bucket.metadata.resource_version = Some(state.next_version());
        state.buckets.insert(bucket.name_any(), bucket.clone());
        bucket
    }

    /// Seed a BucketAccessRequest, returning the stored copy
    pub fn put_bucket_access_request(&self, request: BucketAccessRequest) -> BucketAccessRequest {
        let mut state = self.state.lock().unwrap();
        let key = request_key(&request);
        let mut request = request;
        request.metadata.resource_version = Some(state.next_version());
        state.access_requests.insert(key, request.clone());
        request
    }

    /// Seed a ServiceAccount
    pub fn put_service_account(&self, sa: ServiceAccount) {
        let mut state = self.state.lock().unwrap();
        state.service_accounts.insert(request_key(&sa), sa);
    }

    /// Seed a ConfigMap
    pub fn put_config_map(&self, cm: ConfigMap) {
        let mut state = self.state.lock().unwrap();
        state.config_maps.insert(request_key(&cm), cm);
    }

    /// Set the deletion timestamp on a stored BucketClaim, as `kubectl delete` would
    pub fn mark_bucket_claim_deleted(&self, namespace: &str, name: &str) -> Option<BucketClaim> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        mark_deleted(&mut state.claims, &key(namespace, name), version)
    }

    /// Set the deletion timestamp on a stored BucketAccessRequest
    pub fn mark_bucket_access_request_deleted(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<BucketAccessRequest> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        mark_deleted(&mut state.access_requests, &key(namespace, name), version)
    }

    /// Fail the next `n` request writes with a conflict caused by another writer
    pub fn inject_conflicts(&self, n: u32) {
        self.state.lock().unwrap().pending_conflicts = n;
    }

    /// Fail the next `n` request status writes, leaving metadata writes alone
    pub fn inject_status_conflicts(&self, n: u32) {
        self.state.lock().unwrap().pending_status_conflicts = n;
    }

    pub fn bucket_claim(&self, namespace: &str, name: &str) -> Option<BucketClaim> {
        self.state.lock().unwrap().claims.get(&key(namespace, name)).cloned()
    }

    pub fn bucket_access_request(&self, namespace: &str, name: &str) -> Option<BucketAccessRequest> {
        self.state
            .lock()
            .unwrap()
            .access_requests
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn bucket(&self, name: &str) -> Option<Bucket> {
        self.state.lock().unwrap().buckets.get(name).cloned()
    }

    pub fn buckets(&self) -> Vec<Bucket> {
        self.state.lock().unwrap().buckets.values().cloned().collect()
    }

    pub fn bucket_access(&self, name: &str) -> Option<BucketAccess> {
        self.state.lock().unwrap().accesses.get(name).cloned()
    }

    pub fn bucket_accesses(&self) -> Vec<BucketAccess> {
        self.state.lock().unwrap().accesses.values().cloned().collect()
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_bucket_class(&self, name: &str) -> Result<BucketClass, StoreError> {
        get(&self.state.lock().unwrap().bucket_classes, "BucketClass", name)
    }

    async fn get_bucket_access_class(&self, name: &str) -> Result<BucketAccessClass, StoreError> {
        get(&self.state.lock().unwrap().access_classes, "BucketAccessClass", name)
    }

    async fn get_bucket_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BucketClaim, StoreError> {
        get(&self.state.lock().unwrap().claims, "BucketClaim", &key(namespace, name))
    }

    async fn update_bucket_claim(&self, claim: &BucketClaim) -> Result<BucketClaim, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.request_updates += 1;
        replace(
            &mut state,
            |s| &mut s.claims,
            "BucketClaim",
            request_key(claim),
            claim,
            apply_claim,
        )
    }

    async fn update_bucket_claim_status(
        &self,
        claim: &BucketClaim,
    ) -> Result<BucketClaim, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.request_status_updates += 1;
        state.with_status_conflicts(|state| {
            replace(
                state,
                |s| &mut s.claims,
                "BucketClaim",
                request_key(claim),
                claim,
                apply_claim_status,
            )
        })
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket, StoreError> {
        get(&self.state.lock().unwrap().buckets, "Bucket", name)
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.bucket_creates += 1;
        create(&mut state, |s| &mut s.buckets, "Bucket", bucket.name_any(), bucket)
    }

    async fn update_bucket(&self, bucket: &Bucket) -> Result<Bucket, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.bucket_updates += 1;
        let key = bucket.name_any();
        // Bucket writes never see injected conflicts; those target requests.
        let pending = std::mem::take(&mut state.pending_conflicts);
        let result = replace(&mut state, |s| &mut s.buckets, "Bucket", key, bucket, apply_bucket);
        state.pending_conflicts = pending;
        result
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.bucket_deletes += 1;
        state
            .buckets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: "Bucket",
                name: name.to_string(),
            })
    }

    async fn get_bucket_access_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BucketAccessRequest, StoreError> {
        get(
            &self.state.lock().unwrap().access_requests,
            "BucketAccessRequest",
            &key(namespace, name),
        )
    }

    async fn update_bucket_access_request(
        &self,
        request: &BucketAccessRequest,
    ) -> Result<BucketAccessRequest, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.request_updates += 1;
        replace(
            &mut state,
            |s| &mut s.access_requests,
            "BucketAccessRequest",
            request_key(request),
            request,
            apply_access_request,
        )
    }

    async fn update_bucket_access_request_status(
        &self,
        request: &BucketAccessRequest,
    ) -> Result<BucketAccessRequest, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.request_status_updates += 1;
        state.with_status_conflicts(|state| {
            replace(
                state,
                |s| &mut s.access_requests,
                "BucketAccessRequest",
                request_key(request),
                request,
                apply_access_request_status,
            )
        })
    }

    async fn get_bucket_access(&self, name: &str) -> Result<BucketAccess, StoreError> {
        get(&self.state.lock().unwrap().accesses, "BucketAccess", name)
    }

    async fn create_bucket_access(
        &self,
        access: &BucketAccess,
    ) -> Result<BucketAccess, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.access_creates += 1;
        create(
            &mut state,
            |s| &mut s.accesses,
            "BucketAccess",
            access.name_any(),
            access,
        )
    }

    async fn delete_bucket_access(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.access_deletes += 1;
        state
            .accesses
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind: "BucketAccess",
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, StoreError> {
        get(
            &self.state.lock().unwrap().service_accounts,
            "ServiceAccount",
            &key(namespace, name),
        )
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        get(
            &self.state.lock().unwrap().config_maps,
            "ConfigMap",
            &key(namespace, name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BucketClaimSpec;

    fn claim() -> BucketClaim {
        let mut claim = BucketClaim::new(
            "c",
            BucketClaimSpec {
                bucket_class_name: "gold".to_string(),
                ..Default::default()
            },
        );
        claim.metadata.namespace = Some("default".to_string());
        claim.metadata.uid = Some("abc".to_string());
        claim
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let store = MemoryStore::new();
        let seeded = store.put_bucket_claim(claim());

        let fresh = store.update_bucket_claim(&seeded).await.unwrap();
        assert_ne!(fresh.resource_version(), seeded.resource_version());

        let err = store.update_bucket_claim(&seeded).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn injected_conflict_touches_the_object() {
        let store = MemoryStore::new();
        let seeded = store.put_bucket_claim(claim());
        store.inject_conflicts(1);

        let err = store.update_bucket_claim_status(&seeded).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.bucket_claim("default", "c").unwrap();
        assert!(stored.annotations().contains_key(CONCURRENT_WRITE_ANNOTATION));
        assert_eq!(store.calls().conflicts_returned, 1);
    }

    #[tokio::test]
    async fn status_conflicts_spare_metadata_writes() {
        let store = MemoryStore::new();
        let seeded = store.put_bucket_claim(claim());
        store.inject_status_conflicts(1);

        let updated = store.update_bucket_claim(&seeded).await.unwrap();
        let err = store.update_bucket_claim_status(&updated).await.unwrap_err();
        assert!(err.is_conflict());

        let latest = store.bucket_claim("default", "c").unwrap();
        store.update_bucket_claim_status(&latest).await.unwrap();
        assert_eq!(store.calls().conflicts_returned, 1);
    }

    #[tokio::test]
    async fn removing_last_finalizer_releases_deleted_object() {
        let store = MemoryStore::new();
        let mut seeded = claim();
        seeded.metadata.finalizers = Some(vec!["f".to_string()]);
        store.put_bucket_claim(seeded);

        let mut deleting = store.mark_bucket_claim_deleted("default", "c").unwrap();
        deleting.metadata.finalizers = Some(vec![]);
        store.update_bucket_claim(&deleting).await.unwrap();

        assert!(store.bucket_claim("default", "c").is_none());
    }

    #[tokio::test]
    async fn create_reports_already_exists() {
        let store = MemoryStore::new();
        let bucket = Bucket::new("gold-abc", Default::default());
        store.create_bucket(&bucket).await.unwrap();
        let err = store.create_bucket(&bucket).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.buckets().len(), 1);
    }
}
