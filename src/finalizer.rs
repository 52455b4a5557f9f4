//! Protection finalizers for request objects
//!
//! A request carries its protection finalizer for as long as it has an
//! associated cluster-scoped object, so the API server keeps the request
//! around until that object has been cleaned up.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Finalizer guarding a BucketClaim until its Bucket is released
pub const BUCKET_CLAIM_FINALIZER: &str = "cosi.objectstorage.k8s.io/bucketclaim-protection";

/// Finalizer guarding a BucketAccessRequest until its BucketAccess is deleted
pub const BUCKET_ACCESS_FINALIZER: &str = "cosi.objectstorage.k8s.io/bucketaccess-protection";

/// Ordered, duplicate-free set of finalizers
///
/// Insertion keeps existing order and appends; both `insert` and `remove`
/// report whether the set changed so callers can skip no-op writes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet(Vec<String>);

impl FinalizerSet {
    /// Read the finalizers from object metadata, dropping duplicates
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        let mut set = Self::default();
        for finalizer in meta.finalizers.iter().flatten() {
            set.insert(finalizer);
        }
        set
    }

    /// True if the set holds `finalizer`
    pub fn contains(&self, finalizer: &str) -> bool {
        self.0.iter().any(|f| f == finalizer)
    }

    /// Add `finalizer`; returns false if it was already present
    pub fn insert(&mut self, finalizer: &str) -> bool {
        if self.contains(finalizer) {
            return false;
        }
        self.0.push(finalizer.to_string());
        true
    }

    /// Remove `finalizer`; returns false if it was absent
    pub fn remove(&mut self, finalizer: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|f| f != finalizer);
        self.0.len() != before
    }

    /// Number of finalizers in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write the set back to object metadata
    pub fn apply_to(self, meta: &mut ObjectMeta) {
        meta.finalizers = Some(self.0);
    }
}

/// True if `meta` carries `finalizer`
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add `finalizer` to `meta`; returns whether anything changed
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let mut set = FinalizerSet::from_meta(meta);
    let changed = set.insert(finalizer);
    if changed {
        set.apply_to(meta);
    }
    changed
}

/// Remove `finalizer` from `meta`; returns whether anything changed
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let mut set = FinalizerSet::from_meta(meta);
    let changed = set.remove(finalizer);
    if changed {
        set.apply_to(meta);
    }
    changed
}
