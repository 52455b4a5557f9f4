//! Shared types used across the objectstorage CRDs

use std::fmt;

use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What happens to a Bucket when the claim that owns it is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete the Bucket together with its claim
    #[default]
    Delete,
    /// Leave the Bucket in place after the claim is gone
    Retain,
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionPolicy::Delete => write!(f, "Delete"),
            DeletionPolicy::Retain => write!(f, "Retain"),
        }
    }
}

/// Object storage protocol a bucket is reachable over
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    /// Amazon S3 compatible
    S3,
    /// Azure Blob storage
    Azure,
    /// Google Cloud Storage
    GCP,
}

/// Back-reference from a cluster-scoped object to the namespaced request it serves
///
/// This is a plain pointer, not an owner reference: nothing garbage-collects
/// through it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestReference {
    /// Name of the request
    pub name: String,
    /// Namespace of the request
    pub namespace: String,
    /// UID of the request at the time the reference was written
    pub uid: String,
}

impl RequestReference {
    /// Build a reference pointing at the given namespaced object
    pub fn to<K: Resource>(obj: &K) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            uid: obj.uid().unwrap_or_default(),
        }
    }

    /// True if this reference points at the object with the given UID
    pub fn refers_to(&self, uid: &str) -> bool {
        !uid.is_empty() && self.uid == uid
    }
}

/// Reference to a namespaced object by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedReference {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
}
