//! BucketClass, BucketClaim and Bucket custom resources
//!
//! A `BucketClaim` is the user-facing request for storage. It names a
//! `BucketClass` (the policy template) and, once provisioned, points at exactly
//! one cluster-scoped `Bucket`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeletionPolicy, Protocol, RequestReference};

/// Policy template for Buckets
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketClass",
    plural = "bucketclasses",
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driverName"}"#,
    printcolumn = r#"{"name":"DeletionPolicy","type":"string","jsonPath":".spec.deletionPolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClassSpec {
    /// Driver responsible for Buckets of this class
    pub driver_name: String,

    /// Opaque driver parameters copied onto every Bucket of this class
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Deletion policy copied onto every Bucket of this class
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Protocols Buckets of this class support
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<Protocol>,
}

/// Request for a Bucket
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketClaim",
    plural = "bucketclaims",
    status = "BucketClaimStatus",
    namespaced,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.bucketClassName"}"#,
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".status.bucketName"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.bucketReady"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimSpec {
    /// Name of the BucketClass to provision from
    pub bucket_class_name: String,

    /// Prefix for the generated Bucket name; the class name is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,

    /// Bind to this pre-existing Bucket instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_bucket_name: Option<String>,

    /// Requested protocols; overrides the class protocols when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<Protocol>,

    /// Parameter overrides layered on top of the class parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl BucketClaimSpec {
    /// Name of the pre-existing Bucket to adopt, ignoring empty strings
    pub fn existing_bucket(&self) -> Option<&str> {
        self.existing_bucket_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Prefix used for deterministic Bucket naming
    pub fn naming_prefix(&self) -> &str {
        self.bucket_prefix
            .as_deref()
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(&self.bucket_class_name)
    }
}

/// Observed state of a BucketClaim
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimStatus {
    /// Name of the Bucket bound to this claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    /// True once the claim is bound to its Bucket
    #[serde(default)]
    pub bucket_ready: bool,
}

impl BucketClaim {
    /// Name of the bound Bucket, if the linkage has been committed
    pub fn bound_bucket(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bucket_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// True if the claim is bound and reports ready
    pub fn is_ready(&self) -> bool {
        self.bound_bucket().is_some() && self.status.as_ref().is_some_and(|s| s.bucket_ready)
    }
}

/// A provisioned (or adopted) bucket
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "Bucket",
    plural = "buckets",
    status = "BucketStatus",
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.bucketClassName"}"#,
    printcolumn = r#"{"name":"Claim","type":"string","jsonPath":".spec.bucketClaim.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.bucketReady"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Driver that provisions the backing storage
    pub driver_name: String,

    /// Class this Bucket was created from
    #[serde(default)]
    pub bucket_class_name: String,

    /// Claim this Bucket is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_claim: Option<RequestReference>,

    /// Protocols the Bucket is reachable over
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<Protocol>,

    /// Driver parameters, copied from the class at creation time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Frozen at creation time
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Backend identifier for buckets that existed before being imported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_bucket_id: Option<String>,
}

impl Bucket {
    /// True if this Bucket's back-reference points at the claim with `uid`
    pub fn is_bound_to(&self, uid: &str) -> bool {
        self.spec
            .bucket_claim
            .as_ref()
            .is_some_and(|r| r.refers_to(uid))
    }
}

/// Observed state of a Bucket, written by the driver
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// True once the driver has provisioned the backing storage
    #[serde(default)]
    pub bucket_ready: bool,

    /// Backend identifier assigned by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_id: Option<String>,
}
