//! BucketAccessClass, BucketAccessRequest and BucketAccess custom resources

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{NamespacedReference, RequestReference};

/// Policy template for BucketAccesses
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketAccessClass",
    plural = "bucketaccessclasses",
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driverName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessClassSpec {
    /// Driver that mints credentials for accesses of this class
    pub driver_name: String,

    /// Opaque driver parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// ConfigMap holding the policy actions granted by this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_actions_config_map: Option<NamespacedReference>,
}

/// Request for credentials to a claimed Bucket
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketAccessRequest",
    plural = "bucketaccessrequests",
    status = "BucketAccessRequestStatus",
    namespaced,
    printcolumn = r#"{"name":"Claim","type":"string","jsonPath":".spec.bucketClaimName"}"#,
    printcolumn = r#"{"name":"Access","type":"string","jsonPath":".status.bucketAccessName"}"#,
    printcolumn = r#"{"name":"Granted","type":"boolean","jsonPath":".status.accessGranted"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessRequestSpec {
    /// BucketClaim (same namespace) whose Bucket access is requested for
    pub bucket_claim_name: String,

    /// Name of the BucketAccessClass to provision from
    pub bucket_access_class_name: String,

    /// ServiceAccount the credentials are minted for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Observed state of a BucketAccessRequest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessRequestStatus {
    /// Name of the BucketAccess bound to this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_name: Option<String>,

    /// True once the request is bound to its BucketAccess
    #[serde(default)]
    pub access_granted: bool,
}

impl BucketAccessRequest {
    /// Name of the bound BucketAccess, if the linkage has been committed
    pub fn bound_access(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bucket_access_name.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Granted access to a Bucket
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketAccess",
    plural = "bucketaccesses",
    status = "BucketAccessStatus",
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".spec.bucketName"}"#,
    printcolumn = r#"{"name":"Granted","type":"boolean","jsonPath":".status.accessGranted"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessSpec {
    /// Bucket this access grants credentials for
    pub bucket_name: String,

    /// Request this access is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_request: Option<RequestReference>,

    /// Identity the credentials are minted for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<RequestReference>,

    /// Policy actions, as a JSON object of the referenced ConfigMap's data
    #[serde(default)]
    pub policy_actions_config_map_data: String,

    /// Driver that mints the credentials
    pub driver_name: String,

    /// Driver parameters, copied from the class at creation time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Backend principal, set by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,

    /// Secret holding minted credentials, set by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minted_secret_name: Option<String>,
}

impl BucketAccess {
    /// True if this access' back-reference points at the request with `uid`
    pub fn is_bound_to(&self, uid: &str) -> bool {
        self.spec
            .bucket_access_request
            .as_ref()
            .is_some_and(|r| r.refers_to(uid))
    }
}

/// Observed state of a BucketAccess, written by the driver
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessStatus {
    /// True once the driver has minted credentials
    #[serde(default)]
    pub access_granted: bool,
}
