//! Object store seam
//!
//! The reconcilers never talk to the API server directly. They go through the
//! traits in this module, which return structured [`StoreError`] outcomes the
//! core branches on explicitly. [`KubeStore`] implements every trait over a
//! `kube::Client`.

mod kube_store;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    Bucket, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketClaim, BucketClass,
};

pub use kube_store::{create_client, ClientError, KubeStore};

/// Outcome of a failed store call
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the object
        kind: &'static str,
        /// Name (or namespace/name) of the object
        name: String,
    },

    /// An object with this name already exists
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of the object
        kind: &'static str,
        /// Name (or namespace/name) of the object
        name: String,
    },

    /// The write carried a stale resourceVersion
    #[error("conflict writing {kind} '{name}': the object has been modified")]
    Conflict {
        /// Kind of the object
        kind: &'static str,
        /// Name (or namespace/name) of the object
        name: String,
    },

    /// Any other API or transport failure
    #[error("{kind} '{name}': {source}")]
    Api {
        /// Kind of the object
        kind: &'static str,
        /// Name (or namespace/name) of the object
        name: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },
}

impl StoreError {
    /// Classify a kube client error for the object `kind`/`name`
    pub fn from_kube(kind: &'static str, name: impl Into<String>, err: kube::Error) -> Self {
        let name = name.into();
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound { kind, name },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists { kind, name }
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict { kind, name },
            source => StoreError::Api { kind, name, source },
        }
    }

    /// True for [`StoreError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True for [`StoreError::AlreadyExists`]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// True for [`StoreError::Conflict`]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Typed CRUD access to the objectstorage collections
///
/// Updates send the object's `metadata.resourceVersion`; a stale version
/// surfaces as [`StoreError::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a BucketClass by name
    async fn get_bucket_class(&self, name: &str) -> Result<BucketClass, StoreError>;

    /// Get a BucketAccessClass by name
    async fn get_bucket_access_class(&self, name: &str) -> Result<BucketAccessClass, StoreError>;

    /// Get a BucketClaim
    async fn get_bucket_claim(&self, namespace: &str, name: &str)
        -> Result<BucketClaim, StoreError>;

    /// Replace a BucketClaim's metadata and spec
    async fn update_bucket_claim(&self, claim: &BucketClaim) -> Result<BucketClaim, StoreError>;

    /// Replace a BucketClaim's status
    async fn update_bucket_claim_status(
        &self,
        claim: &BucketClaim,
    ) -> Result<BucketClaim, StoreError>;

    /// Get a Bucket by name
    async fn get_bucket(&self, name: &str) -> Result<Bucket, StoreError>;

    /// Create a Bucket
    async fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket, StoreError>;

    /// Replace a Bucket's metadata and spec
    async fn update_bucket(&self, bucket: &Bucket) -> Result<Bucket, StoreError>;

    /// Delete a Bucket by name
    async fn delete_bucket(&self, name: &str) -> Result<(), StoreError>;

    /// Get a BucketAccessRequest
    async fn get_bucket_access_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BucketAccessRequest, StoreError>;

    /// Replace a BucketAccessRequest's metadata and spec
    async fn update_bucket_access_request(
        &self,
        request: &BucketAccessRequest,
    ) -> Result<BucketAccessRequest, StoreError>;

    /// Replace a BucketAccessRequest's status
    async fn update_bucket_access_request_status(
        &self,
        request: &BucketAccessRequest,
    ) -> Result<BucketAccessRequest, StoreError>;

    /// Get a BucketAccess by name
    async fn get_bucket_access(&self, name: &str) -> Result<BucketAccess, StoreError>;

    /// Create a BucketAccess
    async fn create_bucket_access(&self, access: &BucketAccess)
        -> Result<BucketAccess, StoreError>;

    /// Delete a BucketAccess by name
    async fn delete_bucket_access(&self, name: &str) -> Result<(), StoreError>;
}

/// Read-only lookup of workload identities
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Get a ServiceAccount
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceAccount, StoreError>;
}

/// Read-only lookup of policy documents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Get a ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError>;
}
