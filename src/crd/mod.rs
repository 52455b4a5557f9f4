//! Custom Resource Definitions for the objectstorage.k8s.io API group
//!
//! Namespaced requests (`BucketClaim`, `BucketAccessRequest`) are reconciled
//! into cluster-scoped objects (`Bucket`, `BucketAccess`) using cluster-scoped
//! policy templates (`BucketClass`, `BucketAccessClass`).

mod access;
mod bucket;
mod types;

pub use access::{
    BucketAccess, BucketAccessClass, BucketAccessClassSpec, BucketAccessRequest,
    BucketAccessRequestSpec, BucketAccessRequestStatus, BucketAccessSpec, BucketAccessStatus,
};
pub use bucket::{
    Bucket, BucketClaim, BucketClaimSpec, BucketClaimStatus, BucketClass, BucketClassSpec,
    BucketSpec, BucketStatus,
};
pub use types::{DeletionPolicy, NamespacedReference, Protocol, RequestReference};

use kube::CustomResourceExt;

/// All CRDs owned by this API group, in install order
pub fn all_crds() -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition>
{
    vec![
        BucketClass::crd(),
        BucketClaim::crd(),
        Bucket::crd(),
        BucketAccessClass::crd(),
        BucketAccessRequest::crd(),
        BucketAccess::crd(),
    ]
}
