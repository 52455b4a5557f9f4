//! Class lookup
//!
//! A missing class is a configuration error on the request, not an outage:
//! it maps to the terminal `InvalidClass`. Every other store failure is
//! passed through for retry.

use crate::crd::{BucketAccessClass, BucketClass};
use crate::error::Error;
use crate::store::ObjectStore;

/// Look up the BucketClass a claim names
pub async fn resolve_bucket_class(store: &dyn ObjectStore, name: &str) -> Result<BucketClass, Error> {
    if name.is_empty() {
        return Err(Error::invalid_reference("spec.bucketClassName is empty"));
    }
    match store.get_bucket_class(name).await {
        Ok(class) => Ok(class),
        Err(e) if e.is_not_found() => Err(Error::InvalidClass {
            kind: "BucketClass",
            name: name.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Look up the BucketAccessClass an access request names
pub async fn resolve_bucket_access_class(
    store: &dyn ObjectStore,
    name: &str,
) -> Result<BucketAccessClass, Error> {
    if name.is_empty() {
        return Err(Error::invalid_reference(
            "spec.bucketAccessClassName is empty",
        ));
    }
    match store.get_bucket_access_class(name).await {
        Ok(class) => Ok(class),
        Err(e) if e.is_not_found() => Err(Error::InvalidClass {
            kind: "BucketAccessClass",
            name: name.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}
