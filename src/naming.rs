//! Deterministic names for provisioned objects
//!
//! Names derive only from the naming prefix and the request UID, so every
//! retry for the same request targets the same object and two requests never
//! share one.

/// Name of the Bucket provisioned for a claim
///
/// `prefix` is the claim's `bucketPrefix` when set, otherwise its class name.
pub fn bucket_name(prefix: &str, claim_uid: &str) -> String {
    format!("{}-{}", prefix, claim_uid)
}

/// Name of the BucketAccess provisioned for an access request
pub fn bucket_access_name(access_class: &str, request_uid: &str) -> String {
    format!("{}-{}", access_class, request_uid)
}
