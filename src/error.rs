//! Error types for the COSI controller
//!
//! Every failure the reconcilers can produce is a variant here. Control flow
//! branches on [`Error::kind`], never on message text.

use thiserror::Error;

use crate::store::StoreError;

/// How the dispatcher should treat a failed reconciliation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retrying cannot help without external intervention; stop requeueing
    Terminal,
    /// Transient or dependency-ordering failure; requeue with backoff
    Retryable,
}

/// Main error type for COSI controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// The class named by a request does not exist
    #[error("{kind} '{name}' not found")]
    InvalidClass {
        /// Class kind (BucketClass or BucketAccessClass)
        kind: &'static str,
        /// Class name from the request
        name: String,
    },

    /// An access class has no policy ConfigMap reference
    #[error("BucketAccessClass '{class}' has no policyActionsConfigMap")]
    NilConfig {
        /// Access class name
        class: String,
    },

    /// A request is missing a field the reconciler needs
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A dependency exists but has not been provisioned yet
    #[error("BucketClaim '{claim}' is not ready yet")]
    NotReadyYet {
        /// Claim the access request depends on
        claim: String,
    },

    /// The Bucket named for adoption does not exist
    #[error("bucket '{bucket}' not found")]
    BucketNotFound {
        /// Name of the missing Bucket
        bucket: String,
    },

    /// The deterministic name is taken by an object bound to another request
    #[error("{kind} '{name}' already exists and belongs to a different request")]
    NameCollision {
        /// Kind of the colliding object
        kind: &'static str,
        /// Colliding name
        name: String,
    },

    /// The Bucket named for adoption is bound to another claim
    #[error("bucket '{bucket}' is already bound to claim {claim}")]
    BucketBound {
        /// Bucket that was asked for
        bucket: String,
        /// namespace/name of the claim that holds it
        claim: String,
    },

    /// The request is already linked to a different object
    #[error("{kind} '{name}' is already linked to {linked}")]
    AlreadyLinked {
        /// Kind of the request
        kind: &'static str,
        /// namespace/name of the request
        name: String,
        /// Object the request is linked to
        linked: String,
    },

    /// Object store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid-reference error with the given message
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    /// Classify this error for the dispatcher
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidClass { .. } => ErrorKind::Terminal,
            Error::NilConfig { .. } => ErrorKind::Terminal,
            Error::InvalidReference(_) => ErrorKind::Terminal,
            Error::BucketNotFound { .. } => ErrorKind::Terminal,
            Error::NameCollision { .. } => ErrorKind::Terminal,
            Error::BucketBound { .. } => ErrorKind::Terminal,
            Error::AlreadyLinked { .. } => ErrorKind::Terminal,
            Error::Serialization(_) => ErrorKind::Terminal,
            Error::NotReadyYet { .. } => ErrorKind::Retryable,
            // NotFound/Conflict/API failures here are transient: the object may
            // appear later or the race may resolve on the next delivery.
            Error::Store(_) => ErrorKind::Retryable,
        }
    }

    /// Check if this error should be requeued
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}
