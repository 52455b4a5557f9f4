//! COSI controller - provisions object storage from namespaced requests
//!
//! Users ask for storage with a `BucketClaim` and for credentials with a
//! `BucketAccessRequest`. The controller turns each request into a
//! cluster-scoped `Bucket` or `BucketAccess` built from the named class, keeps
//! the request protected with a finalizer while that object exists, and
//! records the linkage in the request's status.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions for the objectstorage.k8s.io group
//! - [`controller`] - Listeners, lifecycle and the kube runtime bridge
//! - [`store`] - Object store seam and its kube-rs implementation
//! - [`naming`] - Deterministic names for provisioned objects
//! - [`finalizer`] - Finalizer bookkeeping on object metadata
//! - [`retry`] - Bounded retry with exponential backoff
//! - [`events`] - Kubernetes Event recording
//! - [`config`] - Command-line and environment configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod naming;
pub mod retry;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default name reported as the source of Kubernetes Events
pub const DEFAULT_CONTROLLER_NAME: &str = "cosi-controller";
