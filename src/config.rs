//! Controller configuration
//!
//! Every knob is a command-line flag with an environment fallback so the same
//! binary runs unchanged from a Deployment manifest or a developer shell.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::retry::RetryConfig;
use crate::telemetry::LogFormat;
use crate::DEFAULT_CONTROLLER_NAME;

/// Runtime settings for the COSI controllers
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Path to a kubeconfig file; in-cluster config is used when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Name reported as the source of Kubernetes Events
    #[arg(long, env = "COSI_CONTROLLER_NAME", default_value = DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Log output format
    #[arg(long, env = "COSI_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Attempts per status write before a conflict is surfaced
    #[arg(long, env = "COSI_STATUS_RETRY_ATTEMPTS", default_value_t = 5)]
    pub status_retry_attempts: u32,

    /// Delay before the first status write retry, in milliseconds
    #[arg(long, env = "COSI_STATUS_RETRY_INITIAL_DELAY_MS", default_value_t = 10)]
    pub status_retry_initial_delay_ms: u64,

    /// Upper bound for a single status write retry delay, in milliseconds
    #[arg(long, env = "COSI_STATUS_RETRY_MAX_DELAY_MS", default_value_t = 1000)]
    pub status_retry_max_delay_ms: u64,

    /// Requeue delay after a retryable reconcile failure, in seconds
    #[arg(long, env = "COSI_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Requeue delay while an access request waits for its claim, in seconds
    #[arg(long, env = "COSI_NOT_READY_REQUEUE_SECS", default_value_t = 5)]
    pub not_ready_requeue_secs: u64,
}

impl ControllerConfig {
    /// Retry budget for optimistic status and finalizer writes
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.status_retry_attempts,
            initial_delay: Duration::from_millis(self.status_retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.status_retry_max_delay_ms),
            ..RetryConfig::default()
        }
    }

    /// Requeue intervals used by the error policy
    pub fn requeue(&self) -> RequeueConfig {
        RequeueConfig {
            error: Duration::from_secs(self.error_requeue_secs),
            not_ready: Duration::from_secs(self.not_ready_requeue_secs),
        }
    }
}

/// How long the controller waits before retrying a failed reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeueConfig {
    /// Delay after a retryable failure
    pub error: Duration,
    /// Delay while a dependency is not ready yet
    pub not_ready: Duration,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            error: Duration::from_secs(30),
            not_ready: Duration::from_secs(5),
        }
    }
}
