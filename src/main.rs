//! COSI controller - object storage provisioning for Kubernetes

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Api;

use cosi_controller::config::ControllerConfig;
use cosi_controller::controller::{
    error_policy, reconcile_bucket_access_request, reconcile_bucket_claim, Context,
};
use cosi_controller::crd::{all_crds, BucketAccessRequest, BucketClaim};
use cosi_controller::store::create_client;
use cosi_controller::telemetry::init_tracing;

/// COSI controller - provisions Buckets and BucketAccesses from namespaced requests
#[derive(Parser, Debug)]
#[command(name = "cosi-controller", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: ControllerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let manifests = all_crds()
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{}", manifests.join("---\n"));
        return Ok(());
    }

    init_tracing(cli.config.log_format)?;
    run_controller(cli.config).await
}

/// Watch both request kinds until a shutdown signal arrives
async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    let client = create_client(config.kubeconfig.as_deref()).await?;

    let ctx = Arc::new(
        Context::builder(client.clone())
            .controller_name(config.controller_name.clone())
            .retry(config.retry_config())
            .requeue(config.requeue())
            .build(),
    );

    let claims: Api<BucketClaim> = Api::all(client.clone());
    let access_requests: Api<BucketAccessRequest> = Api::all(client);

    tracing::info!(controller = %config.controller_name, "Starting COSI controllers...");
    tracing::info!("  - BucketClaim controller");
    tracing::info!("  - BucketAccessRequest controller");

    let claim_controller = Controller::new(claims, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_bucket_claim, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "BucketClaim reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "BucketClaim reconciliation error");
                }
            }
        });

    let access_controller = Controller::new(access_requests, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_bucket_access_request, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "BucketAccessRequest reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "BucketAccessRequest reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = claim_controller => {
            tracing::info!("BucketClaim controller completed");
        }
        _ = access_controller => {
            tracing::info!("BucketAccessRequest controller completed");
        }
    }

    tracing::info!("COSI controller shutting down");
    Ok(())
}
