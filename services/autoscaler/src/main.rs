//! Runner fleet autoscaler binary.
//!
//! Runs inside the cluster it scales, using the pod's service account, or
//! against the current kubeconfig context when started elsewhere. Any
//! reconciliation error exits the process non-zero; the pod's restart
//! policy brings it back.

use std::sync::Arc;

use anyhow::Result;
use fleet_autoscaler::{Config, FleetLoop, KubernetesGateway, RunnerQueueClient};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting runner fleet autoscaler");
    info!(
        queue_api_url = %config.queue_api_url,
        fleet_config_map = %config.fleet_config_map,
        poll_interval_secs = config.poll_interval.as_secs(),
        http_timeout_secs = config.http_timeout.as_secs(),
        "Configuration loaded"
    );

    let cluster = Arc::new(KubernetesGateway::infer(&config).await?);
    info!(namespace = %cluster.namespace(), "Connected to cluster");

    let queue = Arc::new(RunnerQueueClient::new(&config)?);
    let fleet = FleetLoop::new(cluster, queue, config.poll_interval);

    tokio::select! {
        result = fleet.run_forever() => match result {
            Ok(never) => match never {},
            Err(e) => {
                error!(error = %e, error_class = %e.class(), "Fleet loop stopped");
                Err(e.into())
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    }
}
