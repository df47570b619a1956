use std::sync::Arc;
use std::time::Duration;

use mesh_hub_federation::clients::ClusterRegistry;
use mesh_hub_federation::{FederationConfig, start_federation_controller};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::ControllerArgs;
use crate::kubernetes::cluster::{ClusterConfigs, register_clusters};
use crate::kubernetes::crds::apply_crds;

pub async fn start(
    args: ControllerArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let configs = ClusterConfigs::try_new_configs(&args.clusters_config).await?;
    let registry = Arc::new(ClusterRegistry::new());
    let local = register_clusters(configs, &registry).await?;
    info!(
        "registered clusters [{}], managing from {}",
        registry.cluster_names().join(", "),
        local.name
    );

    apply_crds(local.client()).await?;

    let config = FederationConfig {
        write_namespace: args.write_namespace,
        virtual_ip_subnet: args.virtual_ip_subnet,
        store_timeout: Duration::from_secs(args.store_timeout_seconds),
    };
    start_federation_controller(local.client(), registry, config, ready, cancel).await?;
    Ok(())
}
