use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::Controller;
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use mesh_hub_crds::v1alpha1::mesh::{Mesh, MeshType};
use mesh_hub_crds::v1alpha1::mesh_service::MeshService;
use mesh_hub_crds::v1alpha1::mesh_workload::MeshWorkload;
use mesh_hub_crds::v1alpha1::virtual_mesh::VirtualMesh;
use mesh_hub_k8s_utils::create_store;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::{ClusterClientGetter, KubeObjectClient};
use crate::context::Context;
use crate::controller::{error_policy, reconcile};
use crate::federation::FederationClients;
use crate::ip::IpAllocator;
use crate::istio::IstioFederationClient;
use crate::metrics::ControllerMetrics;
use crate::resolver::FederationResolver;
use crate::Result;

#[derive(Clone, Debug)]
pub struct FederationConfig {
    /// Namespace on the management cluster holding the IP record.
    pub write_namespace: String,
    pub virtual_ip_subnet: Ipv4Network,
    pub store_timeout: Duration,
}

/// Runs the MeshService federation controller against the management cluster
/// until `cancel` fires. `ready` is cancelled once the discovery caches are synced.
pub async fn start_federation_controller(
    client: Client,
    clusters: Arc<dyn ClusterClientGetter>,
    config: FederationConfig,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let timeout = Some(config.store_timeout);
    let (meshes, workloads, virtual_meshes) = tokio::try_join!(
        create_store(Api::<Mesh>::all(client.clone()), timeout),
        create_store(Api::<MeshWorkload>::all(client.clone()), timeout),
        create_store(Api::<VirtualMesh>::all(client.clone()), timeout),
    )?;

    let ip_allocator = IpAllocator::new(
        Arc::new(KubeObjectClient::<ConfigMap>::new(client.clone())),
        config.write_namespace,
        config.virtual_ip_subnet,
    );
    let istio = IstioFederationClient::new(meshes.clone(), clusters, Arc::new(ip_allocator));
    let resolver = FederationResolver::new(
        meshes,
        workloads,
        virtual_meshes,
        Arc::new(KubeObjectClient::<MeshService>::new(client.clone())),
        FederationClients::default().with(MeshType::Istio, Arc::new(istio)),
    );
    let context = Arc::new(Context {
        resolver,
        metrics: ControllerMetrics::new("federation"),
    });

    info!("discovery caches synced, starting federation controller");
    ready.cancel();
    Controller::new(Api::<MeshService>::all(client), Config::default().any_semantic())
        .graceful_shutdown_on(shutdown(cancel))
        .run(reconcile, error_policy, context)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}

async fn shutdown(cancel: CancellationToken) {
    cancel.cancelled().await;
}
