//! Fan-out of a federated MeshService to the workloads it is federated to.

use std::sync::Arc;

use kube::ResourceExt;
use kube::runtime::reflector::Store;
use mesh_hub_crds::v1alpha1::ResourceRef;
use mesh_hub_crds::v1alpha1::mesh::Mesh;
use mesh_hub_crds::v1alpha1::mesh_service::{FederationStatus, MeshService};
use mesh_hub_crds::v1alpha1::mesh_workload::MeshWorkload;
use mesh_hub_crds::v1alpha1::virtual_mesh::VirtualMesh;
use tracing::{debug, info, instrument, warn};

use crate::clients::ObjectClient;
use crate::federation::FederationClients;
use crate::{Error, Result};

pub struct FederationResolver {
    meshes: Store<Mesh>,
    workloads: Store<MeshWorkload>,
    virtual_meshes: Store<VirtualMesh>,
    mesh_services: Arc<dyn ObjectClient<MeshService>>,
    federation_clients: FederationClients,
}

impl FederationResolver {
    pub fn new(
        meshes: Store<Mesh>,
        workloads: Store<MeshWorkload>,
        virtual_meshes: Store<VirtualMesh>,
        mesh_services: Arc<dyn ObjectClient<MeshService>>,
        federation_clients: FederationClients,
    ) -> Self {
        Self {
            meshes,
            workloads,
            virtual_meshes,
            mesh_services,
            federation_clients,
        }
    }

    pub async fn on_create(&self, mesh_service: &MeshService) -> Result<()> {
        self.reconcile(mesh_service).await
    }

    pub async fn on_update(&self, _old: &MeshService, new: &MeshService) -> Result<()> {
        self.reconcile(new).await
    }

    /// Federated configuration is left in place when a service goes away.
    pub async fn on_delete(&self, mesh_service: &MeshService) -> Result<()> {
        debug!("ignoring deletion of mesh service {}", mesh_service.name_any());
        Ok(())
    }

    /// Federates `mesh_service` to each of its target workloads and records the
    /// outcome in its status. A failing target does not stop the others.
    #[instrument(skip_all, fields(mesh_service = %mesh_service.name_any()))]
    pub async fn reconcile(&self, mesh_service: &MeshService) -> Result<()> {
        let Some(federation) = &mesh_service.spec.federation else {
            debug!("mesh service has no federation config");
            return Ok(());
        };

        let mut failed = Vec::new();
        for workload_ref in &federation.federated_to_workloads {
            if let Err(e) = self.federate_to_workload(mesh_service, workload_ref).await {
                warn!(error = %e, "failed to federate to workload {}", workload_ref);
                failed.push(workload_ref.to_string());
            }
        }

        let status = if failed.is_empty() {
            FederationStatus::accepted()
        } else {
            FederationStatus::processing_error(format!(
                "failed to federate to workloads: [{}]",
                failed.join(", ")
            ))
        };
        if mesh_service.federation_status() == Some(&status) {
            debug!("federation status unchanged");
            return Ok(());
        }

        info!(state = ?status.state, "updating federation status");
        let mut updated = mesh_service.clone();
        updated.status.get_or_insert_with(Default::default).federation_status = Some(status);
        self.mesh_services.update_status(&updated).await?;
        Ok(())
    }

    async fn federate_to_workload(
        &self,
        mesh_service: &MeshService,
        workload_ref: &ResourceRef,
    ) -> Result<()> {
        let workload = self
            .workloads
            .get(&workload_ref.object_ref())
            .ok_or_else(|| Error::MeshWorkloadNotFound(workload_ref.to_string()))?;
        let service_mesh = self.mesh(&mesh_service.spec.mesh)?;
        let workload_mesh = self.mesh(&workload.spec.mesh)?;
        let virtual_mesh = self.virtual_mesh_for(&service_mesh)?;

        let eap = self
            .federation_clients
            .for_mesh(&service_mesh)?
            .federate_service_side(&virtual_mesh, mesh_service)
            .await?;
        self.federation_clients
            .for_mesh(&workload_mesh)?
            .federate_client_side(&eap, mesh_service, &workload)
            .await?;
        debug!("federated to workload {} through {}:{}", workload_ref, eap.address, eap.port);
        Ok(())
    }

    fn mesh(&self, mesh_ref: &ResourceRef) -> Result<Arc<Mesh>> {
        self.meshes
            .get(&mesh_ref.object_ref())
            .ok_or_else(|| Error::MeshNotFound(mesh_ref.to_string()))
    }

    fn virtual_mesh_for(&self, mesh: &Mesh) -> Result<Arc<VirtualMesh>> {
        self.virtual_meshes
            .state()
            .into_iter()
            .find(|vm| vm.contains_mesh(mesh))
            .ok_or_else(|| Error::VirtualMeshNotFound(mesh.name_any()))
    }
}
