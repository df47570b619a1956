//! Per mesh type federation behaviour.

use std::sync::Arc;

use ahash::HashMap;
use async_trait::async_trait;
use kube::ResourceExt;
use mesh_hub_crds::v1alpha1::mesh::{Mesh, MeshType};
use mesh_hub_crds::v1alpha1::mesh_service::MeshService;
use mesh_hub_crds::v1alpha1::mesh_workload::MeshWorkload;
use mesh_hub_crds::v1alpha1::virtual_mesh::VirtualMesh;

use crate::eap::ExternalAccessPoint;
use crate::{Error, Result};

/// Installs the configuration that makes a service reachable from another cluster.
#[async_trait]
pub trait MeshFederationClient: Send + Sync {
    /// Exposes `mesh_service` through its cluster's ingress and returns the
    /// address remote clusters should dial.
    async fn federate_service_side(
        &self,
        virtual_mesh: &VirtualMesh,
        mesh_service: &MeshService,
    ) -> Result<ExternalAccessPoint>;

    /// Makes `mesh_service` resolvable from the cluster running `mesh_workload`.
    async fn federate_client_side(
        &self,
        eap: &ExternalAccessPoint,
        mesh_service: &MeshService,
        mesh_workload: &MeshWorkload,
    ) -> Result<()>;
}

/// Federation clients keyed by the mesh type they handle.
#[derive(Clone, Default)]
pub struct FederationClients {
    clients: HashMap<MeshType, Arc<dyn MeshFederationClient>>,
}

impl FederationClients {
    pub fn with(mut self, mesh_type: MeshType, client: Arc<dyn MeshFederationClient>) -> Self {
        self.clients.insert(mesh_type, client);
        self
    }

    pub fn for_mesh(&self, mesh: &Mesh) -> Result<Arc<dyn MeshFederationClient>> {
        let mesh_type = mesh.mesh_type();
        mesh_type
            .and_then(|t| self.clients.get(&t))
            .cloned()
            .ok_or_else(|| Error::UnsupportedMeshType {
                mesh: mesh.name_any(),
                mesh_type: mesh_type.map_or_else(|| "unknown".to_string(), |t| t.to_string()),
            })
    }
}
