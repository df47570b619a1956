use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};

use super::ResourceRef;
use super::mesh::Mesh;

pub const NAME_GROUP_VIRTUAL_MESH: &str = "virtualmeshes.networking.mesh-hub.dev";

/// A group of meshes federated together behind one ingress gateway identity.
#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "networking.mesh-hub.dev",
    version = "v1alpha1",
    kind = "VirtualMesh",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMeshSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub meshes: Vec<ResourceRef>,
}

impl VirtualMesh {
    pub fn contains_mesh(&self, mesh: &Mesh) -> bool {
        self.spec.meshes.iter().any(|r| r.refers_to(mesh))
    }
}
