use kube::{CustomResource, KubeSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ResourceRef;

pub const NAME_GROUP_MESH: &str = "meshes.discovery.mesh-hub.dev";

/// A service mesh control plane installed on a single cluster.
#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "discovery.mesh-hub.dev",
    version = "v1alpha1",
    kind = "Mesh",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MeshSpec {
    /// Cluster the control plane runs on
    pub cluster: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<IstioMesh>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkerd: Option<LinkerdMesh>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consul_connect: Option<ConsulConnectMesh>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MeshInstallation {
    pub installation_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IstioMesh {
    pub installation: MeshInstallation,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LinkerdMesh {
    pub installation: MeshInstallation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConsulConnectMesh {
    pub installation: MeshInstallation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshType {
    Istio,
    Linkerd,
    ConsulConnect,
}

impl std::fmt::Display for MeshType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshType::Istio => write!(f, "istio"),
            MeshType::Linkerd => write!(f, "linkerd"),
            MeshType::ConsulConnect => write!(f, "consul-connect"),
        }
    }
}

impl Mesh {
    /// The mesh technology, or `None` if discovery left the type unset.
    pub fn mesh_type(&self) -> Option<MeshType> {
        if self.spec.istio.is_some() {
            Some(MeshType::Istio)
        } else if self.spec.linkerd.is_some() {
            Some(MeshType::Linkerd)
        } else if self.spec.consul_connect.is_some() {
            Some(MeshType::ConsulConnect)
        } else {
            None
        }
    }

    pub fn installation(&self) -> Option<&MeshInstallation> {
        if let Some(istio) = &self.spec.istio {
            Some(&istio.installation)
        } else if let Some(linkerd) = &self.spec.linkerd {
            Some(&linkerd.installation)
        } else {
            self.spec.consul_connect.as_ref().map(|c| &c.installation)
        }
    }

    pub fn installation_namespace(&self) -> Option<&str> {
        self.installation()
            .map(|i| i.installation_namespace.as_str())
            .filter(|ns| !ns.is_empty())
    }

    pub fn cluster_name(&self) -> &str {
        &self.spec.cluster.name
    }
}
