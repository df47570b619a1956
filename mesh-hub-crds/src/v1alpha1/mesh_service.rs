use std::collections::BTreeMap;

use kube::{CustomResource, KubeSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ResourceRef;

pub const NAME_GROUP_MESH_SERVICE: &str = "meshservices.discovery.mesh-hub.dev";

/// A Kubernetes Service captured into a mesh.
#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "discovery.mesh-hub.dev",
    version = "v1alpha1",
    kind = "MeshService",
    status = "MeshServiceStatus",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MeshServiceSpec {
    pub kube_service: KubeService,
    /// Mesh the backing service is part of
    pub mesh: ResourceRef,
    /// Present when the service should be reachable from workloads in other meshes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation: Option<Federation>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KubeService {
    #[serde(rename = "ref")]
    pub service_ref: ResourceRef,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workload_selector_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<KubeServicePort>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KubeServicePort {
    pub port: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Federation {
    /// Hostname of the form `service.namespace.cluster`
    pub multicluster_dns_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub federated_to_workloads: Vec<ResourceRef>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MeshServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_status: Option<FederationStatus>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FederationStatus {
    pub state: FederationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FederationState {
    #[default]
    Pending,
    Accepted,
    ProcessingError,
}

impl FederationStatus {
    pub fn accepted() -> Self {
        Self {
            state: FederationState::Accepted,
            message: None,
        }
    }

    pub fn processing_error(message: impl Into<String>) -> Self {
        Self {
            state: FederationState::ProcessingError,
            message: Some(message.into()),
        }
    }
}

impl MeshService {
    pub fn federation_status(&self) -> Option<&FederationStatus> {
        self.status.as_ref()?.federation_status.as_ref()
    }
}
