use thiserror::Error;

pub mod istio;
pub mod v1alpha1;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// CRDs owned by the hub. The Istio types are consumed only and never generated.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        v1alpha1::mesh::Mesh::crd(),
        v1alpha1::mesh_service::MeshService::crd(),
        v1alpha1::mesh_workload::MeshWorkload::crd(),
        v1alpha1::virtual_mesh::VirtualMesh::crd(),
    ]
}

pub fn crd_gen_all() -> Result<()> {
    for crd in crds() {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
