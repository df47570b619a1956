pub mod config;
pub mod controller;
pub mod http;
pub mod kubernetes;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    #[error("in-cluster config error: {0}")]
    InClusterError(#[from] kube::config::InClusterError),

    #[error("invalid cluster endpoint: {0}")]
    InvalidUri(#[from] ::http::uri::InvalidUri),

    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("crd error: {0}")]
    CrdError(#[from] mesh_hub_crds::Error),

    #[error("federation error: {0}")]
    FederationError(#[from] mesh_hub_federation::Error),

    #[error("wait error: {0}")]
    WaitError(#[from] kube::runtime::wait::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
