use ipnetwork::Ipv4Network;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("utils error: {0}")]
    UtilsError(#[from] mesh_hub_k8s_utils::Error),

    #[error("cluster {0} not ready: no client registered")]
    ClusterNotReady(String),

    #[error("mesh {0} not found")]
    MeshNotFound(String),

    #[error("mesh workload {0} not found")]
    MeshWorkloadNotFound(String),

    #[error("no virtual mesh found containing mesh {0}")]
    VirtualMeshNotFound(String),

    #[error("mesh service {0} is not in an istio mesh")]
    ServiceNotInIstio(String),

    #[error("mesh workload {0} is not in an istio mesh")]
    WorkloadNotInIstio(String),

    #[error("unsupported mesh type {mesh_type} for mesh {mesh}")]
    UnsupportedMeshType { mesh: String, mesh_type: String },

    #[error("mesh {0} has no installation namespace")]
    MissingInstallationNamespace(String),

    #[error("mesh service {0} has no federation config")]
    MissingFederation(String),

    #[error("mesh service {0} declares no ports")]
    MissingServicePorts(String),

    #[error("expected exactly one ingress gateway service on cluster {cluster}, found {count}")]
    IngressGatewayServiceCount { cluster: String, count: usize },

    #[error("gateway {gateway} must have exactly one server, found {count}")]
    GatewayServerCount { gateway: String, count: usize },

    #[error("service {0} has no available ports")]
    NoAvailablePorts(String),

    #[error("named port {port} not found on service {service}")]
    NamedPortNotFound { service: String, port: String },

    #[error("service {0} has no available ingresses")]
    NoAvailableIngresses(String),

    #[error("service {0} is not externally resolvable")]
    NotExternallyResolvable(String),

    #[error("no scheduled pods found for service {0}")]
    NoScheduledPods(String),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("node {0} has no active addresses")]
    NoActiveAddresses(String),

    #[error("unsupported service type {service_type} for service {service}")]
    UnsupportedServiceType {
        service: String,
        service_type: String,
    },

    #[error("network {0} exhausted")]
    NetworkExhausted(Ipv4Network),

    #[error("ip record for cluster {cluster} is malformed: {reason}")]
    MalformedIpRecord { cluster: String, reason: String },

    #[error("ips for cluster {0} not recorded yet")]
    IpNotRecordedYet(String),

    #[error("resource {0} has no namespace")]
    MissingNamespace(String),

    #[error("other error: {0}")]
    Other(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::KubeError(_) => "kube",
            Error::JsonError(_) => "json",
            Error::UtilsError(_) => "utils",
            Error::ClusterNotReady(_) => "cluster_not_ready",
            Error::MeshNotFound(_)
            | Error::MeshWorkloadNotFound(_)
            | Error::VirtualMeshNotFound(_) => "not_found",
            Error::ServiceNotInIstio(_)
            | Error::WorkloadNotInIstio(_)
            | Error::UnsupportedMeshType { .. } => "mesh_type",
            Error::GatewayServerCount { .. } => "gateway",
            Error::MissingInstallationNamespace(_)
            | Error::MissingFederation(_)
            | Error::MissingServicePorts(_)
            | Error::MissingNamespace(_) => "invalid_resource",
            Error::IngressGatewayServiceCount { .. }
            | Error::NoAvailablePorts(_)
            | Error::NamedPortNotFound { .. }
            | Error::NoAvailableIngresses(_)
            | Error::NotExternallyResolvable(_)
            | Error::NoScheduledPods(_)
            | Error::NodeNotFound(_)
            | Error::NoActiveAddresses(_)
            | Error::UnsupportedServiceType { .. } => "external_access_point",
            Error::NetworkExhausted(_)
            | Error::MalformedIpRecord { .. }
            | Error::IpNotRecordedYet(_) => "ip_allocation",
            Error::Other(_) => "other",
        }
        .to_string()
    }
}
