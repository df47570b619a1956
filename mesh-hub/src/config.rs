use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ipnetwork::Ipv4Network;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Run the federation controller
    Controller(ControllerArgs),
    /// Print the hub CRDs as YAML
    Crdgen,
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Metrics and readiness listener
    #[arg(long, env = "METRICS_ADDRESS", default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Cluster configs path
    #[arg(
        long,
        env = "MESH_HUB_CLUSTERS_CONFIG",
        default_value = "/etc/mesh-hub/clusters.yaml"
    )]
    pub clusters_config: PathBuf,

    /// Namespace on the management cluster the hub writes its own state to
    #[arg(long, env = "WRITE_NAMESPACE", default_value = "service-mesh-hub")]
    pub write_namespace: String,

    /// Subnet virtual IPs for federated services are allocated from
    #[arg(
        long,
        env = "VIRTUAL_IP_SUBNET",
        default_value = mesh_hub_federation::ip::DEFAULT_VIRTUAL_IP_SUBNET
    )]
    pub virtual_ip_subnet: Ipv4Network,

    /// Seconds to wait for the discovery caches to sync
    #[arg(long, env = "STORE_TIMEOUT_SECONDS", default_value_t = 30)]
    pub store_timeout_seconds: u64,
}
