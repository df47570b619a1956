use std::path::Path;

use http::Uri;
use kube::config::KubeConfigOptions;
use mesh_hub_federation::clients::{ClusterClient, ClusterRegistry};
use serde::Deserialize;
use tracing::{info, warn};

use crate::Result;

#[derive(Clone)]
pub struct Cluster {
    pub name: String,
    client: kube::Client,
}

impl Cluster {
    pub async fn try_new(config: Config) -> Result<Self> {
        let client_config = if config.context.is_some() {
            kube::Config::from_kubeconfig(&KubeConfigOptions {
                context: config.context,
                ..Default::default()
            })
            .await?
        } else if let Some(endpoint) = config.endpoint {
            let mut client_config = kube::Config::incluster()?;
            client_config.cluster_url = Uri::try_from(endpoint)?;
            client_config
        } else {
            kube::Config::infer().await.map_err(kube::Error::InferConfig)?
        };

        let client = kube::Client::try_from(client_config)?;
        Ok(Self {
            name: config.name,
            client,
        })
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfigs {
    pub local: Config,

    #[serde(default)]
    pub remote: Vec<Config>,
}

impl ClusterConfigs {
    pub async fn try_new_configs(path: impl AsRef<Path>) -> Result<Self> {
        let config = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&config)
    }

    pub fn from_yaml(config: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(config)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub name: String,

    pub context: Option<String>,

    pub endpoint: Option<String>,
}

/// Builds clients for every configured cluster and registers them under
/// their names, returning the local cluster. A remote cluster whose client
/// cannot be built is left unregistered.
pub async fn register_clusters(
    configs: ClusterConfigs,
    registry: &ClusterRegistry,
) -> Result<Cluster> {
    let local = Cluster::try_new(configs.local).await?;
    registry.register(local.name.clone(), ClusterClient::from(local.client()));

    for config in configs.remote {
        let name = config.name.clone();
        match Cluster::try_new(config).await {
            Ok(cluster) => {
                registry.register(cluster.name.clone(), ClusterClient::from(cluster.client()));
                info!("registered cluster {}", name);
            }
            Err(e) => warn!(error = %e, "failed to create client for cluster {}", name),
        }
    }
    Ok(local)
}
