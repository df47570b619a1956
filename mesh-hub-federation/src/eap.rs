//! Resolution of the externally reachable address of a Kubernetes Service.

use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::ResourceExt;
use tracing::{debug, instrument};

use crate::clients::ClusterClient;
use crate::{Error, Result};

/// An address and port reachable from outside the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalAccessPoint {
    pub address: String,
    pub port: u32,
}

fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    )
}

/// Resolves how `service` is reached from outside `cluster` on its port named `port_name`.
///
/// LoadBalancer services resolve to their first ingress, preferring the IP
/// over the hostname. NodePort services resolve to the first address of a
/// node that runs one of the service's pods.
#[instrument(skip_all, fields(service = %service_key(service), port = port_name))]
pub async fn resolve_external_access_point(
    cluster: &ClusterClient,
    service: &Service,
    port_name: &str,
) -> Result<ExternalAccessPoint> {
    let key = service_key(service);
    let spec = service.spec.as_ref();
    let ports = spec
        .and_then(|s| s.ports.as_deref())
        .filter(|ports| !ports.is_empty())
        .ok_or_else(|| Error::NoAvailablePorts(key.clone()))?;
    let port = ports
        .iter()
        .find(|p| p.name.as_deref() == Some(port_name))
        .ok_or_else(|| Error::NamedPortNotFound {
            service: key.clone(),
            port: port_name.to_string(),
        })?;

    match spec.and_then(|s| s.type_.as_deref()).unwrap_or("ClusterIP") {
        "LoadBalancer" => load_balancer_access_point(service, port, key),
        "NodePort" => node_port_access_point(cluster, service, port, key).await,
        other => Err(Error::UnsupportedServiceType {
            service: key,
            service_type: other.to_string(),
        }),
    }
}

fn load_balancer_access_point(
    service: &Service,
    port: &ServicePort,
    key: String,
) -> Result<ExternalAccessPoint> {
    let ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .and_then(|ingresses| ingresses.first())
        .ok_or_else(|| Error::NoAvailableIngresses(key.clone()))?;

    let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
    let address = non_empty(&ingress.ip)
        .or_else(|| non_empty(&ingress.hostname))
        .ok_or(Error::NotExternallyResolvable(key))?;

    Ok(ExternalAccessPoint {
        address,
        port: port.port as u32,
    })
}

async fn node_port_access_point(
    cluster: &ClusterClient,
    service: &Service,
    port: &ServicePort,
    key: String,
) -> Result<ExternalAccessPoint> {
    let node_port = port
        .node_port
        .ok_or_else(|| Error::NotExternallyResolvable(key.clone()))?;
    let namespace = service
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(key.clone()))?;
    let selector = service
        .spec
        .as_ref()
        .and_then(|s| s.selector.clone())
        .unwrap_or_default();

    let pods = cluster.pods.list(Some(&namespace), &selector).await?;
    let node_name = pods
        .iter()
        .filter_map(|pod| pod.spec.as_ref()?.node_name.clone())
        .find(|node| !node.is_empty())
        .ok_or_else(|| Error::NoScheduledPods(key))?;
    debug!("resolving node port through node {}", node_name);

    let node = cluster
        .nodes
        .get_node(&node_name)
        .await?
        .ok_or_else(|| Error::NodeNotFound(node_name.clone()))?;
    let address = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_deref())
        .and_then(|addresses| addresses.first())
        .map(|a| a.address.clone())
        .ok_or(Error::NoActiveAddresses(node_name))?;

    Ok(ExternalAccessPoint {
        address,
        port: node_port as u32,
    })
}
