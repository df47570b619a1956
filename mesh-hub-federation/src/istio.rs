//! Federation of services between Istio meshes.
//!
//! On the service side the owning cluster's ingress gateway is opened for the
//! service's multicluster DNS name with TLS passthrough, and an EnvoyFilter
//! rewrites the SNI derived cluster name to the local service FQDN. On the
//! client side a ServiceEntry with a virtual IP points the DNS name at the
//! ingress of the service's cluster, and a DestinationRule enables mTLS.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use mesh_hub_crds::istio::Port;
use mesh_hub_crds::istio::destination_rule::{
    ClientTlsMode, ClientTlsSettings, DestinationRule, DestinationRuleSpec, TrafficPolicy,
};
use mesh_hub_crds::istio::envoy_filter::{
    ApplyTo, EnvoyConfigObjectMatch, EnvoyConfigObjectPatch, EnvoyFilter, EnvoyFilterSpec,
    FilterChainMatch, FilterMatch, ListenerMatch, Patch, PatchContext, PatchOperation,
    WorkloadSelector,
};
use mesh_hub_crds::istio::gateway::{Gateway, GatewaySpec, Server, ServerTlsMode, ServerTlsSettings};
use mesh_hub_crds::istio::service_entry::{
    Location, Resolution, ServiceEntry, ServiceEntrySpec, WorkloadEntry,
};
use mesh_hub_crds::v1alpha1::ResourceRef;
use mesh_hub_crds::v1alpha1::mesh::{Mesh, MeshType};
use mesh_hub_crds::v1alpha1::mesh_service::{Federation, MeshService};
use mesh_hub_crds::v1alpha1::mesh_workload::MeshWorkload;
use mesh_hub_crds::v1alpha1::virtual_mesh::VirtualMesh;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::clients::{ClusterClient, ClusterClientGetter};
use crate::eap::{ExternalAccessPoint, resolve_external_access_point};
use crate::federation::MeshFederationClient;
use crate::ip::IpAssigner;
use crate::{Error, Result};

pub const GATEWAY_PORT: u32 = 15443;
pub const GATEWAY_PORT_NAME: &str = "tls";
pub const GATEWAY_PROTOCOL: &str = "TLS";
pub const SERVICE_ENTRY_PORT_NAME: &str = "http1";
pub const SERVICE_ENTRY_PROTOCOL: &str = "HTTP";

const SNI_CLUSTER_FILTER: &str = "envoy.filters.network.sni_cluster";
const TCP_CLUSTER_REWRITE_FILTER: &str = "envoy.filters.network.tcp_cluster_rewrite";
const LOCAL_CLUSTER_SUFFIX: &str = ".svc.cluster.local";

pub fn ingress_gateway_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("istio".to_string(), "ingressgateway".to_string());
    labels
}

pub fn gateway_name(virtual_mesh: &str) -> String {
    format!("mesh-hub-vm-{virtual_mesh}-gateway")
}

pub fn envoy_filter_name(virtual_mesh: &str) -> String {
    format!("mesh-hub-vm-{virtual_mesh}-filter")
}

fn federation_server(host: &str) -> Server {
    Server {
        port: Port {
            number: GATEWAY_PORT,
            protocol: GATEWAY_PROTOCOL.to_string(),
            name: GATEWAY_PORT_NAME.to_string(),
        },
        hosts: vec![host.to_string()],
        tls: Some(ServerTlsSettings {
            mode: ServerTlsMode::AutoPassthrough,
        }),
    }
}

/// Routes `<svc>.<ns>.<cluster>` SNI names to `<svc>.<ns>.svc.cluster.local`.
fn cluster_rewrite_patch(cluster: &str) -> EnvoyConfigObjectPatch {
    EnvoyConfigObjectPatch {
        apply_to: ApplyTo::NetworkFilter,
        object_match: EnvoyConfigObjectMatch {
            context: PatchContext::Gateway,
            listener: Some(ListenerMatch {
                port_number: GATEWAY_PORT,
                filter_chain: Some(FilterChainMatch {
                    filter: Some(FilterMatch {
                        name: SNI_CLUSTER_FILTER.to_string(),
                    }),
                }),
            }),
        },
        patch: Patch {
            operation: PatchOperation::InsertAfter,
            value: json!({
                "name": TCP_CLUSTER_REWRITE_FILTER,
                "config": {
                    "cluster_pattern": format!("\\.{}$", cluster.replace('.', "\\.")),
                    "cluster_replacement": LOCAL_CLUSTER_SUFFIX,
                },
            }),
        },
    }
}

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub struct IstioFederationClient {
    meshes: Store<Mesh>,
    clusters: Arc<dyn ClusterClientGetter>,
    ip_assigner: Arc<dyn IpAssigner>,
}

impl IstioFederationClient {
    pub fn new(
        meshes: Store<Mesh>,
        clusters: Arc<dyn ClusterClientGetter>,
        ip_assigner: Arc<dyn IpAssigner>,
    ) -> Self {
        Self {
            meshes,
            clusters,
            ip_assigner,
        }
    }

    /// Resolves `mesh_ref` along with the client of the cluster it runs on.
    fn mesh_and_cluster(&self, mesh_ref: &ResourceRef) -> Result<(Arc<Mesh>, ClusterClient)> {
        let mesh = self
            .meshes
            .get(&mesh_ref.object_ref())
            .ok_or_else(|| Error::MeshNotFound(mesh_ref.to_string()))?;
        let client = self.clusters.require_cluster(mesh.cluster_name())?;
        Ok((mesh, client))
    }

    async fn ensure_gateway(
        &self,
        client: &ClusterClient,
        virtual_mesh: &str,
        namespace: &str,
        host: &str,
    ) -> Result<()> {
        let name = gateway_name(virtual_mesh);
        let Some(mut gateway) = client.gateways.get(namespace, &name).await? else {
            let gateway = Gateway {
                metadata: metadata(&name, namespace),
                spec: GatewaySpec {
                    servers: vec![federation_server(host)],
                    selector: ingress_gateway_labels(),
                },
            };
            client.gateways.create(&gateway).await?;
            info!("created gateway {}/{} for {}", namespace, name, host);
            return Ok(());
        };

        let servers = gateway.spec.servers.len();
        if servers > 1 {
            return Err(Error::GatewayServerCount {
                gateway: format!("{namespace}/{name}"),
                count: servers,
            });
        }
        match gateway.spec.servers.first_mut() {
            Some(server) if server.hosts.iter().any(|h| h == host) => {
                debug!("gateway {}/{} already exposes {}", namespace, name, host);
                return Ok(());
            }
            Some(server) => server.hosts.push(host.to_string()),
            None => gateway.spec.servers.push(federation_server(host)),
        }
        client.gateways.update(&gateway).await?;
        info!("added {} to gateway {}/{}", host, namespace, name);
        Ok(())
    }

    async fn ensure_envoy_filter(
        &self,
        client: &ClusterClient,
        virtual_mesh: &str,
        namespace: &str,
        cluster: &str,
    ) -> Result<()> {
        let name = envoy_filter_name(virtual_mesh);
        if client.envoy_filters.get(namespace, &name).await?.is_some() {
            debug!("envoy filter {}/{} already exists", namespace, name);
            return Ok(());
        }
        let filter = EnvoyFilter {
            metadata: metadata(&name, namespace),
            spec: EnvoyFilterSpec {
                workload_selector: Some(WorkloadSelector {
                    labels: ingress_gateway_labels(),
                }),
                config_patches: vec![cluster_rewrite_patch(cluster)],
            },
        };
        client.envoy_filters.create(&filter).await?;
        info!("created envoy filter {}/{}", namespace, name);
        Ok(())
    }

    async fn ingress_gateway_access_point(
        &self,
        client: &ClusterClient,
        cluster: &str,
    ) -> Result<ExternalAccessPoint> {
        let services = client.services.list(None, &ingress_gateway_labels()).await?;
        let [service] = services.as_slice() else {
            return Err(Error::IngressGatewayServiceCount {
                cluster: cluster.to_string(),
                count: services.len(),
            });
        };
        resolve_external_access_point(client, service, GATEWAY_PORT_NAME).await
    }

    async fn ensure_service_entry(
        &self,
        client: &ClusterClient,
        cluster: &str,
        namespace: &str,
        mesh_service: &MeshService,
        federation: &Federation,
        eap: &ExternalAccessPoint,
    ) -> Result<()> {
        let name = &federation.multicluster_dns_name;
        if client.service_entries.get(namespace, name).await?.is_some() {
            debug!("service entry {}/{} already exists", namespace, name);
            return Ok(());
        }
        let port = mesh_service
            .spec
            .kube_service
            .ports
            .first()
            .ok_or_else(|| Error::MissingServicePorts(mesh_service.name_any()))?;

        let ip = self.ip_assigner.assign_ip_on_cluster(cluster).await?;
        let mut endpoint_ports = BTreeMap::new();
        endpoint_ports.insert(SERVICE_ENTRY_PORT_NAME.to_string(), eap.port);
        let service_entry = ServiceEntry {
            metadata: metadata(name, namespace),
            spec: ServiceEntrySpec {
                hosts: vec![name.clone()],
                addresses: vec![ip.to_string()],
                ports: vec![Port {
                    number: port.port,
                    protocol: SERVICE_ENTRY_PROTOCOL.to_string(),
                    name: SERVICE_ENTRY_PORT_NAME.to_string(),
                }],
                location: Location::MeshInternal,
                resolution: Resolution::Dns,
                endpoints: vec![WorkloadEntry {
                    address: eap.address.clone(),
                    ports: endpoint_ports,
                }],
            },
        };
        if let Err(e) = client.service_entries.create(&service_entry).await {
            // the entry does not exist, so nothing else will ever release this ip
            if let Err(release) = self.ip_assigner.unassign_ip_on_cluster(cluster, ip).await {
                warn!(error = %release, "failed to release ip {} on cluster {}", ip, cluster);
            }
            return Err(e);
        }
        info!("created service entry {}/{} with ip {}", namespace, name, ip);
        Ok(())
    }

    async fn ensure_destination_rule(
        &self,
        client: &ClusterClient,
        namespace: &str,
        host: &str,
    ) -> Result<()> {
        if client.destination_rules.get(namespace, host).await?.is_some() {
            debug!("destination rule {}/{} already exists", namespace, host);
            return Ok(());
        }
        let rule = DestinationRule {
            metadata: metadata(host, namespace),
            spec: DestinationRuleSpec {
                host: host.to_string(),
                traffic_policy: Some(TrafficPolicy {
                    tls: Some(ClientTlsSettings {
                        mode: ClientTlsMode::IstioMutual,
                    }),
                }),
            },
        };
        client.destination_rules.create(&rule).await?;
        info!("created destination rule {}/{}", namespace, host);
        Ok(())
    }
}

#[async_trait]
impl MeshFederationClient for IstioFederationClient {
    #[instrument(skip_all, fields(mesh_service = %mesh_service.name_any(), virtual_mesh = %virtual_mesh.name_any()))]
    async fn federate_service_side(
        &self,
        virtual_mesh: &VirtualMesh,
        mesh_service: &MeshService,
    ) -> Result<ExternalAccessPoint> {
        let (mesh, client) = self.mesh_and_cluster(&mesh_service.spec.mesh)?;
        if mesh.mesh_type() != Some(MeshType::Istio) {
            return Err(Error::ServiceNotInIstio(mesh_service.name_any()));
        }
        let namespace = mesh
            .installation_namespace()
            .ok_or_else(|| Error::MissingInstallationNamespace(mesh.name_any()))?;
        let federation = mesh_service
            .spec
            .federation
            .as_ref()
            .ok_or_else(|| Error::MissingFederation(mesh_service.name_any()))?;

        let vm_name = virtual_mesh.name_any();
        self.ensure_gateway(&client, &vm_name, namespace, &federation.multicluster_dns_name)
            .await?;
        self.ensure_envoy_filter(&client, &vm_name, namespace, mesh.cluster_name())
            .await?;
        self.ingress_gateway_access_point(&client, mesh.cluster_name())
            .await
    }

    #[instrument(skip_all, fields(mesh_service = %mesh_service.name_any(), mesh_workload = %mesh_workload.name_any()))]
    async fn federate_client_side(
        &self,
        eap: &ExternalAccessPoint,
        mesh_service: &MeshService,
        mesh_workload: &MeshWorkload,
    ) -> Result<()> {
        let (mesh, client) = self.mesh_and_cluster(&mesh_workload.spec.mesh)?;
        if mesh.mesh_type() != Some(MeshType::Istio) {
            return Err(Error::WorkloadNotInIstio(mesh_workload.name_any()));
        }
        let namespace = mesh
            .installation_namespace()
            .ok_or_else(|| Error::MissingInstallationNamespace(mesh.name_any()))?;
        let federation = mesh_service
            .spec
            .federation
            .as_ref()
            .ok_or_else(|| Error::MissingFederation(mesh_service.name_any()))?;

        self.ensure_service_entry(
            &client,
            mesh.cluster_name(),
            namespace,
            mesh_service,
            federation,
            eap,
        )
        .await?;
        self.ensure_destination_rule(&client, namespace, &federation.multicluster_dns_name)
            .await
    }
}
