//! In-memory fakes and fixtures for exercising federation without a cluster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Node, NodeAddress, NodeStatus, Pod, PodSpec, Service,
    ServicePort, ServiceSpec, ServiceStatus,
};
use kube::api::ObjectMeta;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use mesh_hub_crds::istio::destination_rule::DestinationRule;
use mesh_hub_crds::istio::envoy_filter::EnvoyFilter;
use mesh_hub_crds::istio::gateway::Gateway;
use mesh_hub_crds::istio::service_entry::ServiceEntry;
use mesh_hub_crds::v1alpha1::ResourceRef;
use mesh_hub_crds::v1alpha1::mesh::{IstioMesh, LinkerdMesh, Mesh, MeshInstallation, MeshSpec};
use mesh_hub_crds::v1alpha1::mesh_service::{
    Federation, KubeService, KubeServicePort, MeshService, MeshServiceSpec,
};
use mesh_hub_crds::v1alpha1::mesh_workload::{KubeController, MeshWorkload, MeshWorkloadSpec};
use mesh_hub_crds::v1alpha1::virtual_mesh::{VirtualMesh, VirtualMeshSpec};

use crate::clients::{ClusterClient, NodeReader, ObjectClient};
use crate::{Error, Result};

pub(crate) const HUB_NAMESPACE: &str = "service-mesh-hub";

fn key<K: Resource>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn with_next_version<K: Resource + Clone>(obj: &K, current: Option<&str>) -> K {
    let next = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) + 1;
    let mut obj = obj.clone();
    obj.meta_mut().resource_version = Some(next.to_string());
    obj
}

/// Object store keyed by namespace and name that counts the calls made on it.
///
/// Writes bump the stored resourceVersion and an update carrying a different
/// one is rejected, as the API server does.
pub(crate) struct FakeObjectClient<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    fail_creates: AtomicBool,
    gets: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    status_updates: AtomicUsize,
}

impl<K> Default for FakeObjectClient<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            fail_creates: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            status_updates: AtomicUsize::new(0),
        }
    }
}

impl<K: Resource + Clone> FakeObjectClient<K> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_objects(objects: Vec<K>) -> Arc<Self> {
        let client = Self::default();
        for obj in objects {
            client.insert(obj);
        }
        Arc::new(client)
    }

    /// Seeds an object without counting it as a write.
    pub(crate) fn insert(&self, obj: K) {
        self.objects.lock().unwrap().insert(key(&obj), obj);
    }

    pub(crate) fn stored(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Makes every following create fail until reset.
    pub(crate) fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub(crate) fn status_updates(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }

    fn replace(&self, obj: &K) -> Result<K> {
        let mut objects = self.objects.lock().unwrap();
        let key = key(obj);
        let Some(current) = objects.get(&key) else {
            return Err(Error::Other(format!("{}/{} not found", key.0, key.1)));
        };
        let current_version = current.meta().resource_version.clone();
        if let Some(version) = &obj.meta().resource_version
            && Some(version) != current_version.as_ref()
        {
            return Err(Error::Other(format!(
                "conflict on {}/{}: resourceVersion {} is stale",
                key.0, key.1, version
            )));
        }
        let stored = with_next_version(obj, current_version.as_deref());
        objects.insert(key, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl<K> ObjectClient<K> for FakeObjectClient<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored(namespace, name))
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| ns.as_str() == wanted))
            .filter(|(_, obj)| {
                let obj_labels = obj.labels();
                labels.iter().all(|(k, v)| obj_labels.get(k) == Some(v))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let mut objects = self.objects.lock().unwrap();
        let key = key(obj);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::Other(format!("create of {}/{} rejected", key.0, key.1)));
        }
        if objects.contains_key(&key) {
            return Err(Error::Other(format!("{}/{} already exists", key.0, key.1)));
        }
        let stored = with_next_version(obj, None);
        objects.insert(key, stored.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let updated = self.replace(obj)?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let updated = self.replace(obj)?;
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}

#[derive(Default)]
pub(crate) struct FakeNodeReader {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl FakeNodeReader {
    pub(crate) fn insert(&self, node: Node) {
        self.nodes.lock().unwrap().insert(node.name_any(), node);
    }
}

#[async_trait]
impl NodeReader for FakeNodeReader {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }
}

/// One fake cluster; `client()` hands out views sharing its state.
#[derive(Default)]
pub(crate) struct FakeCluster {
    pub(crate) gateways: Arc<FakeObjectClient<Gateway>>,
    pub(crate) envoy_filters: Arc<FakeObjectClient<EnvoyFilter>>,
    pub(crate) service_entries: Arc<FakeObjectClient<ServiceEntry>>,
    pub(crate) destination_rules: Arc<FakeObjectClient<DestinationRule>>,
    pub(crate) services: Arc<FakeObjectClient<Service>>,
    pub(crate) pods: Arc<FakeObjectClient<Pod>>,
    pub(crate) nodes: Arc<FakeNodeReader>,
}

impl FakeCluster {
    pub(crate) fn client(&self) -> ClusterClient {
        ClusterClient {
            gateways: self.gateways.clone(),
            envoy_filters: self.envoy_filters.clone(),
            service_entries: self.service_entries.clone(),
            destination_rules: self.destination_rules.clone(),
            services: self.services.clone(),
            pods: self.pods.clone(),
            nodes: self.nodes.clone(),
        }
    }
}

pub(crate) fn store_with<K>(objects: Vec<K>) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (reader, mut writer) = reflector::store();
    for obj in objects {
        writer.apply_watcher_event(&watcher::Event::Apply(obj));
    }
    reader
}

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn ingress_labels() -> BTreeMap<String, String> {
    crate::istio::ingress_gateway_labels()
}

fn installation(namespace: &str) -> MeshInstallation {
    MeshInstallation {
        installation_namespace: namespace.to_string(),
        version: None,
    }
}

pub(crate) fn istio_mesh(name: &str, cluster: &str, install_ns: &str) -> Mesh {
    let mut mesh = Mesh::new(
        name,
        MeshSpec {
            cluster: ResourceRef::new(cluster, HUB_NAMESPACE),
            istio: Some(IstioMesh {
                installation: installation(install_ns),
            }),
            ..Default::default()
        },
    );
    mesh.metadata.namespace = Some(HUB_NAMESPACE.into());
    mesh
}

pub(crate) fn linkerd_mesh(name: &str, cluster: &str, install_ns: &str) -> Mesh {
    let mut mesh = Mesh::new(
        name,
        MeshSpec {
            cluster: ResourceRef::new(cluster, HUB_NAMESPACE),
            linkerd: Some(LinkerdMesh {
                installation: installation(install_ns),
                cluster_domain: None,
            }),
            ..Default::default()
        },
    );
    mesh.metadata.namespace = Some(HUB_NAMESPACE.into());
    mesh
}

pub(crate) fn virtual_mesh(name: &str, meshes: &[&str]) -> VirtualMesh {
    let mut vm = VirtualMesh::new(
        name,
        VirtualMeshSpec {
            display_name: None,
            meshes: meshes
                .iter()
                .map(|m| ResourceRef::new(*m, HUB_NAMESPACE))
                .collect(),
        },
    );
    vm.metadata.namespace = Some(HUB_NAMESPACE.into());
    vm
}

/// A MeshService for the kube service `name` in `namespace` on `cluster`,
/// federated to the named MeshWorkloads.
pub(crate) fn mesh_service(
    name: &str,
    namespace: &str,
    mesh: &str,
    cluster: &str,
    workloads: &[&str],
) -> MeshService {
    let mut svc = MeshService::new(
        &format!("{name}-{namespace}-{cluster}"),
        MeshServiceSpec {
            kube_service: KubeService {
                service_ref: ResourceRef::new(name, namespace).on_cluster(cluster),
                workload_selector_labels: BTreeMap::from([("app".to_string(), name.to_string())]),
                ports: vec![KubeServicePort {
                    port: 8080,
                    name: "http".into(),
                    protocol: "TCP".into(),
                }],
            },
            mesh: ResourceRef::new(mesh, HUB_NAMESPACE),
            federation: Some(Federation {
                multicluster_dns_name: format!("{name}.{namespace}.{cluster}"),
                federated_to_workloads: workloads
                    .iter()
                    .map(|w| ResourceRef::new(*w, HUB_NAMESPACE))
                    .collect(),
            }),
        },
    );
    svc.metadata.namespace = Some(HUB_NAMESPACE.into());
    svc
}

pub(crate) fn mesh_workload(name: &str, namespace: &str, mesh: &str, cluster: &str) -> MeshWorkload {
    let mut workload = MeshWorkload::new(
        name,
        MeshWorkloadSpec {
            kube_controller: KubeController {
                kube_controller_ref: ResourceRef::new(name, namespace).on_cluster(cluster),
                labels: BTreeMap::from([("app".to_string(), name.to_string())]),
                service_account_name: name.to_string(),
            },
            mesh: ResourceRef::new(mesh, HUB_NAMESPACE),
        },
    );
    workload.metadata.namespace = Some(HUB_NAMESPACE.into());
    workload
}

fn tls_port(node_port: Option<i32>) -> ServicePort {
    ServicePort {
        name: Some("tls".into()),
        port: 15443,
        node_port,
        ..Default::default()
    }
}

pub(crate) fn load_balancer_service(
    namespace: &str,
    name: &str,
    ip: Option<&str>,
    hostname: Option<&str>,
) -> Service {
    let mut metadata = meta(name, namespace);
    metadata.labels = Some(ingress_labels());
    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".into()),
            selector: Some(ingress_labels()),
            ports: Some(vec![tls_port(None)]),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: ip.map(String::from),
                    hostname: hostname.map(String::from),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        }),
    }
}

pub(crate) fn node_port_service(namespace: &str, name: &str, node_port: i32) -> Service {
    let mut metadata = meta(name, namespace);
    metadata.labels = Some(ingress_labels());
    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("NodePort".into()),
            selector: Some(ingress_labels()),
            ports: Some(vec![tls_port(Some(node_port))]),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn pod(namespace: &str, name: &str, node_name: Option<&str>) -> Pod {
    let mut metadata = meta(name, namespace);
    metadata.labels = Some(ingress_labels());
    Pod {
        metadata,
        spec: Some(PodSpec {
            node_name: node_name.map(String::from),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn node(name: &str, addresses: &[&str]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|address| NodeAddress {
                        address: address.to_string(),
                        type_: "InternalIP".into(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}
