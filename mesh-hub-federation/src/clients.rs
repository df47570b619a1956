//! Seams between the federation logic and the Kubernetes API.
//!
//! Everything the federation core reads or writes on a cluster goes through
//! [`ObjectClient`] / [`NodeReader`], grouped per cluster in a [`ClusterClient`].
//! The kube-backed implementations are thin wrappers over [`kube::Api`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use mesh_hub_crds::istio::{
    destination_rule::DestinationRule, envoy_filter::EnvoyFilter, gateway::Gateway,
    service_entry::ServiceEntry,
};
use mesh_hub_k8s_utils::is_not_found;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{Error, Result};

const MANAGER: &str = "mesh-hub-federation";

/// CRUD over a namespaced resource type on one cluster.
#[async_trait]
pub trait ObjectClient<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Returns `None` when the object does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Lists objects whose labels contain all of `labels`. `None` lists across namespaces.
    async fn list(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replaces the object. The write is rejected if `obj` carries a stale resourceVersion.
    async fn update(&self, obj: &K) -> Result<K>;

    async fn update_status(&self, obj: &K) -> Result<K>;
}

#[async_trait]
pub trait NodeReader: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;
}

pub struct KubeObjectClient<K> {
    client: Client,
    _resource: PhantomData<fn() -> K>,
}

impl<K> KubeObjectClient<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _resource: PhantomData,
        }
    }
}

impl<K> KubeObjectClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api_for(&self, obj: &K) -> Result<Api<K>> {
        let namespace = obj
            .meta()
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingNamespace(obj.meta().name.clone().unwrap_or_default()))?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl<K> ObjectClient<K> for KubeObjectClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector(labels));
        }
        Ok(api.list(&params).await?.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let api = self.api_for(obj)?;
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let api = self.api_for(obj)?;
        Ok(api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let api = self.api_for(obj)?;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = serde_json::json!({ "status": status });
        debug!("patching status of {}", obj.name_any());
        Ok(api
            .patch_status(&obj.name_any(), &PatchParams::apply(MANAGER), &Patch::Merge(&patch))
            .await?)
    }
}

pub struct KubeNodeReader {
    client: Client,
}

impl KubeNodeReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeReader for KubeNodeReader {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(node) => Ok(Some(node)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// The clients federation needs on a single cluster.
#[derive(Clone)]
pub struct ClusterClient {
    pub gateways: Arc<dyn ObjectClient<Gateway>>,
    pub envoy_filters: Arc<dyn ObjectClient<EnvoyFilter>>,
    pub service_entries: Arc<dyn ObjectClient<ServiceEntry>>,
    pub destination_rules: Arc<dyn ObjectClient<DestinationRule>>,
    pub services: Arc<dyn ObjectClient<Service>>,
    pub pods: Arc<dyn ObjectClient<Pod>>,
    pub nodes: Arc<dyn NodeReader>,
}

impl From<Client> for ClusterClient {
    fn from(client: Client) -> Self {
        Self {
            gateways: Arc::new(KubeObjectClient::new(client.clone())),
            envoy_filters: Arc::new(KubeObjectClient::new(client.clone())),
            service_entries: Arc::new(KubeObjectClient::new(client.clone())),
            destination_rules: Arc::new(KubeObjectClient::new(client.clone())),
            services: Arc::new(KubeObjectClient::new(client.clone())),
            pods: Arc::new(KubeObjectClient::new(client.clone())),
            nodes: Arc::new(KubeNodeReader::new(client)),
        }
    }
}

pub trait ClusterClientGetter: Send + Sync {
    fn client_for_cluster(&self, cluster: &str) -> Option<ClusterClient>;

    /// Like [`Self::client_for_cluster`], treating a missing client as a not-ready cluster.
    fn require_cluster(&self, cluster: &str) -> Result<ClusterClient> {
        self.client_for_cluster(cluster)
            .ok_or_else(|| Error::ClusterNotReady(cluster.to_string()))
    }
}

/// Cluster name keyed set of clients, filled in as clusters are registered.
#[derive(Default)]
pub struct ClusterRegistry {
    clients: RwLock<HashMap<String, ClusterClient>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, cluster: impl Into<String>, client: ClusterClient) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(cluster.into(), client);
    }

    pub fn cluster_names(&self) -> Vec<String> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = clients.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ClusterClientGetter for ClusterRegistry {
    fn client_for_cluster(&self, cluster: &str) -> Option<ClusterClient> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.get(cluster).cloned()
    }
}
