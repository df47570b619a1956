pub mod mesh;
pub mod mesh_service;
pub mod mesh_workload;
pub mod virtual_mesh;

use std::fmt;

use kube::Resource;
use kube::runtime::reflector::ObjectRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a resource, optionally on a specific cluster.
#[derive(Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            cluster: None,
        }
    }

    pub fn on_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn object_ref<K>(&self) -> ObjectRef<K>
    where
        K: Resource<DynamicType = ()>,
    {
        let obj_ref = ObjectRef::new(&self.name);
        match &self.namespace {
            Some(ns) => obj_ref.within(ns),
            None => obj_ref,
        }
    }

    /// Whether this reference points at the given object, ignoring the cluster.
    pub fn refers_to<K: Resource>(&self, resource: &K) -> bool {
        let meta = resource.meta();
        meta.name.as_deref() == Some(self.name.as_str())
            && meta.namespace.as_deref() == self.namespace.as_deref()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ns) = &self.namespace {
            write!(f, ".{ns}")?;
        }
        if let Some(cluster) = &self.cluster {
            write!(f, ".{cluster}")?;
        }
        Ok(())
    }
}
