//! Cluster-unique virtual IPs for federated ServiceEntries.
//!
//! Allocations live in a single ConfigMap on the management cluster. Each key
//! is a cluster name and each value a JSON array of addresses, where an empty
//! string marks a released slot that the next assignment on that cluster reuses.
//! Writes rely on the API server rejecting stale resourceVersions; a conflicting
//! assign surfaces as an error to the caller.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use mesh_hub_k8s_utils::{Backoff, retry_with_backoff};
use tracing::{debug, info, instrument};

use crate::clients::ObjectClient;
use crate::{Error, Result};

pub const IP_RECORD_NAME: &str = "mesh-hub-ip-record";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const DEFAULT_VIRTUAL_IP_SUBNET: &str = "240.0.0.0/4";

#[async_trait]
pub trait IpAssigner: Send + Sync {
    async fn assign_ip_on_cluster(&self, cluster: &str) -> Result<Ipv4Addr>;
    async fn unassign_ip_on_cluster(&self, cluster: &str, ip: Ipv4Addr) -> Result<()>;
}

pub struct IpAllocator {
    config_maps: Arc<dyn ObjectClient<ConfigMap>>,
    namespace: String,
    name: String,
    network: Ipv4Network,
}

impl IpAllocator {
    pub fn new(
        config_maps: Arc<dyn ObjectClient<ConfigMap>>,
        namespace: impl Into<String>,
        network: Ipv4Network,
    ) -> Self {
        Self {
            config_maps,
            namespace: namespace.into(),
            name: IP_RECORD_NAME.into(),
            network,
        }
    }

    fn new_record(&self, data: BTreeMap<String, String>) -> ConfigMap {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), "mesh-hub".to_string());
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    /// Reads the record, failing if `cluster` has no entry in it yet.
    async fn read_cluster_record(&self, cluster: &str) -> Result<(ConfigMap, String)> {
        let Some(record) = self.config_maps.get(&self.namespace, &self.name).await? else {
            return Err(Error::IpNotRecordedYet(cluster.to_string()));
        };
        let Some(ips) = record.data.as_ref().and_then(|d| d.get(cluster)).cloned() else {
            return Err(Error::IpNotRecordedYet(cluster.to_string()));
        };
        Ok((record, ips))
    }
}

#[async_trait]
impl IpAssigner for IpAllocator {
    #[instrument(skip(self))]
    async fn assign_ip_on_cluster(&self, cluster: &str) -> Result<Ipv4Addr> {
        let ip = match self.config_maps.get(&self.namespace, &self.name).await? {
            None => {
                let (ip, ips) = generate_new_ip(&self.network, cluster, None)?;
                let mut data = BTreeMap::new();
                data.insert(cluster.to_string(), ips);
                self.config_maps.create(&self.new_record(data)).await?;
                ip
            }
            Some(mut record) => {
                let data = record.data.get_or_insert_with(BTreeMap::new);
                let (ip, ips) =
                    generate_new_ip(&self.network, cluster, data.get(cluster).map(String::as_str))?;
                data.insert(cluster.to_string(), ips);
                self.config_maps.update(&record).await?;
                ip
            }
        };
        info!("assigned ip {} on cluster {}", ip, cluster);
        Ok(ip)
    }

    #[instrument(skip(self))]
    async fn unassign_ip_on_cluster(&self, cluster: &str, ip: Ipv4Addr) -> Result<()> {
        // a racing assign may not have created the record yet
        let (mut record, ips) = retry_with_backoff(&Backoff::default(), "read ip record", move || {
            self.read_cluster_record(cluster)
        })
        .await?;

        let mut ips = parse_record(cluster, &ips)?;
        let ip = ip.to_string();
        let mut released = 0;
        for entry in ips.iter_mut().filter(|entry| **entry == ip) {
            entry.clear();
            released += 1;
        }
        if released == 0 {
            debug!("ip {} was not assigned on cluster {}", ip, cluster);
        }

        record
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(cluster.to_string(), serde_json::to_string(&ips)?);
        self.config_maps.update(&record).await?;
        info!("released ip {} on cluster {}", ip, cluster);
        Ok(())
    }
}

fn parse_record(cluster: &str, ips: &str) -> Result<Vec<String>> {
    if ips.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(ips).map_err(|e| Error::MalformedIpRecord {
        cluster: cluster.to_string(),
        reason: e.to_string(),
    })
}

/// Picks the next address for `cluster` and returns it with the re-encoded list.
///
/// The first released slot is refilled with the successor of the last address
/// before it; without released slots the list grows by the successor of its
/// last entry. The network address itself is never handed out.
pub(crate) fn generate_new_ip(
    network: &Ipv4Network,
    cluster: &str,
    existing: Option<&str>,
) -> Result<(Ipv4Addr, String)> {
    let mut ips = match existing {
        Some(ips) => parse_record(cluster, ips)?,
        None => Vec::new(),
    };

    let mut last_seen = None;
    let mut hole = None;
    for (idx, entry) in ips.iter().enumerate() {
        if entry.is_empty() {
            hole = Some(idx);
            break;
        }
        let addr: Ipv4Addr = entry.parse().map_err(|_| Error::MalformedIpRecord {
            cluster: cluster.to_string(),
            reason: format!("invalid address {entry}"),
        })?;
        last_seen = Some(addr);
    }

    let next = increment_ip(network, last_seen.unwrap_or_else(|| network.network()))?;
    match hole {
        Some(idx) => ips[idx] = next.to_string(),
        None => ips.push(next.to_string()),
    }
    Ok((next, serde_json::to_string(&ips)?))
}

pub(crate) fn increment_ip(network: &Ipv4Network, ip: Ipv4Addr) -> Result<Ipv4Addr> {
    u32::from(ip)
        .checked_add(1)
        .map(Ipv4Addr::from)
        .filter(|next| network.contains(*next))
        .ok_or(Error::NetworkExhausted(*network))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::testing::FakeObjectClient;

    const NS: &str = "service-mesh-hub";

    fn subnet() -> Ipv4Network {
        DEFAULT_VIRTUAL_IP_SUBNET.parse().expect("default subnet")
    }

    fn allocator(config_maps: Arc<FakeObjectClient<ConfigMap>>) -> IpAllocator {
        IpAllocator::new(config_maps, NS, subnet())
    }

    fn record(cluster: &str, ips: &str) -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert(cluster.to_string(), ips.to_string());
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(IP_RECORD_NAME.into()),
                namespace: Some(NS.into()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    fn stored_ips(config_maps: &FakeObjectClient<ConfigMap>, cluster: &str) -> Vec<String> {
        let record = config_maps.stored(NS, IP_RECORD_NAME).expect("ip record");
        let ips = record.data.expect("data").get(cluster).cloned().expect("cluster key");
        serde_json::from_str(&ips).expect("json list")
    }

    #[tokio::test]
    async fn test_first_assignment_skips_network_address() {
        let config_maps = FakeObjectClient::new();
        let ip = allocator(config_maps.clone())
            .assign_ip_on_cluster("c1")
            .await
            .expect("assign");

        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 1));
        assert_eq!(config_maps.creates(), 1);
        assert_eq!(stored_ips(&config_maps, "c1"), vec!["240.0.0.1"]);
    }

    #[tokio::test]
    async fn test_assignments_are_monotonic() {
        let config_maps = FakeObjectClient::new();
        let allocator = allocator(config_maps.clone());

        let mut ips = Vec::new();
        for _ in 0..3 {
            ips.push(allocator.assign_ip_on_cluster("c1").await.expect("assign"));
        }

        assert_eq!(
            ips,
            vec![
                Ipv4Addr::new(240, 0, 0, 1),
                Ipv4Addr::new(240, 0, 0, 2),
                Ipv4Addr::new(240, 0, 0, 3),
            ]
        );
        assert_eq!(config_maps.creates(), 1);
        assert_eq!(config_maps.updates(), 2);
    }

    #[tokio::test]
    async fn test_clusters_are_allocated_independently() {
        let config_maps = FakeObjectClient::new();
        let allocator = allocator(config_maps.clone());

        allocator.assign_ip_on_cluster("c1").await.expect("assign");
        allocator.assign_ip_on_cluster("c1").await.expect("assign");
        let ip = allocator.assign_ip_on_cluster("c2").await.expect("assign");

        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 1));
        assert_eq!(stored_ips(&config_maps, "c1").len(), 2);
        assert_eq!(stored_ips(&config_maps, "c2"), vec!["240.0.0.1"]);
    }

    #[tokio::test]
    async fn test_assignment_reuses_first_hole() {
        let config_maps = FakeObjectClient::with_objects(vec![record(
            "c1",
            r#"["240.0.0.1","","240.0.0.3"]"#,
        )]);
        let ip = allocator(config_maps.clone())
            .assign_ip_on_cluster("c1")
            .await
            .expect("assign");

        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 2));
        assert_eq!(
            stored_ips(&config_maps, "c1"),
            vec!["240.0.0.1", "240.0.0.2", "240.0.0.3"]
        );
    }

    /// Writes another cluster's allocation after every read, so the caller's
    /// next update carries a stale resourceVersion.
    struct RacingConfigMaps {
        inner: Arc<FakeObjectClient<ConfigMap>>,
        update_attempts: AtomicUsize,
    }

    #[async_trait]
    impl ObjectClient<ConfigMap> for RacingConfigMaps {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
            let current = self.inner.get(namespace, name).await?;
            if let Some(mut other) = current.clone() {
                other
                    .data
                    .get_or_insert_with(BTreeMap::new)
                    .insert("c9".into(), r#"["240.0.0.1"]"#.into());
                self.inner.update(&other).await?;
            }
            Ok(current)
        }

        async fn list(
            &self,
            namespace: Option<&str>,
            labels: &BTreeMap<String, String>,
        ) -> Result<Vec<ConfigMap>> {
            self.inner.list(namespace, labels).await
        }

        async fn create(&self, obj: &ConfigMap) -> Result<ConfigMap> {
            self.inner.create(obj).await
        }

        async fn update(&self, obj: &ConfigMap) -> Result<ConfigMap> {
            self.update_attempts.fetch_add(1, Ordering::SeqCst);
            self.inner.update(obj).await
        }

        async fn update_status(&self, obj: &ConfigMap) -> Result<ConfigMap> {
            self.inner.update_status(obj).await
        }
    }

    #[tokio::test]
    async fn test_assignment_surfaces_update_conflict() {
        let inner = FakeObjectClient::<ConfigMap>::new();
        inner
            .create(&record("c1", r#"["240.0.0.1"]"#))
            .await
            .expect("seed record");
        let racing = Arc::new(RacingConfigMaps {
            inner: inner.clone(),
            update_attempts: AtomicUsize::new(0),
        });

        let err = IpAllocator::new(racing.clone(), NS, subnet())
            .assign_ip_on_cluster("c2")
            .await
            .expect_err("stale write");

        assert!(matches!(err, Error::Other(msg) if msg.contains("conflict")));
        assert_eq!(racing.update_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(inner.updates(), 1);
        let data = inner
            .stored(NS, IP_RECORD_NAME)
            .and_then(|record| record.data)
            .expect("data");
        assert_eq!(data.get("c1").map(String::as_str), Some(r#"["240.0.0.1"]"#));
        assert_eq!(data.get("c9").map(String::as_str), Some(r#"["240.0.0.1"]"#));
        assert!(!data.contains_key("c2"));
    }

    #[tokio::test]
    async fn test_assignment_fails_on_malformed_record() {
        let config_maps = FakeObjectClient::with_objects(vec![record("c1", "not-json")]);
        let err = allocator(config_maps.clone())
            .assign_ip_on_cluster("c1")
            .await
            .expect_err("malformed record");

        assert!(matches!(err, Error::MalformedIpRecord { cluster, .. } if cluster == "c1"));
        assert_eq!(config_maps.updates(), 0);
    }

    #[tokio::test]
    async fn test_unassign_marks_hole() {
        let config_maps = FakeObjectClient::with_objects(vec![record(
            "c1",
            r#"["240.0.0.1","240.0.0.2","240.0.0.3"]"#,
        )]);
        allocator(config_maps.clone())
            .unassign_ip_on_cluster("c1", Ipv4Addr::new(240, 0, 0, 2))
            .await
            .expect("unassign");

        assert_eq!(
            stored_ips(&config_maps, "c1"),
            vec!["240.0.0.1", "", "240.0.0.3"]
        );
    }

    #[tokio::test]
    async fn test_released_ip_is_reassigned() {
        let config_maps = FakeObjectClient::new();
        let allocator = allocator(config_maps.clone());
        for _ in 0..3 {
            allocator.assign_ip_on_cluster("c1").await.expect("assign");
        }
        allocator
            .unassign_ip_on_cluster("c1", Ipv4Addr::new(240, 0, 0, 1))
            .await
            .expect("unassign");

        let ip = allocator.assign_ip_on_cluster("c1").await.expect("assign");
        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 1));
        assert_eq!(stored_ips(&config_maps, "c1").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unassign_gives_up_when_not_recorded() {
        let config_maps = FakeObjectClient::new();
        let started = tokio::time::Instant::now();
        let err = allocator(config_maps.clone())
            .unassign_ip_on_cluster("c1", Ipv4Addr::new(240, 0, 0, 1))
            .await
            .expect_err("nothing recorded");

        assert!(matches!(err, Error::IpNotRecordedYet(cluster) if cluster == "c1"));
        assert!(started.elapsed() >= Duration::from_millis(6300));
        assert_eq!(config_maps.gets(), 7);
        assert_eq!(config_maps.updates(), 0);
    }

    #[test]
    fn test_generate_new_ip_from_empty() {
        let (ip, ips) = generate_new_ip(&subnet(), "c1", None).expect("ip");
        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 1));
        assert_eq!(ips, r#"["240.0.0.1"]"#);

        let (ip, _) = generate_new_ip(&subnet(), "c1", Some("")).expect("ip");
        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 1));
    }

    #[test]
    fn test_generate_new_ip_leading_hole() {
        let (ip, ips) =
            generate_new_ip(&subnet(), "c1", Some(r#"["","240.0.0.2"]"#))
                .expect("ip");
        assert_eq!(ip, Ipv4Addr::new(240, 0, 0, 1));
        assert_eq!(ips, r#"["240.0.0.1","240.0.0.2"]"#);
    }

    #[test]
    fn test_generate_new_ip_rejects_invalid_address() {
        let err = generate_new_ip(&subnet(), "c1", Some(r#"["240.0.0.x"]"#))
            .expect_err("invalid address");
        assert!(matches!(err, Error::MalformedIpRecord { .. }));
    }

    #[test]
    fn test_increment_carries_across_octets() {
        let next = increment_ip(&subnet(), Ipv4Addr::new(240, 0, 0, 255))
            .expect("increment");
        assert_eq!(next, Ipv4Addr::new(240, 0, 1, 0));

        let next = increment_ip(&subnet(), Ipv4Addr::new(240, 255, 255, 255))
            .expect("increment");
        assert_eq!(next, Ipv4Addr::new(241, 0, 0, 0));
    }

    #[test]
    fn test_increment_detects_exhaustion() {
        let err = increment_ip(&subnet(), Ipv4Addr::new(255, 255, 255, 255))
            .expect_err("top of subnet");
        assert!(matches!(err, Error::NetworkExhausted(_)));

        let small: Ipv4Network = "10.0.0.0/30".parse().expect("network");
        assert_eq!(
            increment_ip(&small, Ipv4Addr::new(10, 0, 0, 2)).expect("in range"),
            Ipv4Addr::new(10, 0, 0, 3)
        );
        assert!(matches!(
            increment_ip(&small, Ipv4Addr::new(10, 0, 0, 3)),
            Err(Error::NetworkExhausted(net)) if net == small
        ));
    }

    #[tokio::test]
    async fn test_assignment_on_exhausted_network() {
        let config_maps = FakeObjectClient::new();
        let allocator =
            IpAllocator::new(config_maps.clone(), NS, "10.0.0.0/30".parse().expect("network"));
        for _ in 0..3 {
            allocator.assign_ip_on_cluster("c1").await.expect("assign");
        }
        let err = allocator
            .assign_ip_on_cluster("c1")
            .await
            .expect_err("exhausted");
        assert!(matches!(err, Error::NetworkExhausted(_)));
        assert_eq!(stored_ips(&config_maps, "c1").len(), 3);
    }
}
