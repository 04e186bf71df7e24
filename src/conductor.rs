//! Cluster conductor.
//!
//! [`ClusterConductor`] owns every node of one test group and is the only way
//! to change them. It composes the network registry, node provisioner,
//! liveness waiter and topology mutator into cluster-level operations:
//! spawning a sharded cluster, partitioning it, killing and reviving nodes,
//! and sweeping every resource the group left behind.
//!
//! # Example
//!
//! ```no_run
//! use kvs_conductor::ClusterConductor;
//! use kvs_conductor::ConductorConfig;
//!
//! # fn main() -> Result<(), kvs_conductor::ConductorError> {
//! let config = ConductorConfig::for_group("basic", "kvstore-test");
//! let mut conductor = ClusterConductor::docker(config)?;
//! let mut cluster = conductor.session()?;
//!
//! let shards = cluster.spawn_cluster(4, Some(2))?;
//! assert_eq!(shards.len(), 2);
//! cluster.create_partition(&[0, 1], "p1")?;
//! cluster.create_partition(&[2, 3], "p2")?;
//! cluster.describe_cluster();
//! # Ok(())
//! # }
//! ```

use std::ops::Deref;
use std::ops::DerefMut;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::clock::Clock;
use crate::clock::Deadline;
use crate::clock::SystemClock;
use crate::config::ConductorConfig;
use crate::constants::HEALTH_REQUEST_TIMEOUT;
use crate::constants::MAX_CLUSTER_NODES;
use crate::error::ConductorError;
use crate::error::ConfigSnafu;
use crate::error::HttpClientSnafu;
use crate::error::IoSnafu;
use crate::error::PlatformSnafu;
use crate::error::Result;
use crate::liveness::HealthProbe;
use crate::liveness::HttpHealthProbe;
use crate::liveness::LivenessWaiter;
use crate::mutator::TopologyMutator;
use crate::naming::CleanupScope;
use crate::naming::Naming;
use crate::naming::PartitionId;
use crate::network::NetworkHandle;
use crate::network::NetworkRegistry;
use crate::node::NodeProvisioner;
use crate::platform::ContainerPlatform;
use crate::platform::DockerCli;
use crate::subnet::SubnetAllocator;
use crate::topology::ClusterNode;
use crate::topology::ShardGroup;
use crate::topology::ShardMap;
use crate::topology::TopologyReport;

/// What a cleanup sweep removed and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Containers force-removed.
    pub removed_containers: Vec<String>,
    /// Networks removed.
    pub removed_networks: Vec<String>,
    /// Resources whose removal failed.
    pub failed: Vec<String>,
}

impl CleanupReport {
    /// Whether every matching resource was removed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn leftover resources into [`ConductorError::CleanupPartial`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(ConductorError::CleanupPartial { failed: self.failed })
        }
    }
}

/// Orchestrates one group of node containers and their networks.
pub struct ClusterConductor {
    config: ConductorConfig,
    naming: Naming,
    platform: Arc<dyn ContainerPlatform>,
    registry: NetworkRegistry,
    provisioner: NodeProvisioner,
    liveness: LivenessWaiter,
    mutator: TopologyMutator,
    nodes: Vec<ClusterNode>,
    base_network: Option<NetworkHandle>,
    next_index: usize,
}

impl std::fmt::Debug for ClusterConductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConductor")
            .field("group", &self.naming.group())
            .field("nodes", &self.nodes)
            .field("base_network", &self.base_network)
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

impl ClusterConductor {
    /// Create a conductor over explicit platform, probe and clock.
    ///
    /// The configuration is validated; nothing is created on the platform
    /// until [`start`](Self::start) or the first spawn.
    pub fn new(
        config: ConductorConfig,
        platform: Arc<dyn ContainerPlatform>,
        probe: Arc<dyn HealthProbe>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;
        let naming = Naming::new(&config.name_prefix, &config.group_id)?;

        let registry = NetworkRegistry::new(platform.clone(), SubnetAllocator::new(config.max_subnet_attempts));
        let provisioner = NodeProvisioner::new(
            platform.clone(),
            naming.clone(),
            config.base_image.clone(),
            config.service_port,
            config.external_port_base,
        );
        let liveness = LivenessWaiter::new(probe, clock, config.poll_interval());
        let mutator = TopologyMutator::new(platform.clone());

        Ok(Self {
            config,
            naming,
            platform,
            registry,
            provisioner,
            liveness,
            mutator,
            nodes: Vec::new(),
            base_network: None,
            next_index: 0,
        })
    }

    /// Conductor backed by the docker CLI, HTTP health checks and wall time.
    pub fn docker(config: ConductorConfig) -> Result<Self> {
        let platform = Arc::new(DockerCli::new(config.docker_binary.clone()));
        let probe = Arc::new(HttpHealthProbe::new(HEALTH_REQUEST_TIMEOUT).context(HttpClientSnafu)?);
        Self::new(config, platform, probe, Arc::new(SystemClock))
    }

    /// Ensure the group's base network exists.
    pub fn start(&mut self) -> Result<NetworkHandle> {
        if let Some(base) = &self.base_network {
            return Ok(base.clone());
        }

        let name = self.naming.base_network_name();
        info!(group = self.naming.group(), network = %name, "starting conductor");
        let handle = self.registry.ensure_network(&name)?;
        self.base_network = Some(handle.clone());
        Ok(handle)
    }

    /// Start and return a guard that destroys the cluster when dropped.
    pub fn session(&mut self) -> Result<ClusterSession<'_>> {
        self.start()?;
        Ok(ClusterSession { conductor: self })
    }

    /// Provision the next node on the base network.
    ///
    /// Does not wait for the node to come online. The ordinal is consumed
    /// even if provisioning fails.
    pub fn spawn_node(&mut self) -> Result<&ClusterNode> {
        let base = self.start()?;
        let index = self.next_index;
        if index >= MAX_CLUSTER_NODES {
            return Err(ConductorError::InvalidShardLayout {
                reason: format!("cluster already has {MAX_CLUSTER_NODES} nodes"),
            });
        }
        self.next_index += 1;

        let node = self.provisioner.spawn_node(index, &base)?;
        self.nodes.push(node);
        self.nodes.last().ok_or(ConductorError::UnknownNode { index })
    }

    /// Spawn `node_count` nodes and group them into shards of `nodes_per_shard`.
    ///
    /// `None` puts every node in one shard. Nodes are waited on in index
    /// order against one deadline for the whole cluster.
    pub fn spawn_cluster(&mut self, node_count: usize, nodes_per_shard: Option<usize>) -> Result<ShardMap> {
        info!(node_count, ?nodes_per_shard, "spawning cluster");
        let planned: Vec<usize> = self.planned_indices(node_count)?.collect();
        ShardMap::uniform(&planned, nodes_per_shard)?;

        let spawned = self.spawn_and_wait(node_count)?;
        ShardMap::uniform(&spawned, nodes_per_shard)
    }

    /// Spawn one shard per entry of `shard_sizes`, each with that many nodes.
    pub fn spawn_cluster_with_shard_sizes(&mut self, shard_sizes: &[usize]) -> Result<ShardMap> {
        let node_count = shard_sizes
            .iter()
            .try_fold(0usize, |total, &size| total.checked_add(size))
            .ok_or_else(|| ConductorError::InvalidShardLayout {
                reason: format!("shard sizes {shard_sizes:?} overflow the node count"),
            })?;
        info!(shards = shard_sizes.len(), node_count, "spawning cluster");
        let planned: Vec<usize> = self.planned_indices(node_count)?.collect();
        ShardMap::from_sizes(&planned, shard_sizes)?;

        let spawned = self.spawn_and_wait(node_count)?;
        ShardMap::from_sizes(&spawned, shard_sizes)
    }

    /// Ordinals the next `node_count` spawns would get, within the node cap.
    fn planned_indices(&self, node_count: usize) -> Result<std::ops::Range<usize>> {
        match self.next_index.checked_add(node_count) {
            Some(end) if end <= MAX_CLUSTER_NODES => Ok(self.next_index..end),
            _ => Err(ConductorError::InvalidShardLayout {
                reason: format!(
                    "{node_count} more nodes would exceed the limit of {MAX_CLUSTER_NODES} (next index {})",
                    self.next_index
                ),
            }),
        }
    }

    fn spawn_and_wait(&mut self, node_count: usize) -> Result<Vec<usize>> {
        self.planned_indices(node_count)?;

        let mut spawned = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            spawned.push(self.spawn_node()?.index);
        }

        info!(count = spawned.len(), "waiting for nodes to come online");
        let deadline = Deadline::after(self.liveness.clock(), self.config.online_timeout());
        for &index in &spawned {
            let node = self.node(index).ok_or(ConductorError::UnknownNode { index })?;
            self.liveness.wait_online_until(node, deadline)?;
        }
        info!("all nodes online");

        Ok(spawned)
    }

    /// Wait for one node to answer its health endpoint.
    pub fn wait_online(&self, index: usize, timeout: Duration) -> Result<()> {
        let node = self.node(index).ok_or(ConductorError::UnknownNode { index })?;
        self.liveness.wait_online(node, timeout)
    }

    /// Move the given nodes onto partition network `partition_id`.
    ///
    /// Nodes not listed are untouched. Calling again with the same id and a
    /// larger set of nodes heals the partition.
    pub fn create_partition(&mut self, indices: &[usize], partition_id: &str) -> Result<NetworkHandle> {
        if let Some(&index) = indices.iter().find(|i| self.node(**i).is_none()) {
            return Err(ConductorError::UnknownNode { index });
        }
        let id = PartitionId::new(partition_id)?;
        let name = self.naming.partition_network_name(&id);

        info!(partition = %id, nodes = ?indices, "creating partition");
        let network = self.registry.ensure_network(&name)?;

        let mut members: Vec<&mut ClusterNode> =
            self.nodes.iter_mut().filter(|n| indices.contains(&n.index)).collect();
        self.mutator.create_partition(&mut members, &network)?;

        Ok(network)
    }

    /// Detach node `index` from `network`.
    pub fn kill_node(&mut self, index: usize, network: &NetworkHandle) -> Result<()> {
        info!(index, network = %network.name, "simulating node kill");
        let node = self.nodes.iter_mut().find(|n| n.index == index).ok_or(ConductorError::UnknownNode { index })?;
        self.mutator.kill_node(node, network)
    }

    /// Reattach node `index` to `network`, keeping its address when possible.
    pub fn revive_node(&mut self, index: usize, network: &NetworkHandle) -> Result<()> {
        info!(index, network = %network.name, "simulating node revive");
        let network = match self.registry.known_subnet(&network.name) {
            Some(subnet) => NetworkHandle {
                name: network.name.clone(),
                subnet,
            },
            None => network.clone(),
        };
        let node = self.nodes.iter_mut().find(|n| n.index == index).ok_or(ConductorError::UnknownNode { index })?;
        self.mutator.revive_node(node, &network)
    }

    /// Remove every resource of this group and forget all nodes.
    ///
    /// Safe to call repeatedly. Ordinals start from zero again afterwards.
    pub fn destroy_cluster(&mut self) -> Result<CleanupReport> {
        info!(group = self.naming.group(), nodes = self.nodes.len(), "destroying cluster");
        let report = self.cleanup_hanging(CleanupScope::Group)?;

        self.nodes.clear();
        self.base_network = None;
        self.registry.forget_all();
        self.next_index = 0;

        Ok(report)
    }

    /// Best-effort sweep of containers and networks matching `scope`.
    ///
    /// Containers go first so networks have no endpoints left. Individual
    /// removal failures are logged and recorded in the report; only a failure
    /// to list resources is returned as an error.
    pub fn cleanup_hanging(&mut self, scope: CleanupScope) -> Result<CleanupReport> {
        let patterns = self.naming.sweep(scope);
        let mut report = CleanupReport::default();

        let containers = self.platform.list_containers().context(PlatformSnafu {
            operation: "list containers",
        })?;
        for container in containers.into_iter().filter(|c| patterns.matches_container(c)) {
            info!(container = %container, "removing container");
            match self.platform.remove_container(&container) {
                Ok(()) => report.removed_containers.push(container),
                Err(e) if e.is_not_found() => {
                    debug!(container = %container, "container already gone");
                }
                Err(e) => {
                    warn!(container = %container, error = %e, "failed to remove container");
                    report.failed.push(container);
                }
            }
        }

        let networks = self.registry.list_networks()?;
        for network in networks.into_iter().filter(|n| patterns.matches_network(n)) {
            match self.registry.remove_network_if_exists(&network) {
                Ok(true) => report.removed_networks.push(network),
                Ok(false) => {}
                Err(e) => {
                    warn!(network = %network, error = %e, "failed to remove network");
                    report.failed.push(network);
                }
            }
        }

        if !report.is_complete() {
            warn!(failed = ?report.failed, "cleanup left resources behind");
        }
        Ok(report)
    }

    /// Snapshot of nodes and partition membership, also logged.
    pub fn describe_cluster(&self) -> TopologyReport {
        let naming = &self.naming;
        let report = TopologyReport::build(naming.group(), &self.nodes, |n| naming.network_label(n).to_string());
        for line in report.to_string().lines() {
            info!("{line}");
        }
        report
    }

    /// Write each node's container logs to `<dir>/<node name>`.
    pub fn dump_logs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).context(IoSnafu { path: dir })?;

        let mut written = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let logs = self.platform.container_logs(&node.name).context(PlatformSnafu {
                operation: format!("read logs of {}", node.name),
            })?;
            let path = dir.join(&node.name);
            std::fs::write(&path, logs).context(IoSnafu { path: &path })?;
            debug!(node = %node.name, path = %path.display(), "dumped logs");
            written.push(path);
        }
        Ok(written)
    }

    /// Every live node, in index order.
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// The node with ordinal `index`.
    pub fn node(&self, index: usize) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.index == index)
    }

    /// Nodes belonging to one shard.
    pub fn nodes_in(&self, shard: &ShardGroup) -> Vec<&ClusterNode> {
        shard.nodes.iter().filter_map(|&i| self.node(i)).collect()
    }

    /// The base network, once started.
    pub fn base_network(&self) -> Option<&NetworkHandle> {
        self.base_network.as_ref()
    }

    /// Names this conductor generates.
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// The validated configuration.
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }
}

/// Scoped access to a started conductor.
///
/// Dropping the session destroys the cluster; failures are logged.
pub struct ClusterSession<'a> {
    conductor: &'a mut ClusterConductor,
}

impl Deref for ClusterSession<'_> {
    type Target = ClusterConductor;

    fn deref(&self) -> &Self::Target {
        self.conductor
    }
}

impl DerefMut for ClusterSession<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conductor
    }
}

impl Drop for ClusterSession<'_> {
    fn drop(&mut self) {
        match self.conductor.destroy_cluster() {
            Ok(report) if report.is_complete() => {}
            Ok(report) => warn!(failed = ?report.failed, "session teardown left resources behind"),
            Err(e) => warn!(error = %e, "session teardown failed"),
        }
    }
}
