//! Topology model: nodes, shard groupings and topology reports.
//!
//! The conductor owns every [`ClusterNode`]; callers see them through shared
//! borrows or clones and change them only via conductor operations.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConductorError;
use crate::error::Result;

/// What HTTP clients need to reach a node.
pub trait NodeEndpoint {
    /// Container name.
    fn name(&self) -> &str;

    /// Ordinal index assigned at spawn.
    fn index(&self) -> usize;

    /// Base URL reachable from the host (published port).
    fn external_url(&self) -> String;

    /// Base URL reachable from other nodes on the current network.
    fn internal_url(&self) -> String;
}

/// One running node of the system under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Container name, `<prefix>_<group>_node_<index>`.
    pub name: String,
    /// Ordinal index, unique within a run.
    pub index: usize,
    /// Address on the node's current primary network.
    pub address: Ipv4Addr,
    /// Port the process listens on inside the container.
    pub service_port: u16,
    /// Host port forwarded to `service_port`.
    pub external_port: u16,
    /// Networks the container is attached to, without duplicates.
    pub networks: Vec<String>,
}

impl ClusterNode {
    /// `http://<address>:<service_port>`.
    pub fn internal_endpoint(&self) -> String {
        format!("http://{}:{}", self.address, self.service_port)
    }

    /// `http://localhost:<external_port>`.
    pub fn external_endpoint(&self) -> String {
        format!("http://localhost:{}", self.external_port)
    }

    /// Whether the node is attached to `network`.
    pub fn is_member(&self, network: &str) -> bool {
        self.networks.iter().any(|n| n == network)
    }

    /// Whether the node has been cut off from every network.
    pub fn is_isolated(&self) -> bool {
        self.networks.is_empty()
    }
}

impl NodeEndpoint for ClusterNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self) -> usize {
        self.index
    }

    fn external_url(&self) -> String {
        self.external_endpoint()
    }

    fn internal_url(&self) -> String {
        self.internal_endpoint()
    }
}

/// Shard identifier, displayed as `shard<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub usize);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard{}", self.0)
    }
}

/// One shard and the indices of its nodes, in spawn order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardGroup {
    /// The shard.
    pub id: ShardId,
    /// Node indices belonging to it.
    pub nodes: Vec<usize>,
}

/// Assignment of nodes to shards.
///
/// Only built through [`ShardMap::uniform`] and [`ShardMap::from_sizes`];
/// shard ids are dense from `shard0` and every node belongs to one shard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardMap {
    groups: Vec<ShardGroup>,
}

impl ShardMap {
    /// Split `nodes` into contiguous shards of `per_shard` nodes.
    ///
    /// `per_shard` of `None` puts every node in a single shard. The last
    /// shard is smaller when `nodes.len()` is not a multiple of `per_shard`.
    pub fn uniform(nodes: &[usize], per_shard: Option<usize>) -> Result<Self> {
        let per_shard = match per_shard {
            Some(0) => {
                return Err(ConductorError::InvalidShardLayout {
                    reason: "nodes per shard must be at least 1".to_string(),
                });
            }
            Some(n) => n,
            None => nodes.len().max(1),
        };

        let groups = nodes
            .chunks(per_shard)
            .enumerate()
            .map(|(i, chunk)| ShardGroup {
                id: ShardId(i),
                nodes: chunk.to_vec(),
            })
            .collect();
        Ok(Self { groups })
    }

    /// Split `nodes` into consecutive shards with the given sizes.
    pub fn from_sizes(nodes: &[usize], sizes: &[usize]) -> Result<Self> {
        if sizes.contains(&0) {
            return Err(ConductorError::InvalidShardLayout {
                reason: format!("shard sizes {sizes:?} contain an empty shard"),
            });
        }
        let total: usize = sizes.iter().sum();
        if total != nodes.len() {
            return Err(ConductorError::InvalidShardLayout {
                reason: format!("shard sizes sum to {total} but there are {} nodes", nodes.len()),
            });
        }

        let mut rest = nodes;
        let mut groups = Vec::with_capacity(sizes.len());
        for (i, &size) in sizes.iter().enumerate() {
            let (head, tail) = rest.split_at(size);
            groups.push(ShardGroup {
                id: ShardId(i),
                nodes: head.to_vec(),
            });
            rest = tail;
        }
        Ok(Self { groups })
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no shards.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Look up a shard.
    pub fn get(&self, id: ShardId) -> Option<&ShardGroup> {
        self.groups.get(id.0)
    }

    /// Shards in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ShardGroup> {
        self.groups.iter()
    }

    /// The shard a node belongs to.
    pub fn shard_of(&self, node: usize) -> Option<ShardId> {
        self.groups.iter().find(|g| g.nodes.contains(&node)).map(|g| g.id)
    }
}

/// One node in a [`TopologyReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Container name.
    pub name: String,
    /// Ordinal index.
    pub index: usize,
    /// `address:service_port` on the primary network.
    pub internal: String,
    /// `localhost:external_port`.
    pub external: String,
}

/// Snapshot of nodes and which partitions they sit in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyReport {
    /// Test group.
    pub group: String,
    /// Every node, in index order.
    pub nodes: Vec<NodeReport>,
    /// Partition label (`base`, `p1`, ...) to member node indices.
    pub partitions: BTreeMap<String, Vec<usize>>,
}

impl TopologyReport {
    /// Build a report, labelling networks with `label`.
    pub fn build<'a>(
        group: &str,
        nodes: impl IntoIterator<Item = &'a ClusterNode>,
        label: impl Fn(&str) -> String,
    ) -> Self {
        let mut report = Self {
            group: group.to_string(),
            nodes: Vec::new(),
            partitions: BTreeMap::new(),
        };

        for node in nodes {
            report.nodes.push(NodeReport {
                name: node.name.clone(),
                index: node.index,
                internal: format!("{}:{}", node.address, node.service_port),
                external: format!("localhost:{}", node.external_port),
            });
            for network in &node.networks {
                report.partitions.entry(label(network)).or_default().push(node.index);
            }
        }

        report
    }
}

impl fmt::Display for TopologyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TOPOLOGY: group {}", self.group)?;
        writeln!(f, "nodes:")?;
        for node in &self.nodes {
            writeln!(f, "  {}: {} <-> {}", node.name, node.internal, node.external)?;
        }
        writeln!(f, "partitions:")?;
        for (label, members) in &self.partitions {
            writeln!(f, "  {label}: {members:?}")?;
        }
        Ok(())
    }
}
