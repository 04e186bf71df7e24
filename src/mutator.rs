//! Topology mutation: partitions, heals, kill and revive.
//!
//! Every operation changes platform network membership and then brings the
//! [`ClusterNode`] model back in line with it. Membership is updated after
//! each successful platform call, so a failure part way through leaves the
//! model describing what actually happened up to that point.

use std::sync::Arc;

use snafu::ResultExt;
use tracing::debug;
use tracing::info;

use crate::error::MutationOp;
use crate::error::Result;
use crate::error::TopologyMutationFailedSnafu;
use crate::network::NetworkHandle;
use crate::platform::ContainerPlatform;
use crate::topology::ClusterNode;

/// Moves nodes between networks.
pub struct TopologyMutator {
    platform: Arc<dyn ContainerPlatform>,
}

impl std::fmt::Debug for TopologyMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyMutator").finish_non_exhaustive()
    }
}

impl TopologyMutator {
    /// Mutator issuing calls against `platform`.
    pub fn new(platform: Arc<dyn ContainerPlatform>) -> Self {
        Self { platform }
    }

    /// Put `nodes` on `network` and nothing else.
    ///
    /// All detaches run before any attach, so members of a partition never
    /// briefly share a network with nodes that are leaving. Nodes already on
    /// `network` keep their endpoint; calling again with a larger set heals.
    pub fn create_partition(&self, nodes: &mut [&mut ClusterNode], network: &NetworkHandle) -> Result<()> {
        for node in nodes.iter_mut() {
            let others: Vec<String> = node.networks.iter().filter(|n| **n != network.name).cloned().collect();
            for other in others {
                self.detach(node, &other)?;
            }
        }

        for node in nodes.iter_mut() {
            if node.is_member(&network.name) {
                debug!(node = %node.name, network = %network.name, "already on partition network");
                node.address = self.inspect(node, &network.name)?;
                continue;
            }
            self.attach(node, &network.name, None)?;
            info!(node = %node.name, network = %network.name, address = %node.address, "node joined partition");
        }

        Ok(())
    }

    /// Detach `node` from `network` only.
    pub fn kill_node(&self, node: &mut ClusterNode, network: &NetworkHandle) -> Result<()> {
        self.detach(node, &network.name)?;

        if let Some(first) = node.networks.first().cloned() {
            node.address = self.inspect(node, &first)?;
        }

        info!(node = %node.name, network = %network.name, remaining = ?node.networks, "node killed");
        Ok(())
    }

    /// Reattach `node` to `network`.
    ///
    /// The last known address is requested again when it lies in the
    /// network's subnet. A node that is already a member is left alone.
    pub fn revive_node(&self, node: &mut ClusterNode, network: &NetworkHandle) -> Result<()> {
        if node.is_member(&network.name) {
            info!(node = %node.name, network = %network.name, "node already on network, nothing to revive");
            return Ok(());
        }

        let pinned = network.subnet.contains(node.address).then_some(node.address);
        self.attach(node, &network.name, pinned)?;

        info!(node = %node.name, network = %network.name, address = %node.address, "node revived");
        Ok(())
    }

    fn detach(&self, node: &mut ClusterNode, network: &str) -> Result<()> {
        debug!(node = %node.name, network, "disconnecting");
        self.platform.disconnect(network, &node.name).context(TopologyMutationFailedSnafu {
            node: node.name.clone(),
            network,
            operation: MutationOp::Disconnect,
        })?;
        node.networks.retain(|n| n != network);
        Ok(())
    }

    fn attach(&self, node: &mut ClusterNode, network: &str, pinned: Option<std::net::Ipv4Addr>) -> Result<()> {
        debug!(node = %node.name, network, ?pinned, "connecting");
        self.platform.connect(network, &node.name, pinned).context(TopologyMutationFailedSnafu {
            node: node.name.clone(),
            network,
            operation: MutationOp::Connect,
        })?;
        node.networks.push(network.to_string());
        node.address = self.inspect(node, network)?;
        Ok(())
    }

    fn inspect(&self, node: &ClusterNode, network: &str) -> Result<std::net::Ipv4Addr> {
        self.platform.container_ip(&node.name, network).context(TopologyMutationFailedSnafu {
            node: node.name.clone(),
            network,
            operation: MutationOp::Inspect,
        })
    }
}
