//! Node provisioning.
//!
//! A node is one container running the system under test, published on
//! `external_port_base + index` and told its ordinal through
//! `NODE_IDENTIFIER`. Name and port are pure functions of the naming scheme,
//! the index and the port base.

use std::sync::Arc;

use snafu::ResultExt;
use tracing::info;

use crate::constants::NODE_IDENTIFIER_ENV;
use crate::error::PlatformSnafu;
use crate::error::Result;
use crate::naming::Naming;
use crate::network::NetworkHandle;
use crate::platform::ContainerPlatform;
use crate::platform::ContainerSpec;
use crate::topology::ClusterNode;

/// Starts node containers and attaches them to their first network.
pub struct NodeProvisioner {
    platform: Arc<dyn ContainerPlatform>,
    naming: Naming,
    image: String,
    service_port: u16,
    external_port_base: u16,
}

impl std::fmt::Debug for NodeProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeProvisioner")
            .field("image", &self.image)
            .field("service_port", &self.service_port)
            .field("external_port_base", &self.external_port_base)
            .finish_non_exhaustive()
    }
}

impl NodeProvisioner {
    /// Provisioner for nodes of `image`.
    pub fn new(
        platform: Arc<dyn ContainerPlatform>,
        naming: Naming,
        image: impl Into<String>,
        service_port: u16,
        external_port_base: u16,
    ) -> Self {
        Self {
            platform,
            naming,
            image: image.into(),
            service_port,
            external_port_base,
        }
    }

    /// Host port for the node with ordinal `index`.
    ///
    /// Saturates at `u16::MAX`; configuration validation keeps real clusters
    /// well below that.
    pub fn external_port(&self, index: usize) -> u16 {
        let index = u16::try_from(index).unwrap_or(u16::MAX);
        self.external_port_base.saturating_add(index)
    }

    /// The container spec for node `index`.
    pub fn container_spec(&self, index: usize) -> ContainerSpec {
        ContainerSpec {
            name: self.naming.container_name(index),
            image: self.image.clone(),
            env: vec![(NODE_IDENTIFIER_ENV.to_string(), index.to_string())],
            ports: vec![(self.external_port(index), self.service_port)],
            auto_remove: true,
        }
    }

    /// Start node `index` and attach it to `network`.
    ///
    /// If attaching or address lookup fails the container keeps running but
    /// no [`ClusterNode`] is returned; a group sweep removes it.
    pub fn spawn_node(&self, index: usize, network: &NetworkHandle) -> Result<ClusterNode> {
        let spec = self.container_spec(index);
        let name = spec.name.clone();
        let external_port = self.external_port(index);

        info!(node = %name, external_port, "starting container");
        self.platform.run_container(&spec).context(PlatformSnafu {
            operation: format!("start container {name}"),
        })?;

        info!(node = %name, network = %network.name, "attaching container to base network");
        self.platform.connect(&network.name, &name, None).context(PlatformSnafu {
            operation: format!("attach {name} to {}", network.name),
        })?;

        let address = self.platform.container_ip(&name, &network.name).context(PlatformSnafu {
            operation: format!("inspect container {name}"),
        })?;

        info!(node = %name, base_net_ip = %address, "container spawned");

        Ok(ClusterNode {
            name,
            index,
            address,
            service_port: self.service_port,
            external_port,
            networks: vec![network.name.clone()],
        })
    }
}
