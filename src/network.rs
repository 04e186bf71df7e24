//! Virtual network registry.
//!
//! Creates, finds and removes named networks. Queries always go to the
//! platform; the only local state is the record of which subnet each network
//! this conductor touched was observed on, used to decide whether an address
//! can be pinned when a node rejoins a network.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ConductorError;
use crate::error::PlatformSnafu;
use crate::error::Result;
use crate::platform::ContainerPlatform;
use crate::subnet::Subnet;
use crate::subnet::SubnetAllocator;

/// A network and the subnet it occupies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkHandle {
    /// Platform network name.
    pub name: String,
    /// The network's address range.
    pub subnet: Subnet,
}

/// Named network lifecycle on top of a [`ContainerPlatform`].
pub struct NetworkRegistry {
    platform: Arc<dyn ContainerPlatform>,
    allocator: SubnetAllocator,
    subnets: BTreeMap<String, Subnet>,
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("allocator", &self.allocator)
            .field("subnets", &self.subnets)
            .finish_non_exhaustive()
    }
}

impl NetworkRegistry {
    /// Create a registry using `allocator` for new networks.
    pub fn new(platform: Arc<dyn ContainerPlatform>, allocator: SubnetAllocator) -> Self {
        Self {
            platform,
            allocator,
            subnets: BTreeMap::new(),
        }
    }

    /// Return the named network, creating it on a free subnet if missing.
    ///
    /// Idempotent: an existing network is returned with the subnet it
    /// already has.
    pub fn ensure_network(&mut self, name: &str) -> Result<NetworkHandle> {
        match self.platform.network_subnets(name) {
            Ok(subnets) => {
                let subnet = subnets.first().copied().ok_or_else(|| ConductorError::Platform {
                    operation: format!("inspect network {name}"),
                    source: crate::platform::PlatformError::UnexpectedOutput {
                        what: format!("subnets of {name}"),
                        detail: "network has no IPv4 subnet".to_string(),
                    },
                })?;
                info!(network = name, subnet = %subnet, "network already exists");
                self.subnets.insert(name.to_string(), subnet);
                return Ok(NetworkHandle {
                    name: name.to_string(),
                    subnet,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(ConductorError::Platform {
                    operation: format!("inspect network {name}"),
                    source,
                });
            }
        }

        info!(network = name, "creating network");
        let mut in_use = self.live_subnets()?;
        let subnet = self.allocator.allocate(self.platform.as_ref(), name, &mut in_use)?;
        self.subnets.insert(name.to_string(), subnet);

        Ok(NetworkHandle {
            name: name.to_string(),
            subnet,
        })
    }

    /// Remove a network, failing if it does not exist.
    pub fn remove_network(&mut self, name: &str) -> Result<()> {
        info!(network = name, "removing network");
        self.platform.remove_network(name).context(PlatformSnafu {
            operation: format!("remove network {name}"),
        })?;
        self.subnets.remove(name);
        Ok(())
    }

    /// Remove a network if present. Returns whether anything was removed.
    pub fn remove_network_if_exists(&mut self, name: &str) -> Result<bool> {
        match self.platform.remove_network(name) {
            Ok(()) => {
                info!(network = name, "removed network");
                self.subnets.remove(name);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(network = name, "network already gone");
                self.subnets.remove(name);
                Ok(false)
            }
            Err(source) => Err(ConductorError::Platform {
                operation: format!("remove network {name}"),
                source,
            }),
        }
    }

    /// Names of every network on the platform.
    pub fn list_networks(&self) -> Result<Vec<String>> {
        self.platform.list_networks().context(PlatformSnafu {
            operation: "list networks",
        })
    }

    /// Subnets of a network, read from the platform.
    pub fn list_subnets_of(&self, name: &str) -> Result<Vec<Subnet>> {
        self.platform.network_subnets(name).context(PlatformSnafu {
            operation: format!("inspect network {name}"),
        })
    }

    /// The subnet this registry last observed for a network.
    pub fn known_subnet(&self, name: &str) -> Option<Subnet> {
        self.subnets.get(name).copied()
    }

    /// Drop all local subnet records.
    pub fn forget_all(&mut self) {
        self.subnets.clear();
    }

    /// Every subnet currently claimed on the platform.
    ///
    /// Networks that disappear between listing and inspection are skipped.
    fn live_subnets(&self) -> Result<BTreeSet<Subnet>> {
        let mut in_use = BTreeSet::new();
        for network in self.list_networks()? {
            match self.platform.network_subnets(&network) {
                Ok(subnets) => in_use.extend(subnets),
                Err(e) if e.is_not_found() => {
                    debug!(network = %network, "network vanished while collecting subnets");
                }
                Err(e) => {
                    warn!(network = %network, error = %e, "error getting network info");
                    return Err(ConductorError::Platform {
                        operation: format!("inspect network {network}"),
                        source: e,
                    });
                }
            }
        }
        Ok(in_use)
    }
}
