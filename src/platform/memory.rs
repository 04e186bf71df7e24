//! In-memory [`ContainerPlatform`] for deterministic tests.
//!
//! Models the parts of a container runtime the conductor relies on:
//! network subnets that must not overlap, per-network endpoints with
//! sequentially assigned addresses, pinned addresses on reconnect, and
//! force-removal of containers. Failures can be injected per operation and
//! target, and subnets can be reserved to simulate pools claimed by another
//! process that do not show up in `list_networks`.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use parking_lot::Mutex;

use super::ContainerPlatform;
use super::ContainerSpec;
use super::PlatformError;
use crate::subnet::Subnet;

/// Operations that can be made to fail with [`InMemoryPlatform::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOp {
    /// `list_containers` / `list_networks`.
    List,
    /// `create_network`.
    CreateNetwork,
    /// `remove_network`.
    RemoveNetwork,
    /// `run_container`.
    RunContainer,
    /// `remove_container`.
    RemoveContainer,
    /// `connect`.
    Connect,
    /// `disconnect`.
    Disconnect,
    /// `container_ip`.
    Inspect,
    /// `container_logs`.
    Logs,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    endpoints: BTreeMap<String, Ipv4Addr>,
    logs: Vec<u8>,
}

#[derive(Debug, Clone)]
struct FakeNetwork {
    subnet: Subnet,
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeMap<String, FakeNetwork>,
    reserved: BTreeSet<Subnet>,
    images: BTreeSet<String>,
    failures: Vec<(FakeOp, String)>,
    create_network_attempts: usize,
    calls: Vec<String>,
}

impl State {
    fn take_failure(&mut self, op: FakeOp, target: &str) -> Result<(), PlatformError> {
        if let Some(pos) = self.failures.iter().position(|(o, t)| *o == op && (t.is_empty() || t == target)) {
            self.failures.remove(pos);
            return Err(PlatformError::CommandFailed {
                command: format!("{op:?} {target}"),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn network(&self, name: &str) -> Result<&FakeNetwork, PlatformError> {
        self.networks.get(name).ok_or_else(|| PlatformError::NotFound {
            kind: "network",
            name: name.to_string(),
        })
    }

    fn container_mut(&mut self, name: &str) -> Result<&mut FakeContainer, PlatformError> {
        self.containers.get_mut(name).ok_or_else(|| PlatformError::NotFound {
            kind: "container",
            name: name.to_string(),
        })
    }

    fn used_addresses(&self, network: &str) -> BTreeSet<Ipv4Addr> {
        self.containers.values().filter_map(|c| c.endpoints.get(network).copied()).collect()
    }
}

/// Deterministic in-process container platform.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

impl InMemoryPlatform {
    /// An empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network that was not created through the conductor.
    pub fn add_foreign_network(&self, name: &str, subnet: Subnet) {
        self.state.lock().networks.insert(name.to_string(), FakeNetwork { subnet });
    }

    /// Add a container that was not started through the conductor.
    pub fn add_foreign_container(&self, name: &str) {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: "foreign".to_string(),
            env: Vec::new(),
            ports: Vec::new(),
            auto_remove: false,
        };
        self.state.lock().containers.insert(
            name.to_string(),
            FakeContainer {
                spec,
                endpoints: BTreeMap::new(),
                logs: Vec::new(),
            },
        );
    }

    /// Claim a subnet invisibly: it is not listed anywhere but creating a
    /// network that overlaps it reports a conflict.
    pub fn reserve_subnet(&self, subnet: Subnet) {
        self.state.lock().reserved.insert(subnet);
    }

    /// Make the next matching call fail. An empty `target` matches any target.
    pub fn fail_next(&self, op: FakeOp, target: &str) {
        self.state.lock().failures.push((op, target.to_string()));
    }

    /// Set the log output returned for a container.
    pub fn set_logs(&self, container: &str, logs: &[u8]) {
        if let Some(c) = self.state.lock().containers.get_mut(container) {
            c.logs = logs.to_vec();
        }
    }

    /// Whether a container exists.
    pub fn has_container(&self, name: &str) -> bool {
        self.state.lock().containers.contains_key(name)
    }

    /// Whether a network exists.
    pub fn has_network(&self, name: &str) -> bool {
        self.state.lock().networks.contains_key(name)
    }

    /// The subnet of a network, if it exists.
    pub fn network_subnet(&self, name: &str) -> Option<Subnet> {
        self.state.lock().networks.get(name).map(|n| n.subnet)
    }

    /// Networks a container is attached to, in name order.
    pub fn container_networks(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(name)
            .map(|c| c.endpoints.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The spec a container was started with.
    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state.lock().containers.get(name).map(|c| c.spec.clone())
    }

    /// Whether an image with this tag has been built.
    pub fn has_image(&self, tag: &str) -> bool {
        self.state.lock().images.contains(tag)
    }

    /// Number of `create_network` calls made, successful or not.
    pub fn create_network_attempts(&self) -> usize {
        self.state.lock().create_network_attempts
    }

    /// Every mutating call in order, formatted as `op target`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }
}

impl ContainerPlatform for InMemoryPlatform {
    fn list_containers(&self) -> Result<Vec<String>, PlatformError> {
        let mut state = self.state.lock();
        state.take_failure(FakeOp::List, "")?;
        Ok(state.containers.keys().cloned().collect())
    }

    fn list_networks(&self) -> Result<Vec<String>, PlatformError> {
        let mut state = self.state.lock();
        state.take_failure(FakeOp::List, "")?;
        Ok(state.networks.keys().cloned().collect())
    }

    fn network_subnets(&self, network: &str) -> Result<Vec<Subnet>, PlatformError> {
        let state = self.state.lock();
        Ok(vec![state.network(network)?.subnet])
    }

    fn create_network(&self, network: &str, subnet: Subnet) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.create_network_attempts += 1;
        state.calls.push(format!("create_network {network} {subnet}"));
        state.take_failure(FakeOp::CreateNetwork, network)?;

        if state.networks.contains_key(network) {
            return Err(PlatformError::CommandFailed {
                command: format!("create_network {network}"),
                stderr: format!("network with name {network} already exists"),
            });
        }
        let claimed = state.networks.values().map(|n| n.subnet).chain(state.reserved.iter().copied());
        if claimed.into_iter().any(|s| s.overlaps(&subnet)) {
            return Err(PlatformError::SubnetConflict { subnet });
        }

        state.networks.insert(network.to_string(), FakeNetwork { subnet });
        Ok(())
    }

    fn remove_network(&self, network: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_network {network}"));
        state.take_failure(FakeOp::RemoveNetwork, network)?;
        state.network(network)?;

        if state.containers.values().any(|c| c.endpoints.contains_key(network)) {
            return Err(PlatformError::CommandFailed {
                command: format!("remove_network {network}"),
                stderr: format!("network {network} has active endpoints"),
            });
        }

        state.networks.remove(network);
        Ok(())
    }

    fn run_container(&self, spec: &ContainerSpec) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("run_container {}", spec.name));
        state.take_failure(FakeOp::RunContainer, &spec.name)?;

        if state.containers.contains_key(&spec.name) {
            return Err(PlatformError::CommandFailed {
                command: format!("run_container {}", spec.name),
                stderr: format!("container name {} is already in use", spec.name),
            });
        }

        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                endpoints: BTreeMap::new(),
                logs: Vec::new(),
            },
        );
        Ok(())
    }

    fn remove_container(&self, container: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_container {container}"));
        state.take_failure(FakeOp::RemoveContainer, container)?;
        state.container_mut(container)?;
        state.containers.remove(container);
        Ok(())
    }

    fn connect(&self, network: &str, container: &str, ipv4: Option<Ipv4Addr>) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("connect {network} {container}"));
        state.take_failure(FakeOp::Connect, container)?;

        let subnet = state.network(network)?.subnet;
        let used = state.used_addresses(network);
        let target = state.container_mut(container)?;

        if target.endpoints.contains_key(network) {
            return Err(PlatformError::CommandFailed {
                command: format!("connect {network} {container}"),
                stderr: format!("endpoint with name {container} already exists in network {network}"),
            });
        }

        let addr = match ipv4 {
            Some(ip) if !subnet.contains(ip) || used.contains(&ip) => {
                return Err(PlatformError::CommandFailed {
                    command: format!("connect --ip {ip} {network} {container}"),
                    stderr: format!("invalid or in-use address {ip} for {subnet}"),
                });
            }
            Some(ip) => ip,
            // .1 is the gateway
            None => (2..)
                .map_while(|n| subnet.host(n))
                .find(|ip| !used.contains(ip))
                .ok_or_else(|| PlatformError::CommandFailed {
                    command: format!("connect {network} {container}"),
                    stderr: format!("no available addresses in {subnet}"),
                })?,
        };

        target.endpoints.insert(network.to_string(), addr);
        Ok(())
    }

    fn disconnect(&self, network: &str, container: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("disconnect {network} {container}"));
        state.take_failure(FakeOp::Disconnect, container)?;
        state.network(network)?;

        let target = state.container_mut(container)?;
        if target.endpoints.remove(network).is_none() {
            return Err(PlatformError::CommandFailed {
                command: format!("disconnect {network} {container}"),
                stderr: format!("container {container} is not connected to network {network}"),
            });
        }
        Ok(())
    }

    fn container_ip(&self, container: &str, network: &str) -> Result<Ipv4Addr, PlatformError> {
        let mut state = self.state.lock();
        state.take_failure(FakeOp::Inspect, container)?;
        let target = state.container_mut(container)?;
        target.endpoints.get(network).copied().ok_or_else(|| PlatformError::NotFound {
            kind: "endpoint",
            name: format!("{container}@{network}"),
        })
    }

    fn container_logs(&self, container: &str) -> Result<Vec<u8>, PlatformError> {
        let mut state = self.state.lock();
        state.take_failure(FakeOp::Logs, container)?;
        Ok(state.container_mut(container)?.logs.clone())
    }

    fn build_image(&self, _context_dir: &Path, tag: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("build_image {tag}"));
        state.images.insert(tag.to_string());
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        state.calls.push(format!("remove_image {tag}"));
        if !state.images.remove(tag) {
            return Err(PlatformError::NotFound {
                kind: "image",
                name: tag.to_string(),
            });
        }
        Ok(())
    }

    fn prune_images(&self) -> Result<(), PlatformError> {
        self.state.lock().calls.push("prune_images".to_string());
        Ok(())
    }
}
