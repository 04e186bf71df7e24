//! Container platform abstraction.
//!
//! The conductor only talks to containers and networks through
//! [`ContainerPlatform`]. Production code uses [`DockerCli`], which shells out
//! to the `docker` binary; tests use [`InMemoryPlatform`], a deterministic
//! model of the same semantics (subnet conflicts, endpoint bookkeeping,
//! address assignment) with failure injection.
//!
//! # Tiger Style
//!
//! - Every call is synchronous and returns an explicit error
//! - Subnet conflicts are a distinct error variant, never string-matched by callers
//! - Missing resources are reported as `NotFound` so sweep paths can tolerate them

pub mod docker;
pub mod memory;

use std::net::Ipv4Addr;
use std::path::Path;

use snafu::Snafu;

pub use docker::DockerCli;
pub use memory::InMemoryPlatform;

use crate::subnet::Subnet;

/// Everything needed to start one node container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image to run.
    pub image: String,
    /// Environment variables passed to the process.
    pub env: Vec<(String, String)>,
    /// Published ports as `(host_port, container_port)`.
    pub ports: Vec<(u16, u16)>,
    /// Remove the container automatically when it stops.
    pub auto_remove: bool,
}

/// Operations the conductor needs from a container runtime.
pub trait ContainerPlatform: Send + Sync {
    /// Names of all containers, running or not.
    fn list_containers(&self) -> Result<Vec<String>, PlatformError>;

    /// Names of all networks.
    fn list_networks(&self) -> Result<Vec<String>, PlatformError>;

    /// IPv4 subnets configured on a network.
    ///
    /// Returns `NotFound` if the network does not exist.
    fn network_subnets(&self, network: &str) -> Result<Vec<Subnet>, PlatformError>;

    /// Create a network on the given subnet.
    ///
    /// Returns `SubnetConflict` if the subnet overlaps one already claimed.
    fn create_network(&self, network: &str, subnet: Subnet) -> Result<(), PlatformError>;

    /// Remove a network. Returns `NotFound` if it does not exist.
    fn remove_network(&self, network: &str) -> Result<(), PlatformError>;

    /// Start a detached container.
    fn run_container(&self, spec: &ContainerSpec) -> Result<(), PlatformError>;

    /// Force-remove a container. Returns `NotFound` if it does not exist.
    fn remove_container(&self, container: &str) -> Result<(), PlatformError>;

    /// Attach a container to a network, optionally pinning its address.
    fn connect(&self, network: &str, container: &str, ipv4: Option<Ipv4Addr>) -> Result<(), PlatformError>;

    /// Detach a container from a network.
    fn disconnect(&self, network: &str, container: &str) -> Result<(), PlatformError>;

    /// The container's address on a network it is attached to.
    fn container_ip(&self, container: &str, network: &str) -> Result<Ipv4Addr, PlatformError>;

    /// Combined stdout and stderr of a container.
    fn container_logs(&self, container: &str) -> Result<Vec<u8>, PlatformError>;

    /// Build an image from a directory containing a Dockerfile.
    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), PlatformError>;

    /// Remove an image by tag.
    fn remove_image(&self, tag: &str) -> Result<(), PlatformError>;

    /// Remove dangling images.
    fn prune_images(&self) -> Result<(), PlatformError>;
}

/// Container platform errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PlatformError {
    /// The requested subnet overlaps one already claimed on the platform.
    #[snafu(display("subnet {subnet} overlaps an existing address pool"))]
    SubnetConflict {
        /// The rejected subnet.
        subnet: Subnet,
    },

    /// The named resource does not exist.
    #[snafu(display("{kind} {name} not found"))]
    NotFound {
        /// Resource kind ("container", "network", "endpoint", "image").
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// A platform command failed.
    #[snafu(display("Command failed: {command}\nStderr: {stderr}"))]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Standard error output from the command.
        stderr: String,
    },

    /// I/O error while invoking the platform.
    #[snafu(display("I/O error during {operation}: {source}"))]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Platform output could not be decoded.
    #[snafu(display("failed to parse {what}: {source}"))]
    Parse {
        /// What was being parsed.
        what: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Platform output decoded but did not contain what was expected.
    #[snafu(display("unexpected {what}: {detail}"))]
    UnexpectedOutput {
        /// What was being read.
        what: String,
        /// What was wrong with it.
        detail: String,
    },
}

impl PlatformError {
    /// Whether this error means the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}
