//! Error types for the cluster conductor.
//!
//! Allocation and topology failures propagate immediately and stop the
//! current setup step. Cleanup failures are only ever logged by the sweep
//! paths; `CleanupPartial` exists so callers that want a strict sweep can
//! turn a [`CleanupReport`](crate::conductor::CleanupReport) into an error.

use std::path::PathBuf;
use std::time::Duration;

use snafu::Snafu;

use crate::platform::PlatformError;

/// Which topology mutation a [`ConductorError::TopologyMutationFailed`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// Detaching a node from a network.
    Disconnect,
    /// Attaching a node to a network.
    Connect,
    /// Reading a node's address on a network after attaching.
    Inspect,
}

impl std::fmt::Display for MutationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationOp::Disconnect => "disconnect",
            MutationOp::Connect => "connect",
            MutationOp::Inspect => "inspect",
        };
        f.write_str(s)
    }
}

/// Errors produced by conductor operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConductorError {
    /// No free subnet was found within the attempt budget.
    #[snafu(display("failed to allocate a subnet for network {network} after {attempts} attempts"))]
    AllocationExhausted {
        /// The network that could not be created.
        network: String,
        /// Number of candidates tried.
        attempts: u32,
    },

    /// A node did not answer its health endpoint before the deadline.
    #[snafu(display("node {node} did not come online within {timeout:?}"))]
    NodeNotOnline {
        /// Container name of the node.
        node: String,
        /// The budget that elapsed.
        timeout: Duration,
    },

    /// A platform call failed while changing a node's network membership.
    #[snafu(display("failed to {operation} node {node} on network {network}: {source}"))]
    TopologyMutationFailed {
        /// Container name of the node.
        node: String,
        /// Network involved in the failed call.
        network: String,
        /// The mutation that failed.
        operation: MutationOp,
        /// The underlying platform error.
        source: PlatformError,
    },

    /// A best-effort sweep could not remove some resources.
    #[snafu(display("cleanup left {} resources behind: {}", failed.len(), failed.join(", ")))]
    CleanupPartial {
        /// Names of the resources that survived the sweep.
        failed: Vec<String>,
    },

    /// A platform call failed outside of a topology mutation.
    #[snafu(display("platform error during {operation}: {source}"))]
    Platform {
        /// What the conductor was doing.
        operation: String,
        /// The underlying platform error.
        source: PlatformError,
    },

    /// A node index does not belong to this conductor.
    #[snafu(display("no node with index {index} in this cluster"))]
    UnknownNode {
        /// The index that was requested.
        index: usize,
    },

    /// A shard layout request is malformed.
    #[snafu(display("invalid shard layout: {reason}"))]
    InvalidShardLayout {
        /// Why the layout was rejected.
        reason: String,
    },

    /// A partition identifier cannot be embedded in a network name.
    #[snafu(display("invalid partition id {id:?}: {reason}"))]
    InvalidPartitionId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A name prefix or group id cannot be used in resource names.
    #[snafu(display("invalid {what} {value:?}: only ASCII letters, digits and '-' are allowed"))]
    InvalidName {
        /// Which name component was rejected.
        what: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A sweep pattern failed to compile.
    #[snafu(display("invalid sweep pattern {pattern}: {source}"))]
    InvalidPattern {
        /// The pattern source.
        pattern: String,
        /// The regex error.
        source: regex::Error,
    },

    /// The conductor configuration is invalid.
    #[snafu(display("invalid configuration: {source}"))]
    Config {
        /// The validation error.
        source: crate::config::ConfigError,
    },

    /// The HTTP client used for health probes could not be built.
    #[snafu(display("failed to build health probe client: {source}"))]
    HttpClient {
        /// The reqwest error.
        source: reqwest::Error,
    },

    /// Local filesystem I/O failed.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Convenience alias used across the crate.
pub type Result<T, E = ConductorError> = std::result::Result<T, E>;

