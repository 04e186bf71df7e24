//! Fixed limits and defaults for the cluster conductor.
//!
//! Tiger Style: Constants are fixed and immutable, enforced at compile time.
//! Every retry loop and wait in the conductor is bounded by one of these.

use std::time::Duration;

// ============================================================================
// Naming
// ============================================================================

/// Default prefix for every container and network this crate creates.
///
/// Sweeps match on this prefix, so changing it orphans resources created
/// under the old one.
pub const DEFAULT_NAME_PREFIX: &str = "kvs";

/// Suffix of the network every node joins at spawn time.
pub const BASE_NETWORK_SUFFIX: &str = "base";

/// Environment variable carrying the node's ordinal index into the container.
pub const NODE_IDENTIFIER_ENV: &str = "NODE_IDENTIFIER";

// ============================================================================
// Ports
// ============================================================================

/// Port the node process listens on inside its container.
pub const DEFAULT_SERVICE_PORT: u16 = 8081;

/// First host port used for published node ports (node `i` gets base + i).
pub const DEFAULT_EXTERNAL_PORT_BASE: u16 = 8081;

/// Maximum number of nodes a single conductor may spawn.
///
/// Tiger Style: Fixed limit keeps `base + index` inside the u16 port space
/// and bounds container churn per test run.
pub const MAX_CLUSTER_NODES: usize = 256;

// ============================================================================
// Subnet Allocation
// ============================================================================

/// Maximum number of candidate subnets tried per network creation.
pub const MAX_SUBNET_ATTEMPTS: u32 = 10;

/// First octet of every candidate subnet (RFC 1918 172.16.0.0/12 block).
pub const SUBNET_FIRST_OCTET: u8 = 172;

/// Lowest second octet used for candidates; candidates span 16..=31.
pub const SUBNET_SECOND_OCTET_BASE: u8 = 16;

/// Number of distinct second octets cycled through by the allocator.
pub const SUBNET_SECOND_OCTET_SPAN: u32 = 16;

/// Prefix length of every allocated subnet.
pub const SUBNET_PREFIX_LEN: u8 = 24;

// ============================================================================
// Liveness
// ============================================================================

/// Interval between health probes while waiting for a node.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default wall-clock budget for a node (or a whole cluster) to come online.
pub const DEFAULT_ONLINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request timeout of a single health probe.
pub const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound accepted for a configured online timeout (10 minutes).
pub const MAX_ONLINE_TIMEOUT: Duration = Duration::from_secs(600);

/// Path of the node health endpoint.
pub const HEALTH_PATH: &str = "/ping";
