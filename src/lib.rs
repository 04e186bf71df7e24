//! Cluster conductor for fault-injection testing of HTTP key-value stores.
//!
//! Spawns the store under test as a group of containers, groups them into
//! shards, and injects network faults by moving containers between virtual
//! networks: partitions, heals, and simulated kill/revive. Every resource is
//! named `<prefix>_<group>_...` so a run can always sweep up after itself.
//!
//! # Layout
//!
//! - [`subnet`]: CIDR model and collision-free subnet allocation
//! - [`network`]: named network lifecycle
//! - [`node`]: container provisioning
//! - [`liveness`]: bounded `/ping` waits
//! - [`mutator`]: partition, kill and revive
//! - [`conductor`]: the cluster-level API
//! - [`platform`]: the container runtime seam (`docker` CLI or in-memory)
//!
//! # Tiger Style
//!
//! - Every wait and retry loop is bounded by a deadline or attempt count
//! - Time is read through an injectable [`Clock`]
//! - Errors are explicit `snafu` enums; no panics outside tests

pub mod clock;
pub mod conductor;
pub mod config;
pub mod constants;
pub mod error;
pub mod image;
pub mod liveness;
pub mod mutator;
pub mod naming;
pub mod network;
pub mod node;
pub mod platform;
pub mod subnet;
pub mod topology;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use conductor::CleanupReport;
pub use conductor::ClusterConductor;
pub use conductor::ClusterSession;
pub use config::ConductorConfig;
pub use error::ConductorError;
pub use image::ImageBuilder;
pub use liveness::HealthProbe;
pub use liveness::HttpHealthProbe;
pub use liveness::ScriptedProbe;
pub use naming::CleanupScope;
pub use network::NetworkHandle;
pub use platform::ContainerPlatform;
pub use platform::DockerCli;
pub use platform::InMemoryPlatform;
pub use subnet::Subnet;
pub use topology::ClusterNode;
pub use topology::NodeEndpoint;
pub use topology::ShardId;
pub use topology::ShardMap;
pub use topology::TopologyReport;
