//! Deterministic resource names.
//!
//! Containers are named `<prefix>_<group>_node_<index>` and networks
//! `<prefix>_<group>_net_<suffix>`, where the suffix is `base` or a
//! partition id. Cleanup sweeps find leftovers from crashed runs purely by
//! matching these names, so they must stay stable and greppable.
//!
//! Prefix and group may not contain `_`, which keeps a group's patterns from
//! matching another group whose name extends it.

use std::fmt;

use regex::Regex;

use crate::constants::BASE_NETWORK_SUFFIX;
use crate::error::ConductorError;
use crate::error::Result;

/// Which runs a cleanup sweep targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScope {
    /// Only resources of this conductor's group.
    Group,
    /// Resources of every run under the prefix.
    ///
    /// Not safe while another run sharing the prefix is live: its containers
    /// and networks are removed too.
    AllRuns,
}

/// Compiled name patterns for one sweep scope.
#[derive(Debug, Clone)]
pub struct SweepPatterns {
    containers: Regex,
    networks: Regex,
}

impl SweepPatterns {
    /// Whether a container name belongs to the sweep.
    pub fn matches_container(&self, name: &str) -> bool {
        self.containers.is_match(name)
    }

    /// Whether a network name belongs to the sweep.
    pub fn matches_network(&self, name: &str) -> bool {
        self.networks.is_match(name)
    }
}

/// Name generator for one test group.
#[derive(Debug, Clone)]
pub struct Naming {
    prefix: String,
    group: String,
    group_sweep: SweepPatterns,
    all_runs_sweep: SweepPatterns,
}

impl Naming {
    /// Build names for `group` under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidName`] if either part is empty or
    /// contains characters other than ASCII alphanumerics and `-`.
    pub fn new(prefix: &str, group: &str) -> Result<Self> {
        validate_component("prefix", prefix)?;
        validate_component("group", group)?;

        let p = regex::escape(prefix);
        let g = regex::escape(group);
        let group_sweep = SweepPatterns {
            containers: compile(&format!("^{p}_{g}_node_[0-9]+$"))?,
            networks: compile(&format!("^{p}_{g}_net_.+$"))?,
        };
        let all_runs_sweep = SweepPatterns {
            containers: compile(&format!("^{p}_[A-Za-z0-9-]+_node_[0-9]+$"))?,
            networks: compile(&format!("^{p}_[A-Za-z0-9-]+_net_.+$"))?,
        };

        Ok(Self {
            prefix: prefix.to_string(),
            group: group.to_string(),
            group_sweep,
            all_runs_sweep,
        })
    }

    /// The name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The test group id.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Container name for the node with ordinal `index`.
    pub fn container_name(&self, index: usize) -> String {
        format!("{}_{}_node_{}", self.prefix, self.group, index)
    }

    /// Network name for a suffix (`base` or a partition id).
    pub fn network_name(&self, suffix: &str) -> String {
        format!("{}_{}_net_{}", self.prefix, self.group, suffix)
    }

    /// Name of the network every node joins at spawn.
    pub fn base_network_name(&self) -> String {
        self.network_name(BASE_NETWORK_SUFFIX)
    }

    /// Name of the network backing a partition.
    pub fn partition_network_name(&self, id: &PartitionId) -> String {
        self.network_name(id.as_str())
    }

    /// The suffix of one of this group's network names (`base`, `p1`, ...).
    ///
    /// Returns the full name unchanged for networks outside the group.
    pub fn network_label<'a>(&self, network: &'a str) -> &'a str {
        let head = format!("{}_{}_net_", self.prefix, self.group);
        network.strip_prefix(head.as_str()).unwrap_or(network)
    }

    /// Sweep patterns for a scope.
    pub fn sweep(&self, scope: CleanupScope) -> &SweepPatterns {
        match scope {
            CleanupScope::Group => &self.group_sweep,
            CleanupScope::AllRuns => &self.all_runs_sweep,
        }
    }
}

fn validate_component(what: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ConductorError::InvalidName {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ConductorError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Validated partition identifier, embedded verbatim in a network name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(String);

impl PartitionId {
    /// Validate a partition id.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidPartitionId`] for empty ids and ids
    /// with characters outside ASCII alphanumerics, `-` and `_`.
    pub fn new(id: &str) -> Result<Self> {
        if id.is_empty() {
            return Err(ConductorError::InvalidPartitionId {
                id: id.to_string(),
                reason: "must not be empty",
            });
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ConductorError::InvalidPartitionId {
                id: id.to_string(),
                reason: "only ASCII letters, digits, '-' and '_' are allowed",
            });
        }
        Ok(Self(id.to_string()))
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
