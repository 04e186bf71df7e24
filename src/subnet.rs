//! Subnet allocation for conductor networks.
//!
//! Candidates are drawn from `172.16.0.0/12` as /24 blocks. The sequence for a
//! given network name is deterministic within a process (a hash of the name
//! mixed with the attempt counter), so concurrent runs creating differently
//! named networks rarely race for the same block.
//!
//! The allocator never trusts a cached view: callers pass the set of subnets
//! observed on the platform at call time, and the allocator grows that set
//! whenever the platform reports a conflict the snapshot did not show.

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::MAX_SUBNET_ATTEMPTS;
use crate::constants::SUBNET_FIRST_OCTET;
use crate::constants::SUBNET_PREFIX_LEN;
use crate::constants::SUBNET_SECOND_OCTET_BASE;
use crate::constants::SUBNET_SECOND_OCTET_SPAN;
use crate::error::ConductorError;
use crate::error::Result;
use crate::platform::ContainerPlatform;
use crate::platform::PlatformError;

/// An IPv4 CIDR block, normalized so host bits are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Build a subnet, masking off any host bits in `addr`.
    ///
    /// Returns `None` if `prefix_len` is greater than 32.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Option<Self> {
        if prefix_len > 32 {
            return None;
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix_len));
        Some(Self { network, prefix_len })
    }

    /// The network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// The prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` lies inside this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix_len) == u32::from(self.network)
    }

    /// Whether the two blocks share at least one address.
    pub fn overlaps(&self, other: &Subnet) -> bool {
        let shorter = self.prefix_len.min(other.prefix_len);
        let m = mask(shorter);
        u32::from(self.network) & m == u32::from(other.network) & m
    }

    /// The `n`th host address (1-based), if it fits in the block.
    pub fn host(&self, n: u32) -> Option<Ipv4Addr> {
        let size = 1u64 << (32 - u32::from(self.prefix_len));
        if n == 0 || u64::from(n) >= size.saturating_sub(1) {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + n))
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix_len)) }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Error returned when a CIDR string cannot be parsed.
#[derive(Debug, Snafu)]
#[snafu(display("invalid subnet {input:?}: {reason}"))]
pub struct SubnetParseError {
    input: String,
    reason: &'static str,
}

impl FromStr for Subnet {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = |reason| SubnetParseError {
            input: s.to_string(),
            reason,
        };
        let (addr, len) = s.split_once('/').ok_or_else(|| err("missing prefix length"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| err("not an IPv4 address"))?;
        let len: u8 = len.parse().map_err(|_| err("prefix length is not a number"))?;
        Subnet::new(addr, len).ok_or_else(|| err("prefix length above 32"))
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

impl TryFrom<String> for Subnet {
    type Error = SubnetParseError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Picks free subnets and creates networks on them with bounded retries.
#[derive(Debug, Clone, Copy)]
pub struct SubnetAllocator {
    max_attempts: u32,
}

impl Default for SubnetAllocator {
    fn default() -> Self {
        Self::new(MAX_SUBNET_ATTEMPTS)
    }
}

impl SubnetAllocator {
    /// Create an allocator that gives up after `max_attempts` candidates.
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Number of candidates tried before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The candidate block for `network` on a given attempt.
    pub fn candidate(&self, network: &str, attempt: u32) -> Subnet {
        let mut hasher = DefaultHasher::new();
        network.hash(&mut hasher);
        let hash = hasher.finish();

        let second = u32::from(SUBNET_SECOND_OCTET_BASE) + attempt % SUBNET_SECOND_OCTET_SPAN;
        let third = (u64::from(attempt) * 7).wrapping_add(hash) % 256;

        let addr = Ipv4Addr::new(SUBNET_FIRST_OCTET, second as u8, third as u8, 0);
        // prefix is a compile-time constant <= 32
        Subnet {
            network: addr,
            prefix_len: SUBNET_PREFIX_LEN,
        }
    }

    /// Create `network` on the first candidate that does not collide.
    ///
    /// `in_use` is the caller's fresh snapshot of occupied blocks. Candidates
    /// overlapping it are skipped without a platform call; blocks the
    /// platform rejects as already claimed are added to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::AllocationExhausted`] once every attempt has
    /// been used.
    pub fn allocate(
        &self,
        platform: &dyn ContainerPlatform,
        network: &str,
        in_use: &mut BTreeSet<Subnet>,
    ) -> Result<Subnet> {
        for attempt in 0..self.max_attempts {
            let candidate = self.candidate(network, attempt);

            if in_use.iter().any(|used| used.overlaps(&candidate)) {
                debug!(network, subnet = %candidate, attempt, "subnet already in use, skipping");
                continue;
            }

            match platform.create_network(network, candidate) {
                Ok(()) => {
                    info!(network, subnet = %candidate, attempt, "created network");
                    return Ok(candidate);
                }
                Err(PlatformError::SubnetConflict { .. }) => {
                    warn!(network, subnet = %candidate, "subnet claimed on platform, trying another one");
                    in_use.insert(candidate);
                }
                Err(e) => {
                    warn!(network, subnet = %candidate, error = %e, "error creating network");
                }
            }
        }

        Err(ConductorError::AllocationExhausted {
            network: network.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::InMemoryPlatform;

    fn subnet(s: &str) -> Subnet {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let s = subnet("172.18.4.0/24");
        assert_eq!(s.network(), Ipv4Addr::new(172, 18, 4, 0));
        assert_eq!(s.prefix_len(), 24);
        assert_eq!(s.to_string(), "172.18.4.0/24");
    }

    #[test]
    fn test_parse_masks_host_bits() {
        assert_eq!(subnet("10.1.2.3/16").to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("172.18.0.0".parse::<Subnet>().is_err());
        assert!("172.18.0.0/33".parse::<Subnet>().is_err());
        assert!("fd00::/64".parse::<Subnet>().is_err());
        assert!("172.18.0.0/x".parse::<Subnet>().is_err());
    }

    #[test]
    fn test_contains_and_overlaps() {
        let bridge = subnet("172.17.0.0/16");
        let inner = subnet("172.17.9.0/24");
        let outer = subnet("172.18.9.0/24");

        assert!(bridge.overlaps(&inner));
        assert!(inner.overlaps(&bridge));
        assert!(!bridge.overlaps(&outer));
        assert!(inner.contains(Ipv4Addr::new(172, 17, 9, 200)));
        assert!(!inner.contains(Ipv4Addr::new(172, 17, 10, 1)));
    }

    #[test]
    fn test_host_bounds() {
        let s = subnet("172.20.1.0/24");
        assert_eq!(s.host(0), None);
        assert_eq!(s.host(1), Some(Ipv4Addr::new(172, 20, 1, 1)));
        assert_eq!(s.host(254), Some(Ipv4Addr::new(172, 20, 1, 254)));
        assert_eq!(s.host(255), None);
    }

    #[test]
    fn test_serde_as_string() {
        let s = subnet("172.21.3.0/24");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"172.21.3.0/24\"");
        let back: Subnet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_candidates_deterministic_and_in_range() {
        let alloc = SubnetAllocator::default();
        for attempt in 0..32 {
            let a = alloc.candidate("kvs_g_net_base", attempt);
            let b = alloc.candidate("kvs_g_net_base", attempt);
            assert_eq!(a, b);
            assert!(subnet("172.16.0.0/12").contains(a.network()));
            assert_eq!(a.prefix_len(), 24);
        }
    }

    #[test]
    fn test_allocate_skips_known_subnets_without_platform_calls() {
        let platform = InMemoryPlatform::new();
        let alloc = SubnetAllocator::new(3);
        let mut in_use: BTreeSet<Subnet> = (0..2).map(|a| alloc.candidate("net", a)).collect();

        let got = alloc.allocate(&platform, "net", &mut in_use).unwrap();

        assert_eq!(got, alloc.candidate("net", 2));
        assert_eq!(platform.create_network_attempts(), 1);
    }

    #[test]
    fn test_allocate_records_platform_conflicts() {
        let platform = InMemoryPlatform::new();
        let alloc = SubnetAllocator::new(4);
        let hidden = alloc.candidate("net", 0);
        platform.reserve_subnet(hidden);
        let mut in_use = BTreeSet::new();

        let got = alloc.allocate(&platform, "net", &mut in_use).unwrap();

        assert_ne!(got, hidden);
        assert!(in_use.contains(&hidden));
        assert_eq!(platform.network_subnet("net"), Some(got));
    }

    #[test]
    fn test_allocate_exhausted() {
        let platform = InMemoryPlatform::new();
        let alloc = SubnetAllocator::new(2);
        let mut in_use = BTreeSet::from([subnet("172.16.0.0/12")]);

        let err = alloc.allocate(&platform, "net", &mut in_use).unwrap_err();

        assert!(matches!(err, ConductorError::AllocationExhausted { attempts: 2, .. }));
        assert_eq!(platform.create_network_attempts(), 0);
    }
}
