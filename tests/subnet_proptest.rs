//! Property-based tests for subnet allocation.
//!
//! Whatever blocks are already claimed, visibly (listed networks) or
//! invisibly (pools the platform only reveals by rejecting a create), the
//! allocator must never hand out an overlapping block.
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use kvs_conductor::ConductorError;
use kvs_conductor::InMemoryPlatform;
use kvs_conductor::Subnet;
use kvs_conductor::network::NetworkRegistry;
use kvs_conductor::subnet::SubnetAllocator;
use proptest::prelude::*;

// Blocks drawn from the same 172.16.0.0/12 range the allocator uses, so
// collisions are likely.
fn candidate_range_subnet() -> impl Strategy<Value = Subnet> {
    (16u8..32, any::<u8>()).prop_map(|(b, c)| Subnet::new(Ipv4Addr::new(172, b, c, 0), 24).unwrap())
}

fn network_name() -> impl Strategy<Value = String> {
    "kvs_[a-z]{1,8}_net_[a-z0-9]{1,6}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_never_returns_reserved_subnet(
        used in prop::collection::vec(candidate_range_subnet(), 5),
        name in network_name(),
    ) {
        let platform = InMemoryPlatform::new();
        for subnet in &used {
            platform.reserve_subnet(*subnet);
        }
        let allocator = SubnetAllocator::new(10);

        match allocator.allocate(&platform, &name, &mut BTreeSet::new()) {
            Ok(subnet) => {
                prop_assert!(used.iter().all(|u| !u.overlaps(&subnet)));
                prop_assert_eq!(platform.network_subnet(&name), Some(subnet));
            }
            Err(ConductorError::AllocationExhausted { attempts, .. }) => {
                prop_assert_eq!(attempts, 10);
                prop_assert!(!platform.has_network(&name));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn test_skips_known_subnets_without_platform_calls(
        used in prop::collection::vec(candidate_range_subnet(), 5),
        name in network_name(),
    ) {
        let platform = InMemoryPlatform::new();
        let mut in_use: BTreeSet<Subnet> = used.iter().copied().collect();
        let allocator = SubnetAllocator::new(10);
        let skipped = (0..10)
            .take_while(|&a| {
                let c = allocator.candidate(&name, a);
                used.iter().any(|u| u.overlaps(&c))
            })
            .count();

        let result = allocator.allocate(&platform, &name, &mut in_use);

        if skipped == 10 {
            prop_assert!(result.is_err());
            prop_assert_eq!(platform.create_network_attempts(), 0);
        } else {
            let subnet = result.unwrap();
            prop_assert!(used.iter().all(|u| !u.overlaps(&subnet)));
            prop_assert_eq!(platform.create_network_attempts(), 1);
        }
    }

    #[test]
    fn test_registry_avoids_listed_networks(
        used in prop::collection::vec(candidate_range_subnet(), 5),
        name in network_name(),
    ) {
        let platform = Arc::new(InMemoryPlatform::new());
        for (i, subnet) in used.iter().enumerate() {
            // duplicates among `used` would be rejected by a real daemon too
            if used[..i].iter().all(|u| !u.overlaps(subnet)) {
                platform.add_foreign_network(&format!("other-{i}"), *subnet);
            }
        }
        let mut registry = NetworkRegistry::new(platform.clone(), SubnetAllocator::new(10));

        if let Ok(handle) = registry.ensure_network(&name) {
            prop_assert!(used.iter().all(|u| !u.overlaps(&handle.subnet)));
            prop_assert_eq!(registry.known_subnet(&name), Some(handle.subnet));
        }
    }
}
