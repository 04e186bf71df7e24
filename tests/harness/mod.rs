//! Shared setup for conductor integration tests.
//!
//! Every test runs against [`InMemoryPlatform`], a [`ManualClock`] and a
//! [`ScriptedProbe`], so no docker daemon or real sleeping is involved.

#![allow(dead_code)]

use std::sync::Arc;

use kvs_conductor::ClusterConductor;
use kvs_conductor::ConductorConfig;
use kvs_conductor::InMemoryPlatform;
use kvs_conductor::ManualClock;
use kvs_conductor::ScriptedProbe;

pub struct TestCluster {
    pub platform: Arc<InMemoryPlatform>,
    pub probe: Arc<ScriptedProbe>,
    pub clock: ManualClock,
    pub conductor: ClusterConductor,
}

impl TestCluster {
    /// Conductor for `group` where nodes `0..online` answer their first probe.
    pub fn new(group: &str, online: usize) -> Self {
        Self::on_platform(Arc::new(InMemoryPlatform::new()), group, online)
    }

    /// Same, sharing an existing platform with other conductors.
    pub fn on_platform(platform: Arc<InMemoryPlatform>, group: &str, online: usize) -> Self {
        let probe = Arc::new(ScriptedProbe::new());
        for i in 0..online {
            probe.online_after(&format!("kvs_{group}_node_{i}"), 0);
        }
        let clock = ManualClock::new();
        let conductor = ClusterConductor::new(
            ConductorConfig::for_group(group, "kvstore-test"),
            platform.clone(),
            probe.clone(),
            Arc::new(clock.clone()),
        )
        .expect("valid test configuration");

        Self {
            platform,
            probe,
            clock,
            conductor,
        }
    }

    /// Platform-side network membership of node `index`.
    pub fn platform_networks(&self, index: usize) -> Vec<String> {
        let node = self.conductor.node(index).expect("node exists");
        self.platform.container_networks(&node.name)
    }

    /// Model-side network membership of node `index`, sorted.
    pub fn model_networks(&self, index: usize) -> Vec<String> {
        let mut networks = self.conductor.node(index).expect("node exists").networks.clone();
        networks.sort();
        networks
    }
}
