//! Cluster-level topology behavior against the in-memory platform.
//!
//! Covers shard layout, partition disjointness, kill/revive bookkeeping and
//! a full partition/heal scenario, checking after every step that the node
//! model agrees with what the platform reports.

mod harness;

use std::time::Duration;

use harness::TestCluster;
use kvs_conductor::ConductorError;
use kvs_conductor::ShardId;
use kvs_conductor::platform::ContainerPlatform;

#[test]
fn test_six_nodes_two_per_shard() {
    let mut t = TestCluster::new("shards", 6);

    let shards = t.conductor.spawn_cluster(6, Some(2)).unwrap();

    let groups: Vec<Vec<usize>> = shards.iter().map(|g| g.nodes.clone()).collect();
    assert_eq!(groups, vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
    assert_eq!(t.conductor.nodes().len(), 6);

    let shard1 = shards.get(ShardId(1)).unwrap();
    let names: Vec<&str> = t.conductor.nodes_in(shard1).iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["kvs_shards_node_2", "kvs_shards_node_3"]);
}

#[test]
fn test_explicit_shard_sizes() {
    let mut t = TestCluster::new("sizes", 5);

    let shards = t.conductor.spawn_cluster_with_shard_sizes(&[3, 2]).unwrap();

    assert_eq!(shards.len(), 2);
    assert_eq!(shards.get(ShardId(0)).unwrap().nodes, vec![0, 1, 2]);
    assert_eq!(shards.get(ShardId(1)).unwrap().nodes, vec![3, 4]);
}

#[test]
fn test_nodes_publish_sequential_ports() {
    let mut t = TestCluster::new("ports", 3);
    t.conductor.spawn_cluster(3, None).unwrap();

    let base = t.conductor.config().external_port_base;
    for node in t.conductor.nodes() {
        assert_eq!(node.external_port, base + node.index as u16);
        assert_eq!(node.external_endpoint(), format!("http://localhost:{}", node.external_port));
        let spec = t.platform.container_spec(&node.name).unwrap();
        assert!(spec.auto_remove);
        assert!(spec.env.contains(&("NODE_IDENTIFIER".to_string(), node.index.to_string())));
    }
}

#[test]
fn test_partitions_have_disjoint_membership() {
    let mut t = TestCluster::new("disjoint", 3);
    t.conductor.spawn_cluster(3, None).unwrap();

    let p1 = t.conductor.create_partition(&[0, 1], "p1").unwrap();
    let p2 = t.conductor.create_partition(&[2], "p2").unwrap();

    assert_eq!(p1.name, "kvs_disjoint_net_p1");
    assert!(!p1.subnet.overlaps(&p2.subnet));
    assert_eq!(t.model_networks(0), vec![p1.name.clone()]);
    assert_eq!(t.model_networks(1), vec![p1.name.clone()]);
    assert_eq!(t.model_networks(2), vec![p2.name.clone()]);
    for i in 0..3 {
        assert_eq!(t.platform_networks(i), t.model_networks(i));
    }

    let a = t.conductor.node(0).unwrap();
    let c = t.conductor.node(2).unwrap();
    assert!(a.networks.iter().all(|n| !c.networks.contains(n)));
    assert!(p1.subnet.contains(a.address));
    assert!(p2.subnet.contains(c.address));
}

#[test]
fn test_kill_then_revive_lists_network_once() {
    let mut t = TestCluster::new("revive", 2);
    t.conductor.spawn_cluster(2, None).unwrap();
    let base = t.conductor.base_network().unwrap().clone();
    let address = t.conductor.node(1).unwrap().address;

    t.conductor.kill_node(1, &base).unwrap();
    assert!(t.conductor.node(1).unwrap().is_isolated());
    assert!(t.platform_networks(1).is_empty());

    t.conductor.revive_node(1, &base).unwrap();
    t.conductor.revive_node(1, &base).unwrap();

    let node = t.conductor.node(1).unwrap();
    assert_eq!(node.networks, vec![base.name.clone()]);
    assert_eq!(node.address, address, "revived node keeps its address");
    assert_eq!(t.platform_networks(1), vec![base.name.clone()]);
}

#[test]
fn test_four_node_partition_and_heal() {
    let mut t = TestCluster::new("e2e", 4);

    let shards = t.conductor.spawn_cluster(4, Some(2)).unwrap();
    assert_eq!(shards.len(), 2);
    let base = t.conductor.base_network().unwrap().clone();
    for i in 0..4 {
        assert_eq!(t.model_networks(i), vec![base.name.clone()]);
    }

    // split 2/2
    let p1 = t.conductor.create_partition(&[0, 1], "p1").unwrap();
    let p2 = t.conductor.create_partition(&[2, 3], "p2").unwrap();
    let report = t.conductor.describe_cluster();
    assert_eq!(report.partitions["p1"], vec![0, 1]);
    assert_eq!(report.partitions["p2"], vec![2, 3]);
    assert!(!report.partitions.contains_key("base"));

    // isolate node 3 inside its partition, then bring it back
    t.conductor.kill_node(3, &p2).unwrap();
    assert!(t.conductor.node(3).unwrap().is_isolated());
    t.conductor.revive_node(3, &p2).unwrap();
    assert_eq!(t.model_networks(3), vec![p2.name.clone()]);

    // heal by moving everyone onto p1
    let healed = t.conductor.create_partition(&[0, 1, 2, 3], "p1").unwrap();
    assert_eq!(healed, p1);
    for i in 0..4 {
        assert_eq!(t.model_networks(i), vec![p1.name.clone()]);
        assert_eq!(t.platform_networks(i), t.model_networks(i));
        assert!(p1.subnet.contains(t.conductor.node(i).unwrap().address));
    }

    let report = t.conductor.describe_cluster();
    assert_eq!(report.partitions.len(), 1);
    assert_eq!(report.partitions["p1"], vec![0, 1, 2, 3]);
}

#[test]
fn test_heal_onto_fresh_network() {
    let mut t = TestCluster::new("fresh", 4);
    t.conductor.spawn_cluster(4, Some(2)).unwrap();
    let p1 = t.conductor.create_partition(&[0, 1], "p1").unwrap();
    let p2 = t.conductor.create_partition(&[2, 3], "p2").unwrap();

    let healed = t.conductor.create_partition(&[0, 1, 2, 3], "healed").unwrap();

    assert_eq!(healed.name, "kvs_fresh_net_healed");
    assert!(!healed.subnet.overlaps(&p1.subnet));
    assert!(!healed.subnet.overlaps(&p2.subnet));
    for i in 0..4 {
        assert_eq!(t.model_networks(i), vec![healed.name.clone()]);
        assert_eq!(t.platform_networks(i), t.model_networks(i));
        assert!(healed.subnet.contains(t.conductor.node(i).unwrap().address));
    }

    let report = t.conductor.describe_cluster();
    assert_eq!(report.partitions.len(), 1);
    assert_eq!(report.partitions["healed"], vec![0, 1, 2, 3]);
}

#[test]
fn test_partition_leaves_other_nodes_untouched() {
    let mut t = TestCluster::new("untouched", 3);
    t.conductor.spawn_cluster(3, None).unwrap();
    let before = t.conductor.node(2).unwrap().clone();

    t.conductor.create_partition(&[0], "solo").unwrap();

    assert_eq!(t.conductor.node(2).unwrap(), &before);
}

#[test]
fn test_slow_node_within_budget() {
    let mut t = TestCluster::new("slow", 2);
    t.probe.online_after("kvs_slow_node_1", 10);

    t.conductor.spawn_cluster(2, None).unwrap();

    assert_eq!(t.clock.elapsed(), Duration::from_millis(2000));
}

#[test]
fn test_node_that_never_answers_times_out() {
    let mut t = TestCluster::new("dead", 1);

    let err = t.conductor.spawn_cluster(2, None).unwrap_err();

    match err {
        ConductorError::NodeNotOnline { node, timeout } => {
            assert_eq!(node, "kvs_dead_node_1");
            assert_eq!(timeout, t.conductor.config().online_timeout());
        }
        other => panic!("unexpected error: {other}"),
    }
    // spawned containers stay until teardown
    assert_eq!(t.platform.list_containers().unwrap().len(), 2);
}

#[test]
fn test_wait_online_for_single_node() {
    let mut t = TestCluster::new("single", 0);
    let index = t.conductor.spawn_node().unwrap().index;
    t.probe.online_after("kvs_single_node_0", 3);

    t.conductor.wait_online(index, Duration::from_secs(1)).unwrap();

    assert_eq!(t.clock.elapsed(), Duration::from_millis(600));
    assert!(matches!(
        t.conductor.wait_online(42, Duration::from_secs(1)),
        Err(ConductorError::UnknownNode { index: 42 })
    ));
}
