//! Teardown and leftover sweeps.

mod harness;

use std::sync::Arc;

use harness::TestCluster;
use kvs_conductor::CleanupScope;
use kvs_conductor::InMemoryPlatform;
use kvs_conductor::Subnet;
use kvs_conductor::platform::ContainerPlatform;
use kvs_conductor::platform::memory::FakeOp;

fn group_resources(platform: &InMemoryPlatform, group: &str) -> Vec<String> {
    let head = format!("kvs_{group}_");
    let mut names = platform.list_containers().unwrap();
    names.extend(platform.list_networks().unwrap());
    names.retain(|n| n.starts_with(&head));
    names
}

#[test]
fn test_destroy_then_cleanup_leaves_nothing() {
    let mut t = TestCluster::new("teardown", 4);
    t.conductor.spawn_cluster(4, Some(2)).unwrap();
    t.conductor.create_partition(&[0, 1], "p1").unwrap();
    t.conductor.create_partition(&[2], "p2").unwrap();
    assert!(!group_resources(&t.platform, "teardown").is_empty());

    let report = t.conductor.destroy_cluster().unwrap();
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(report.removed_containers.len(), 4);
    assert_eq!(report.removed_networks.len(), 3);

    let sweep = t.conductor.cleanup_hanging(CleanupScope::Group).unwrap();
    assert!(sweep.removed_containers.is_empty());
    assert!(sweep.removed_networks.is_empty());
    assert!(group_resources(&t.platform, "teardown").is_empty());
    assert!(t.conductor.nodes().is_empty());
}

#[test]
fn test_group_sweep_spares_other_groups_and_strangers() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mut ours = TestCluster::on_platform(platform.clone(), "ours", 2);
    let mut theirs = TestCluster::on_platform(platform.clone(), "theirs", 1);
    ours.conductor.spawn_cluster(2, None).unwrap();
    theirs.conductor.spawn_cluster(1, None).unwrap();
    platform.add_foreign_container("postgres");
    platform.add_foreign_network("bridge", "172.17.0.0/16".parse::<Subnet>().unwrap());
    // a group whose name starts with ours must not be swept
    platform.add_foreign_container("kvs_ours-2_node_0");

    ours.conductor.destroy_cluster().unwrap();

    assert!(group_resources(&platform, "ours").is_empty());
    assert_eq!(group_resources(&platform, "theirs").len(), 2);
    assert!(platform.has_container("postgres"));
    assert!(platform.has_container("kvs_ours-2_node_0"));
    assert!(platform.has_network("bridge"));
}

#[test]
fn test_all_runs_sweep_removes_every_group() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mut first = TestCluster::on_platform(platform.clone(), "first", 1);
    let mut second = TestCluster::on_platform(platform.clone(), "second", 1);
    first.conductor.spawn_cluster(1, None).unwrap();
    second.conductor.spawn_cluster(1, None).unwrap();
    platform.add_foreign_container("postgres");

    let report = first.conductor.cleanup_hanging(CleanupScope::AllRuns).unwrap();

    assert_eq!(report.removed_containers.len(), 2);
    assert_eq!(report.removed_networks.len(), 2);
    assert!(group_resources(&platform, "first").is_empty());
    assert!(group_resources(&platform, "second").is_empty());
    assert!(platform.has_container("postgres"));
}

#[test]
fn test_sweep_continues_past_failures() {
    let mut t = TestCluster::new("flaky", 3);
    t.conductor.spawn_cluster(3, None).unwrap();
    t.platform.fail_next(FakeOp::RemoveContainer, "kvs_flaky_node_1");

    let report = t.conductor.destroy_cluster().unwrap();

    assert!(!report.is_complete());
    assert!(report.failed.contains(&"kvs_flaky_node_1".to_string()));
    assert!(!t.platform.has_container("kvs_flaky_node_0"));
    assert!(!t.platform.has_container("kvs_flaky_node_2"));

    // a second sweep picks up what the first one left
    let retry = t.conductor.cleanup_hanging(CleanupScope::Group).unwrap();
    assert!(retry.is_complete(), "{retry:?}");
    assert!(group_resources(&t.platform, "flaky").is_empty());
}

#[test]
fn test_spawn_after_destroy_starts_fresh() {
    let mut t = TestCluster::new("again", 2);
    t.conductor.spawn_cluster(2, None).unwrap();
    t.conductor.destroy_cluster().unwrap();

    let shards = t.conductor.spawn_cluster(2, None).unwrap();

    assert_eq!(shards.iter().next().unwrap().nodes, vec![0, 1]);
    assert!(t.platform.has_network("kvs_again_net_base"));
}

#[test]
fn test_dump_logs_per_node() {
    let mut t = TestCluster::new("logs", 2);
    t.conductor.spawn_cluster(2, None).unwrap();
    t.platform.set_logs("kvs_logs_node_0", b"listening on 8081\n");
    let dir = tempfile::tempdir().unwrap();

    let files = t.conductor.dump_logs(&dir.path().join("run-1")).unwrap();

    assert_eq!(files.len(), 2);
    let contents = std::fs::read_to_string(dir.path().join("run-1").join("kvs_logs_node_0")).unwrap();
    assert_eq!(contents, "listening on 8081\n");
}
