// Integration scenarios for the coordinator, consensus nodes and load balancer
// Each test drives the deterministic coordinator end to end

mod common;

use std::time::Duration;

use cohort_common::CohortError;
use cohort_consistency::{NodeStatus, Role};
use cohort_naming::{BalancingAlgorithm, HealthStatus, LoadBalancer, ServiceInstance};
use cohort_server::{BusConfig, Coordinator};
use cohort_topology::NodeState;

use common::{FIVE, History, cluster, seeded_cluster};

#[test]
fn test_election_and_replication_on_healthy_cluster() {
    let mut cluster = cluster(&FIVE);
    cluster.trigger_election("A").unwrap();

    let leaders = cluster.leaders();
    assert_eq!(leaders.len(), 1);
    assert_eq!(leaders[0].id(), "A");
    assert_eq!(leaders[0].current_term(), 1);

    let index = cluster.append_command("A", "SET x=1", Vec::new()).unwrap();
    assert_eq!(index, 0);
    for node in cluster.nodes() {
        assert_eq!(node.commit_index(), Some(0), "node {}", node.id());
        assert_eq!(node.log()[0].command, "SET x=1");
    }
}

#[test]
fn test_minority_partition_never_elects_or_accepts_commands() {
    let mut cluster = cluster(&FIVE);
    cluster.partition(["A", "B"]).unwrap();

    for _ in 0..5 {
        cluster.trigger_election("A").unwrap();
        cluster.trigger_election("B").unwrap();
    }
    assert!(cluster.leaders().is_empty());

    cluster.trigger_election("C").unwrap();
    assert_eq!(cluster.leader().map(|n| n.id()), Some("C"));
    cluster.append_command("C", "SET y=2", Vec::new()).unwrap();

    // Time passes; the minority keeps failing
    cluster.advance(Duration::from_secs(3));
    for id in ["A", "B"] {
        assert_ne!(cluster.node(id).unwrap().role(), Role::Leader);
        assert!(matches!(
            cluster.append_command(id, "SET z=3", Vec::new()),
            Err(CohortError::NotLeader { .. })
        ));
        assert!(cluster.node(id).unwrap().log().is_empty());
    }
    for id in ["C", "D", "E"] {
        assert_eq!(cluster.node(id).unwrap().commit_index(), Some(0));
    }
}

#[test]
fn test_heal_brings_minority_back_in_line() {
    let mut cluster = cluster(&FIVE);
    cluster.partition(["A", "B"]).unwrap();
    cluster.trigger_election("A").unwrap();
    cluster.trigger_election("C").unwrap();
    cluster.append_command("C", "SET y=2", Vec::new()).unwrap();
    assert_eq!(cluster.node("A").unwrap().role(), Role::Candidate);

    cluster.heal_all().unwrap();
    // The leader's next heartbeat reaches the minority
    cluster.advance(Duration::from_millis(100));

    assert_eq!(cluster.node("A").unwrap().role(), Role::Follower);
    assert_eq!(cluster.leaders().len(), 1);
    assert_eq!(cluster.leader().map(|n| n.id()), Some("C"));
    for node in cluster.nodes() {
        assert_eq!(node.log_len(), 1, "node {}", node.id());
        assert_eq!(node.commit_index(), Some(0), "node {}", node.id());
        assert_eq!(node.leader_id(), Some("C"));
    }
}

#[test]
fn test_heal_after_minority_term_inflation_converges() {
    let mut cluster = cluster(&FIVE);
    cluster.partition(["A", "B"]).unwrap();
    cluster.trigger_election("C").unwrap();
    cluster.append_command("C", "SET y=2", Vec::new()).unwrap();
    for _ in 0..3 {
        cluster.trigger_election("A").unwrap();
    }
    assert!(cluster.node("A").unwrap().current_term() > cluster.node("C").unwrap().current_term());

    let mut history = History::default();
    history.observe(&cluster);
    cluster.heal_all().unwrap();
    for _ in 0..20 {
        cluster.advance(Duration::from_millis(100));
        history.observe(&cluster);
    }

    let leader = cluster.leader().unwrap().id().to_string();
    // A's empty log cannot win a vote against the majority
    assert!(leader != "A" && leader != "B");
    assert_eq!(cluster.leaders().len(), 1);
    for node in cluster.nodes() {
        assert_eq!(node.log()[0].command, "SET y=2", "node {}", node.id());
        assert_eq!(node.leader_id(), Some(leader.as_str()));
    }
}

#[test]
fn test_least_load_follows_metric_updates() {
    let balancer = LoadBalancer::new(BalancingAlgorithm::LeastLoad);
    for (id, load) in [("i1", 5.0), ("i2", 2.0), ("i3", 8.0)] {
        balancer
            .register_instance(ServiceInstance::new(id, "A", "orders").with_load(load))
            .unwrap();
    }

    assert_eq!(balancer.select_instance("orders").unwrap().instance_id, "i2");
    assert!(balancer.update_metrics("i2", 9.0, 1.0));
    assert_eq!(balancer.select_instance("orders").unwrap().instance_id, "i1");
}

#[test]
fn test_round_robin_cycles_in_registration_order() {
    let balancer = LoadBalancer::new(BalancingAlgorithm::RoundRobin);
    for id in ["instance1", "instance2", "instance3"] {
        balancer
            .register_instance(ServiceInstance::new(id, "A", "orders"))
            .unwrap();
    }

    let picks: Vec<String> = (0..7)
        .map(|_| balancer.select_instance("orders").unwrap().instance_id)
        .collect();
    assert_eq!(
        picks,
        [
            "instance1",
            "instance2",
            "instance3",
            "instance1",
            "instance2",
            "instance3",
            "instance1"
        ]
    );
}

#[test]
fn test_discovered_nodes_feed_the_balancer() {
    let mut cluster = cluster(&FIVE);
    let balancer = LoadBalancer::new(BalancingAlgorithm::RoundRobin);
    cluster.sync_instances(&balancer, "kv").unwrap();
    assert_eq!(balancer.healthy_count("kv"), 5);

    cluster.fail_node("D").unwrap();
    cluster.sync_instances(&balancer, "kv").unwrap();
    balancer.set_health("kv@E", HealthStatus::Unhealthy);

    let picks: Vec<String> = (0..6)
        .map(|_| balancer.select_instance("kv").unwrap().node_id)
        .collect();
    assert!(!picks.contains(&"D".to_string()));
    assert!(!picks.contains(&"E".to_string()));
    assert_eq!(picks[..3], picks[3..]);

    assert!(matches!(
        balancer.select_instance("missing"),
        Err(CohortError::NoAvailableInstance(_))
    ));
}

#[test]
fn test_failed_leader_replaced_and_rejoins() {
    let mut cluster = cluster(&FIVE);
    cluster.trigger_election("A").unwrap();
    cluster.append_command("A", "SET a=1", Vec::new()).unwrap();

    cluster.fail_node("A").unwrap();
    assert_eq!(cluster.node("A").unwrap().status(), NodeStatus::Failed);
    let health = cluster.topology().health_snapshot();
    assert_eq!(health.failed_nodes, 1);
    assert!(health.quorum_available());

    cluster.advance(Duration::from_secs(2));
    let leader = cluster.leader().unwrap().id().to_string();
    assert_ne!(leader, "A");
    cluster.append_command(&leader, "SET b=2", Vec::new()).unwrap();
    assert_eq!(cluster.node("A").unwrap().log_len(), 1);

    cluster.recover_node("A").unwrap();
    cluster.advance(Duration::from_secs(1));
    let a = cluster.node("A").unwrap();
    assert_eq!(a.status(), NodeStatus::Active);
    assert_eq!(a.log_len(), 2);
    assert_eq!(a.commit_index(), Some(1));
    assert_eq!(
        cluster.topology().read().node("A").unwrap().state,
        NodeState::Active
    );
}

#[test]
fn test_lost_quorum_stalls_without_error() {
    let mut cluster = cluster(&FIVE);
    cluster.trigger_election("A").unwrap();
    for id in ["C", "D", "E"] {
        cluster.fail_node(id).unwrap();
    }

    // Accepted before A notices, never committed
    let index = cluster.append_command("A", "SET q=1", Vec::new()).unwrap();
    assert_eq!(index, 0);
    cluster.advance(Duration::from_secs(1));

    assert!(cluster.leaders().is_empty());
    for id in ["A", "B"] {
        assert_eq!(cluster.node(id).unwrap().commit_index(), None, "node {}", id);
        assert!(matches!(
            cluster.append_command(id, "SET q=2", Vec::new()),
            Err(CohortError::NotLeader { .. })
        ));
    }

    let status = cluster.status();
    assert!(status.health.availability < 0.5);
    assert!(!status.health.quorum_available());
}

#[test]
fn test_partitioned_leader_stops_accepting_commands() {
    let mut cluster = cluster(&FIVE);
    cluster.trigger_election("A").unwrap();
    cluster.append_command("A", "SET x=1", Vec::new()).unwrap();

    cluster.partition(["A", "B"]).unwrap();
    cluster.advance(Duration::from_secs(3));

    for id in ["A", "B"] {
        assert_ne!(cluster.node(id).unwrap().role(), Role::Leader, "node {}", id);
        assert!(matches!(
            cluster.append_command(id, "SET z=3", Vec::new()),
            Err(CohortError::NotLeader { .. })
        ));
        assert_eq!(cluster.node(id).unwrap().log_len(), 1, "node {}", id);
    }

    // The majority side carries on under a new leader
    let leader = cluster.leader().unwrap().id().to_string();
    assert!(["C", "D", "E"].contains(&leader.as_str()));
    let index = cluster.append_command(&leader, "SET y=2", Vec::new()).unwrap();
    assert_eq!(index, 1);
    for id in ["C", "D", "E"] {
        assert_eq!(cluster.node(id).unwrap().commit_index(), Some(1), "node {}", id);
    }
}

#[test]
fn test_leader_log_only_grows() {
    let mut cluster = cluster(&FIVE);
    let mut history = History::default();
    cluster.trigger_election("B").unwrap();
    for i in 0..5 {
        cluster
            .append_command("B", format!("SET k={}", i), Vec::new())
            .unwrap();
        cluster.advance(Duration::from_millis(100));
        history.observe(&cluster);
    }

    let leader = cluster.node("B").unwrap();
    assert!(leader.is_leader());
    assert_eq!(leader.log_len(), 5);
    assert_eq!(leader.commit_index(), Some(4));
}

#[test]
fn test_lossy_bus_still_elects_single_leader() {
    let bus = BusConfig {
        drop_rate: 0.1,
        reorder: true,
        seed: Some(17),
    };
    let mut cluster = Coordinator::new(FIVE, Default::default(), bus).unwrap();
    let mut history = History::default();
    for _ in 0..50 {
        cluster.advance(Duration::from_millis(100));
        history.observe(&cluster);
    }
    assert!(cluster.leader().is_some());
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let run = || {
        let mut cluster = seeded_cluster(&FIVE, 99);
        cluster.advance(Duration::from_secs(2));
        let status = cluster.status();
        (status.leader, status.term)
    };
    assert_eq!(run(), run());
}
