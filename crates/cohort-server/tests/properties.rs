// Randomized fault schedules against the deterministic coordinator

mod common;

use std::time::Duration;

use proptest::prelude::*;

use common::{FIVE, History, seeded_cluster};

#[derive(Clone, Debug)]
enum Op {
    Timeout(usize),
    Advance(u64),
    Partition(u8),
    HealAll,
    Append(usize),
    Fail(usize),
    Recover(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..5).prop_map(Op::Timeout),
        4 => (10u64..400).prop_map(Op::Advance),
        1 => any::<u8>().prop_map(Op::Partition),
        1 => Just(Op::HealAll),
        3 => (0usize..5).prop_map(Op::Append),
        1 => (0usize..5).prop_map(Op::Fail),
        1 => (0usize..5).prop_map(Op::Recover),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_faults_keep_safety(
        seed in any::<u64>(),
        ops in proptest::collection::vec(op(), 1..60)
    ) {
        let mut cluster = seeded_cluster(&FIVE, seed);
        let mut history = History::default();
        let mut commands = 0;

        for op in ops {
            match op {
                Op::Timeout(i) => cluster.trigger_election(FIVE[i]).unwrap(),
                Op::Advance(ms) => {
                    cluster.advance(Duration::from_millis(ms));
                }
                Op::Partition(mask) => {
                    let group: Vec<&str> = FIVE
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| mask & (1 << i) != 0)
                        .map(|(_, id)| *id)
                        .collect();
                    cluster.partition(group).unwrap();
                }
                Op::HealAll => {
                    cluster.heal_all().unwrap();
                }
                Op::Append(i) => {
                    // Rejected on followers and failed nodes
                    commands += 1;
                    let _ = cluster.append_command(FIVE[i], format!("SET k={}", commands), Vec::new());
                }
                Op::Fail(i) => cluster.fail_node(FIVE[i]).unwrap(),
                Op::Recover(i) => cluster.recover_node(FIVE[i]).unwrap(),
            }
            history.observe(&cluster);
        }
    }

    #[test]
    fn prop_healed_cluster_elects_one_leader(
        seed in any::<u64>(),
        masks in proptest::collection::vec(any::<u8>(), 0..6)
    ) {
        let mut cluster = seeded_cluster(&FIVE, seed);
        let mut history = History::default();
        for mask in masks {
            let group: Vec<&str> = FIVE
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();
            cluster.partition(group).unwrap();
            cluster.advance(Duration::from_millis(500));
            history.observe(&cluster);
        }

        cluster.heal_all().unwrap();
        for _ in 0..30 {
            cluster.advance(Duration::from_millis(100));
            history.observe(&cluster);
        }

        let leader = cluster.leader().map(|n| n.id().to_string());
        prop_assert!(leader.is_some());
        let term = cluster.leader().map(|n| n.current_term());
        for node in cluster.nodes() {
            prop_assert_eq!(Some(node.current_term()), term);
            prop_assert_eq!(node.leader_id().map(str::to_string), leader.clone());
        }
    }
}
