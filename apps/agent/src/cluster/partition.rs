use std::collections::HashMap;

use crate::database::models::AgentNode;

/// Partition the monitor set across the live nodes.
///
/// Sticky by design: a monitor stays on its previous node while that node
/// is live and not above the even-load ceiling, so node churn moves as few
/// monitors as possible. Everything else lands on the least-loaded node.
/// The result is deterministic for a given registry view, which makes a
/// brief two-master overlap during failover converge instead of conflict.
pub fn partition(
    monitor_ids: &[i64],
    live_nodes: &[AgentNode],
    previous: &HashMap<String, Vec<i64>>,
) -> HashMap<String, Vec<i64>> {
    let mut assignments: HashMap<String, Vec<i64>> = HashMap::new();

    if live_nodes.is_empty() {
        return assignments;
    }

    let mut node_ids: Vec<&str> = live_nodes.iter().map(|n| n.node_id.as_str()).collect();
    node_ids.sort_unstable();
    node_ids.dedup();

    for node_id in &node_ids {
        assignments.insert(node_id.to_string(), Vec::new());
    }

    // Even load means no node carries more than ceil(M/N)
    let ceiling = monitor_ids.len().div_ceil(node_ids.len());

    let mut previous_owner: HashMap<i64, &str> = HashMap::new();
    for (node_id, ids) in previous {
        if node_ids.contains(&node_id.as_str()) {
            for id in ids {
                previous_owner.insert(*id, node_id.as_str());
            }
        }
    }

    let mut sorted_monitors: Vec<i64> = monitor_ids.to_vec();
    sorted_monitors.sort_unstable();
    sorted_monitors.dedup();

    // First pass: keep monitors where they already run
    let mut unplaced = Vec::new();
    for monitor_id in sorted_monitors {
        match previous_owner.get(&monitor_id) {
            Some(owner) if assignments[*owner].len() < ceiling => {
                assignments.get_mut(*owner).expect("owner is a live node").push(monitor_id);
            }
            _ => unplaced.push(monitor_id),
        }
    }

    // Second pass: place the rest on the least-loaded node, smallest node
    // ID breaking ties
    for monitor_id in unplaced {
        let target = node_ids
            .iter()
            .copied()
            .min_by_key(|id| (assignments[*id].len(), *id))
            .expect("live node set is not empty");
        assignments.get_mut(target).expect("target is a live node").push(monitor_id);
    }

    for ids in assignments.values_mut() {
        ids.sort_unstable();
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn nodes(ids: &[&str]) -> Vec<AgentNode> {
        ids.iter()
            .map(|id| AgentNode {
                node_id: id.to_string(),
                hostname: format!("host-{}", id),
                region: None,
                last_heartbeat: Utc::now(),
            })
            .collect()
    }

    fn all_assigned(assignments: &HashMap<String, Vec<i64>>) -> Vec<i64> {
        let mut all: Vec<i64> = assignments.values().flatten().copied().collect();
        all.sort_unstable();
        all
    }

    #[test]
    fn test_every_monitor_assigned_exactly_once() {
        let monitors: Vec<i64> = (1..=10).collect();
        let live = nodes(&["a", "b", "c"]);

        let assignments = partition(&monitors, &live, &HashMap::new());

        assert_eq!(all_assigned(&assignments), monitors);
    }

    #[test]
    fn test_even_distribution_within_one() {
        let monitors: Vec<i64> = (1..=10).collect();
        let live = nodes(&["a", "b", "c"]);

        let assignments = partition(&monitors, &live, &HashMap::new());

        for ids in assignments.values() {
            assert!(ids.len() == 3 || ids.len() == 4, "got {} monitors", ids.len());
        }
    }

    #[test]
    fn test_single_node_takes_all() {
        let monitors: Vec<i64> = (1..=7).collect();
        let live = nodes(&["solo"]);

        let assignments = partition(&monitors, &live, &HashMap::new());

        assert_eq!(assignments["solo"], monitors);
    }

    #[test]
    fn test_fewer_monitors_than_nodes_leaves_idle_nodes() {
        let monitors = vec![1, 2];
        let live = nodes(&["a", "b", "c", "d"]);

        let assignments = partition(&monitors, &live, &HashMap::new());

        assert_eq!(all_assigned(&assignments), monitors);
        let empty = assignments.values().filter(|ids| ids.is_empty()).count();
        assert_eq!(empty, 2);
    }

    #[test]
    fn test_zero_nodes_yields_empty_table() {
        let assignments = partition(&[1, 2, 3], &[], &HashMap::new());
        assert!(assignments.is_empty());
    }

    #[test]
    fn test_sticky_assignments_survive_recompute() {
        let monitors: Vec<i64> = (1..=9).collect();
        let live = nodes(&["a", "b", "c"]);

        let first = partition(&monitors, &live, &HashMap::new());
        let second = partition(&monitors, &live, &first);

        assert_eq!(first, second);
    }

    #[test]
    fn test_node_loss_reflows_only_orphans() {
        let monitors: Vec<i64> = (1..=10).collect();
        let before = partition(&monitors, &nodes(&["a", "b", "c"]), &HashMap::new());

        // Node b drops out of the live set
        let after = partition(&monitors, &nodes(&["a", "c"]), &before);

        assert_eq!(all_assigned(&after), monitors);
        assert!(!after.contains_key("b"));

        // Monitors that stayed on a live node did not move
        for node in ["a", "c"] {
            for id in &before[node] {
                assert!(after[node].contains(id), "monitor {} moved off {}", id, node);
            }
        }
    }

    #[test]
    fn test_node_join_only_steals_overflow() {
        let monitors: Vec<i64> = (1..=9).collect();
        let before = partition(&monitors, &nodes(&["a", "b"]), &HashMap::new());

        let after = partition(&monitors, &nodes(&["a", "b", "c"]), &before);

        assert_eq!(all_assigned(&after), monitors);
        // Ceiling with three nodes is 3; nobody exceeds it
        for ids in after.values() {
            assert!(ids.len() <= 3);
        }
        // Monitors kept by a and b were already theirs
        for node in ["a", "b"] {
            for id in &after[node] {
                assert!(before[node].contains(id));
            }
        }
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let monitors = vec![5, 3, 8, 1, 9, 2];
        let live = nodes(&["n2", "n1"]);
        let previous = HashMap::from([("n1".to_string(), vec![8, 9])]);

        let one = partition(&monitors, &live, &previous);
        let two = partition(&monitors, &live, &previous);

        assert_eq!(one, two);
    }
}
