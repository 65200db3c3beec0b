//! Placement resolution: turning pruned shard sets into the worker nodes a
//! task may run on.

use kestrel_common::types::{ShardId, WorkerNode};
use tracing::debug;

use crate::catalog::{MetadataSnapshot, ShardPlacement};
use crate::task::TaskPlacement;

/// Intersect per-shard placement lists by node identity (host, port).
///
/// A multi-relation task can only run on nodes holding an active placement of
/// every participating shard; the first list's order is preserved so the
/// executor's placement preference stays stable.
pub fn intersect_placements(placement_lists: &[Vec<ShardPlacement>]) -> Vec<TaskPlacement> {
    let Some((first, rest)) = placement_lists.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|candidate| {
            rest.iter()
                .all(|list| list.iter().any(|p| p.node == candidate.node))
        })
        .map(|p| TaskPlacement { node: p.node.clone(), shard: Some(p.shard) })
        .collect()
}

/// Nodes that hold an active placement of every listed shard.
pub fn workers_containing_all_shards(
    snapshot: &MetadataSnapshot,
    shards: &[ShardId],
) -> Vec<WorkerNode> {
    let Some((&first, rest)) = shards.split_first() else {
        return Vec::new();
    };
    snapshot
        .active_placements(first)
        .into_iter()
        .map(|p| p.node)
        .filter(|node| {
            rest.iter().all(|&shard| {
                snapshot
                    .active_placements(shard)
                    .iter()
                    .any(|p| &p.node == node)
            })
        })
        .collect()
}

/// A placement for a read whose every shard was pruned away: the task still
/// runs somewhere to return its empty result, anchored to no shard.
pub fn dummy_placement(snapshot: &MetadataSnapshot) -> Option<TaskPlacement> {
    let node = snapshot.first_live_worker()?;
    debug!(node = %node, "routing fully-pruned read to dummy placement");
    Some(TaskPlacement { node: node.clone(), shard: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PlacementState;
    use kestrel_common::types::ShardId;

    fn placement(shard: u64, host: &str) -> ShardPlacement {
        ShardPlacement {
            shard: ShardId(shard),
            node: WorkerNode::new(host, 5432),
            state: PlacementState::Active,
        }
    }

    #[test]
    fn test_intersection_by_node_identity() {
        let lists = vec![
            vec![placement(101, "n1"), placement(101, "n2")],
            vec![placement(205, "n2"), placement(205, "n3")],
        ];
        let joint = intersect_placements(&lists);
        assert_eq!(joint.len(), 1);
        assert_eq!(joint[0].node, WorkerNode::new("n2", 5432));
        assert_eq!(joint[0].shard, Some(ShardId(101)));
    }

    #[test]
    fn test_disjoint_placements_yield_empty() {
        let lists = vec![vec![placement(101, "n1")], vec![placement(205, "n2")]];
        assert!(intersect_placements(&lists).is_empty());
    }

    #[test]
    fn test_single_list_passes_through() {
        let lists = vec![vec![placement(101, "n1"), placement(101, "n2")]];
        assert_eq!(intersect_placements(&lists).len(), 2);
    }

    #[test]
    fn test_workers_containing_all_shards() {
        let mut snapshot = MetadataSnapshot::new();
        for p in [
            placement(101, "n1"),
            placement(101, "n2"),
            placement(102, "n2"),
            placement(102, "n3"),
        ] {
            snapshot.add_placement(p);
        }
        let nodes = workers_containing_all_shards(&snapshot, &[ShardId(101), ShardId(102)]);
        assert_eq!(nodes, vec![WorkerNode::new("n2", 5432)]);
    }
}
