//! Shard pruning: narrow a table's shard set using the partition-column
//! constraints recovered from a predicate.
//!
//! Pruning is conservative.  A shard is kept unless the constraints prove it
//! cannot contain a matching row, so an imprecise predicate degrades to more
//! shards, never to wrong answers.

use kestrel_common::datum::Datum;
use std::cmp::Ordering;

use crate::catalog::{PartitionInterval, PartitionMethod, TableDistribution};
use crate::expr::Expr;
use crate::extract::{extract_partition_constraints, PartitionConstraints};

/// True when the interval could contain a row satisfying the constraints.
fn interval_may_match(interval: &PartitionInterval, constraints: &PartitionConstraints) -> bool {
    // Shards without valid bounds (reference or staging shards) can never be
    // excluded by value reasoning.
    let (Some(min), Some(max)) = (&interval.min_value, &interval.max_value) else {
        return true;
    };
    if min.is_null() || max.is_null() {
        return true;
    }

    match interval.method {
        PartitionMethod::Hash => {
            let Some((shard_min, shard_max)) = interval.token_bounds() else {
                return true;
            };
            // Equality and token bounds may both be present (an equality
            // filter plus a per-shard fan-out bound); the shard must satisfy
            // every constraint.
            if let Some(value) = &constraints.eq {
                let token = value.partition_hash_token();
                if !(shard_min <= token && token <= shard_max) {
                    return false;
                }
            }
            if let Some(lower) = constraints.hash_lower {
                if shard_max < lower {
                    return false;
                }
            }
            if let Some(upper) = constraints.hash_upper {
                if shard_min > upper {
                    return false;
                }
            }
            // Value-range bounds say nothing about hash token placement.
            true
        }
        // Append intervals prune by the same value-overlap reasoning as
        // range intervals; they merely permit gaps and overlaps, so several
        // shards may survive an equality.
        PartitionMethod::Range | PartitionMethod::Append => {
            if let Some(value) = &constraints.eq {
                return matches!(value.try_cmp(min), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(value.try_cmp(max), Some(Ordering::Less | Ordering::Equal));
            }
            if let Some((bound, inclusive)) = &constraints.lower {
                // All rows in this shard are below the lower bound.
                let excluded = match max.try_cmp(bound) {
                    Some(Ordering::Less) => true,
                    Some(Ordering::Equal) => !inclusive,
                    _ => false,
                };
                if excluded {
                    return false;
                }
            }
            if let Some((bound, inclusive)) = &constraints.upper {
                let excluded = match min.try_cmp(bound) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => !inclusive,
                    _ => false,
                };
                if excluded {
                    return false;
                }
            }
            true
        }
        PartitionMethod::Reference => true,
    }
}

/// Prune a table's shards down to those that may satisfy the conjuncts.
/// A contradiction prunes everything; an unconstrained predicate keeps all.
pub fn prune_shards<'a>(
    dist: &'a TableDistribution,
    conjuncts: &[&Expr],
) -> Vec<&'a PartitionInterval> {
    let constraints = extract_partition_constraints(dist, conjuncts);
    if constraints.contradiction {
        return Vec::new();
    }
    if !constraints.constrained {
        return dist.intervals.iter().collect();
    }
    dist.intervals
        .iter()
        .filter(|interval| interval_may_match(interval, &constraints))
        .collect()
}

/// Fast path for INSERT routing: a single partition value maps directly to
/// its owning shard for hash and range tables, skipping predicate extraction.
pub fn fast_prune_insert<'a>(
    dist: &'a TableDistribution,
    partition_value: &Datum,
) -> Option<&'a PartitionInterval> {
    dist.find_interval_for_value(partition_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinOp, ColumnRef};
    use kestrel_common::types::{ColocationGroupId, ColumnId, ShardId, TableId};

    fn hash_dist(shards: usize) -> TableDistribution {
        let ids: Vec<ShardId> = (0..shards).map(|i| ShardId(100 + i as u64)).collect();
        TableDistribution::uniform_hash(
            TableId(1),
            "orders",
            ColumnId(0),
            "order_id",
            ColocationGroupId(1),
            &ids,
        )
    }

    fn range_dist() -> TableDistribution {
        let table = TableId(2);
        let intervals = vec![(0, 99, 201u64), (100, 199, 202), (200, 299, 203)]
            .into_iter()
            .map(|(lo, hi, id)| PartitionInterval {
                shard: ShardId(id),
                table,
                method: PartitionMethod::Range,
                min_value: Some(Datum::Int64(lo)),
                max_value: Some(Datum::Int64(hi)),
            })
            .collect();
        TableDistribution {
            table,
            name: "events".into(),
            method: PartitionMethod::Range,
            partition_column: Some(ColumnId(0)),
            partition_column_name: Some("event_id".into()),
            colocation_group: None,
            intervals,
            uniform_hash: false,
        }
    }

    fn append_dist(bounds: &[(i64, i64, u64)]) -> TableDistribution {
        let table = TableId(5);
        let intervals = bounds
            .iter()
            .map(|&(lo, hi, id)| PartitionInterval {
                shard: ShardId(id),
                table,
                method: PartitionMethod::Append,
                min_value: Some(Datum::Int64(lo)),
                max_value: Some(Datum::Int64(hi)),
            })
            .collect();
        TableDistribution {
            table,
            name: "logs".into(),
            method: PartitionMethod::Append,
            partition_column: Some(ColumnId(0)),
            partition_column_name: Some("log_id".into()),
            colocation_group: None,
            intervals,
            uniform_hash: false,
        }
    }

    fn part_col() -> Expr {
        Expr::Column(ColumnRef { rte_index: 0, column: ColumnId(0) })
    }

    #[test]
    fn test_hash_equality_prunes_to_one_shard() {
        let dist = hash_dist(8);
        for value in 0..200_i64 {
            let clause = Expr::eq(part_col(), Expr::Literal(Datum::Int64(value)));
            let pruned = prune_shards(&dist, &[&clause]);
            assert_eq!(pruned.len(), 1, "value {} must map to one shard", value);
            let expected = dist.find_interval_for_value(&Datum::Int64(value)).unwrap();
            assert_eq!(pruned[0].shard, expected.shard);
        }
    }

    #[test]
    fn test_unconstrained_keeps_all_shards() {
        let dist = hash_dist(4);
        let unrelated = Expr::eq(
            Expr::Column(ColumnRef { rte_index: 0, column: ColumnId(3) }),
            Expr::Literal(Datum::Text("x".into())),
        );
        assert_eq!(prune_shards(&dist, &[&unrelated]).len(), 4);
        assert_eq!(prune_shards(&dist, &[]).len(), 4);
    }

    #[test]
    fn test_contradiction_prunes_everything() {
        let dist = hash_dist(4);
        let clause = Expr::Literal(Datum::Boolean(false));
        assert!(prune_shards(&dist, &[&clause]).is_empty());
    }

    #[test]
    fn test_hash_token_interval_selects_matching_shards() {
        let dist = hash_dist(4);
        // Bounds exactly covering the second shard.
        let (lo, hi) = dist.intervals[1].token_bounds().unwrap();
        let col = ColumnRef { rte_index: 0, column: ColumnId(0) };
        let ge = Expr::cmp(
            BinOp::GtEq,
            Expr::PartitionHash(col),
            Expr::Literal(Datum::Int64(lo)),
        );
        let le = Expr::cmp(
            BinOp::LtEq,
            Expr::PartitionHash(col),
            Expr::Literal(Datum::Int64(hi)),
        );
        let pruned = prune_shards(&dist, &[&ge, &le]);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].shard, dist.intervals[1].shard);
    }

    #[test]
    fn test_equality_combined_with_token_bounds() {
        let dist = hash_dist(4);
        let eq = Expr::eq(part_col(), Expr::Literal(Datum::Int64(42)));
        let owner = dist.find_interval_for_value(&Datum::Int64(42)).unwrap().shard;
        let col = ColumnRef { rte_index: 0, column: ColumnId(0) };
        for interval in &dist.intervals {
            let (lo, hi) = interval.token_bounds().unwrap();
            let ge = Expr::cmp(
                BinOp::GtEq,
                Expr::PartitionHash(col),
                Expr::Literal(Datum::Int64(lo)),
            );
            let le = Expr::cmp(
                BinOp::LtEq,
                Expr::PartitionHash(col),
                Expr::Literal(Datum::Int64(hi)),
            );
            let pruned = prune_shards(&dist, &[&eq, &ge, &le]);
            if interval.shard == owner {
                assert_eq!(pruned.len(), 1);
                assert_eq!(pruned[0].shard, owner);
            } else {
                assert!(pruned.is_empty());
            }
        }
    }

    #[test]
    fn test_range_bounds_prune() {
        let dist = range_dist();
        let ge = Expr::cmp(BinOp::GtEq, part_col(), Expr::Literal(Datum::Int64(100)));
        let lt = Expr::cmp(BinOp::Lt, part_col(), Expr::Literal(Datum::Int64(200)));
        let pruned = prune_shards(&dist, &[&ge, &lt]);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].shard, ShardId(202));
    }

    #[test]
    fn test_range_exclusive_boundary() {
        let dist = range_dist();
        // col > 99 excludes the first shard even though 99 is its max.
        let gt = Expr::cmp(BinOp::Gt, part_col(), Expr::Literal(Datum::Int64(99)));
        let pruned = prune_shards(&dist, &[&gt]);
        assert_eq!(pruned.len(), 2);
        assert!(pruned.iter().all(|i| i.shard != ShardId(201)));
    }

    #[test]
    fn test_range_equality_outside_all_shards() {
        let dist = range_dist();
        let clause = Expr::eq(part_col(), Expr::Literal(Datum::Int64(1000)));
        assert!(prune_shards(&dist, &[&clause]).is_empty());
    }

    #[test]
    fn test_append_equality_prunes_by_value_bounds() {
        let dist = append_dist(&[(0, 99, 501), (100, 199, 502)]);
        let clause = Expr::eq(part_col(), Expr::Literal(Datum::Int64(50)));
        let pruned = prune_shards(&dist, &[&clause]);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].shard, ShardId(501));

        let gt = Expr::cmp(BinOp::Gt, part_col(), Expr::Literal(Datum::Int64(99)));
        let pruned = prune_shards(&dist, &[&gt]);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].shard, ShardId(502));
    }

    #[test]
    fn test_append_overlapping_intervals_keep_every_match() {
        let dist = append_dist(&[(0, 149, 501), (100, 199, 502)]);
        let clause = Expr::eq(part_col(), Expr::Literal(Datum::Int64(120)));
        let pruned = prune_shards(&dist, &[&clause]);
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn test_adding_conjuncts_never_widens_result() {
        let dist = range_dist();
        let base = Expr::cmp(BinOp::GtEq, part_col(), Expr::Literal(Datum::Int64(50)));
        let extra = Expr::cmp(BinOp::Lt, part_col(), Expr::Literal(Datum::Int64(150)));
        let loose: Vec<_> = prune_shards(&dist, &[&base])
            .iter()
            .map(|i| i.shard)
            .collect();
        let tight: Vec<_> = prune_shards(&dist, &[&base, &extra])
            .iter()
            .map(|i| i.shard)
            .collect();
        assert!(tight.iter().all(|shard| loose.contains(shard)));
        assert!(tight.len() <= loose.len());
    }

    #[test]
    fn test_fast_insert_pruning_matches_predicate_pruning() {
        let dist = hash_dist(6);
        for value in [-5_i64, 0, 3, 1_000_003] {
            let fast = fast_prune_insert(&dist, &Datum::Int64(value)).unwrap();
            let clause = Expr::eq(part_col(), Expr::Literal(Datum::Int64(value)));
            let slow = prune_shards(&dist, &[&clause]);
            assert_eq!(slow.len(), 1);
            assert_eq!(fast.shard, slow[0].shard);
        }
    }
}
