//! Distribution metadata: how each table is partitioned into shards, where
//! shard placements live, and which worker nodes exist.
//!
//! The snapshot is immutable during planning; the planner reads it through
//! shared references and never mutates it.

use kestrel_common::datum::Datum;
use kestrel_common::types::{ColocationGroupId, ColumnId, ShardId, TableId, WorkerNode};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// Rows map to shards by the hash token of the partition column.
    Hash,
    /// Shards own contiguous value ranges of the partition column.
    Range,
    /// Append-only staging; intervals may overlap and are never pruned by
    /// equality alone.
    Append,
    /// Fully replicated to every worker, no partition column.
    Reference,
}

/// One shard of a table: its id plus the closed interval of partition values
/// (hash tokens for hash tables, column values for range tables) it owns.
/// Reference and append shards may leave the bounds unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionInterval {
    pub shard: ShardId,
    pub table: TableId,
    pub method: PartitionMethod,
    pub min_value: Option<Datum>,
    pub max_value: Option<Datum>,
}

impl PartitionInterval {
    /// Both bounds present and non-null.
    pub fn has_valid_bounds(&self) -> bool {
        matches!((&self.min_value, &self.max_value), (Some(min), Some(max))
            if !min.is_null() && !max.is_null())
    }

    /// Hash-token bounds for a hash-partitioned shard.
    pub fn token_bounds(&self) -> Option<(i64, i64)> {
        let min = self.min_value.as_ref()?.as_i64()?;
        let max = self.max_value.as_ref()?.as_i64()?;
        Some((min, max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementState {
    Active,
    Inactive,
}

/// One physical copy of a shard on a worker node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardPlacement {
    pub shard: ShardId,
    pub node: WorkerNode,
    pub state: PlacementState,
}

/// Per-table distribution descriptor.
#[derive(Debug, Clone)]
pub struct TableDistribution {
    pub table: TableId,
    pub name: String,
    pub method: PartitionMethod,
    pub partition_column: Option<ColumnId>,
    pub partition_column_name: Option<String>,
    pub colocation_group: Option<ColocationGroupId>,
    /// Sorted ascending by `min_value` for hash and range tables.
    pub intervals: Vec<PartitionInterval>,
    /// Hash tables created by even tiling of the token space allow O(1)
    /// bucket lookup instead of binary search.
    pub uniform_hash: bool,
}

impl TableDistribution {
    pub fn shard_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_reference(&self) -> bool {
        self.method == PartitionMethod::Reference
    }

    pub fn is_partition_column(&self, column: ColumnId) -> bool {
        self.partition_column == Some(column)
    }

    pub fn partition_column_label(&self) -> String {
        self.partition_column_name
            .clone()
            .unwrap_or_else(|| "?".to_string())
    }

    /// Build a hash-distributed table whose shards evenly tile the i64 token
    /// space, the layout every shard-creation path produces.
    pub fn uniform_hash(
        table: TableId,
        name: impl Into<String>,
        partition_column: ColumnId,
        partition_column_name: impl Into<String>,
        colocation_group: ColocationGroupId,
        shard_ids: &[ShardId],
    ) -> Self {
        let count = (shard_ids.len() as i128).max(1);
        let span = (i64::MAX as i128) - (i64::MIN as i128) + 1;
        let step = span / count;
        let intervals = shard_ids
            .iter()
            .enumerate()
            .map(|(i, &shard)| {
                let min = (i64::MIN as i128) + step * i as i128;
                let max = if i as i128 == count - 1 {
                    i64::MAX as i128
                } else {
                    min + step - 1
                };
                PartitionInterval {
                    shard,
                    table,
                    method: PartitionMethod::Hash,
                    min_value: Some(Datum::Int64(min as i64)),
                    max_value: Some(Datum::Int64(max as i64)),
                }
            })
            .collect();
        Self {
            table,
            name: name.into(),
            method: PartitionMethod::Hash,
            partition_column: Some(partition_column),
            partition_column_name: Some(partition_column_name.into()),
            colocation_group: Some(colocation_group),
            intervals,
            uniform_hash: true,
        }
    }

    /// Find the single shard owning a partition value, if any.  Hash tables
    /// look up by token (O(1) for uniform layouts, binary search otherwise);
    /// range tables binary-search the value itself.  Append tables have no
    /// single-owner guarantee and always return `None`.
    pub fn find_interval_for_value(&self, value: &Datum) -> Option<&PartitionInterval> {
        if value.is_null() {
            return None;
        }
        match self.method {
            PartitionMethod::Hash => {
                let token = value.partition_hash_token();
                if self.uniform_hash && !self.intervals.is_empty() {
                    let count = self.intervals.len() as i128;
                    let span = (i64::MAX as i128) - (i64::MIN as i128) + 1;
                    let step = span / count;
                    let offset = (token as i128) - (i64::MIN as i128);
                    let bucket = (offset / step).min(count - 1) as usize;
                    return Some(&self.intervals[bucket]);
                }
                self.search_intervals(&Datum::Int64(token))
            }
            PartitionMethod::Range => self.search_intervals(value),
            PartitionMethod::Append | PartitionMethod::Reference => None,
        }
    }

    fn search_intervals(&self, value: &Datum) -> Option<&PartitionInterval> {
        let mut lo = 0usize;
        let mut hi = self.intervals.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let interval = &self.intervals[mid];
            let min = interval.min_value.as_ref()?;
            let max = interval.max_value.as_ref()?;
            match value.try_cmp(min)? {
                Ordering::Less => hi = mid,
                _ => match value.try_cmp(max)? {
                    Ordering::Greater => lo = mid + 1,
                    _ => return Some(interval),
                },
            }
        }
        None
    }
}

/// A consistent view of all distribution metadata the planner needs.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    tables: HashMap<TableId, TableDistribution>,
    placements: HashMap<ShardId, Vec<ShardPlacement>>,
    workers: Vec<WorkerNode>,
}

impl MetadataSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, dist: TableDistribution) {
        self.tables.insert(dist.table, dist);
    }

    pub fn add_placement(&mut self, placement: ShardPlacement) {
        self.placements
            .entry(placement.shard)
            .or_default()
            .push(placement);
    }

    pub fn add_worker(&mut self, node: WorkerNode) {
        self.workers.push(node);
    }

    pub fn table(&self, table: TableId) -> Option<&TableDistribution> {
        self.tables.get(&table)
    }

    /// Active placements of a shard, in catalog insertion order.
    pub fn active_placements(&self, shard: ShardId) -> Vec<ShardPlacement> {
        self.placements
            .get(&shard)
            .map(|list| {
                list.iter()
                    .filter(|p| p.state == PlacementState::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First registered worker node, used to host dummy placements for
    /// fully-pruned read-only plans.
    pub fn first_live_worker(&self) -> Option<&WorkerNode> {
        self.workers.first()
    }

    /// Two tables are colocated when they share a colocation group.
    pub fn tables_colocated(&self, a: TableId, b: TableId) -> bool {
        if a == b {
            return true;
        }
        match (self.table(a), self.table(b)) {
            (Some(ta), Some(tb)) => match (ta.colocation_group, tb.colocation_group) {
                (Some(ga), Some(gb)) => ga == gb,
                _ => false,
            },
            _ => false,
        }
    }
}
