//! The router planner: turns statements whose answer lives on one shard (or,
//! for INSERT ... SELECT fan-out, one shard per task) into executable jobs.
//!
//! `plan` returns `Ok(None)` when a SELECT is not router-eligible; the caller
//! falls back to general distributed planning.  Modifications never fall
//! back: they either route or fail with a specific error.

use kestrel_common::datum::Datum;
use kestrel_common::types::{ShardId, TableId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{MetadataSnapshot, PartitionInterval, PartitionMethod, TableDistribution};
use crate::error::{Result, RouterError};
use crate::expr::{add_conjunct, ColumnRef, Expr};
use crate::insert_select::{
    add_deferred_partition_restriction, instantiate_partition_placeholders,
    reorder_insert_select_target_lists, shard_bound_conjunction, validate_insert_select,
};
use crate::locks::ShardMetadataLocks;
use crate::placement::{dummy_placement, intersect_placements};
use crate::prune::{fast_prune_insert, prune_shards};
use crate::statement::{CommandType, RestrictionContext, Statement};
use crate::task::{Job, RelationShard, ShardQueryDeparser, Task, TaskKind, TaskPlacement};
use crate::validate::validate_modification;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// When false, SELECTs always fall back to general planning;
    /// modifications still route.
    pub enable_select_routing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { enable_select_routing: true }
    }
}

/// Outcome of routing the read side of a statement.
enum SelectRoute {
    Routed {
        placements: Vec<TaskPlacement>,
        anchor: Option<ShardId>,
        relation_shards: Vec<RelationShard>,
    },
    /// Some relation's shards were all pruned away; the result is empty.
    AllShardsPruned,
    /// More than one shard (or no common placement) remains.
    NotRoutable,
}

pub struct RouterPlanner<'a> {
    snapshot: &'a MetadataSnapshot,
    deparser: &'a dyn ShardQueryDeparser,
    locks: &'a ShardMetadataLocks,
    config: RouterConfig,
}

impl<'a> RouterPlanner<'a> {
    pub fn new(
        snapshot: &'a MetadataSnapshot,
        deparser: &'a dyn ShardQueryDeparser,
        locks: &'a ShardMetadataLocks,
        config: RouterConfig,
    ) -> Self {
        Self { snapshot, deparser, locks, config }
    }

    /// Plan a statement as a router job.  `Ok(None)` means "not router
    /// plannable, fall back" and is only possible for reads.
    pub fn plan(&self, stmt: &Statement, ctx: &RestrictionContext) -> Result<Option<Job>> {
        if stmt.command.is_modification() {
            if stmt.is_insert_select() {
                return self.plan_insert_select(stmt, ctx).map(Some);
            }
            return self.plan_modify(stmt, ctx).map(Some);
        }
        self.plan_select(stmt, ctx)
    }

    fn plan_select(&self, stmt: &Statement, ctx: &RestrictionContext) -> Result<Option<Job>> {
        if !self.config.enable_select_routing {
            return Ok(None);
        }
        if stmt.for_update {
            debug!("FOR UPDATE query is not router plannable");
            return Ok(None);
        }
        // Router reads are only defined over hash-distributed and fully
        // replicated tables.
        for select in stmt.self_and_subqueries() {
            for (_, table) in select.relation_entries() {
                match self.snapshot.table(table) {
                    Some(dist)
                        if matches!(
                            dist.method,
                            PartitionMethod::Hash | PartitionMethod::Reference
                        ) => {}
                    _ => return Ok(None),
                }
            }
        }

        match self.route_select(ctx)? {
            SelectRoute::Routed { placements, anchor, relation_shards } => {
                let task = self.build_task(
                    stmt,
                    TaskKind::Read,
                    1,
                    anchor,
                    placements,
                    relation_shards,
                    false,
                )?;
                Ok(Some(Job::single_task(task, false)))
            }
            SelectRoute::AllShardsPruned => {
                // Still execute somewhere to produce the empty result.
                let Some(placement) = dummy_placement(self.snapshot) else {
                    debug!("no worker available for fully-pruned read");
                    return Ok(None);
                };
                let task =
                    self.build_task(stmt, TaskKind::Read, 1, None, vec![placement], vec![], false)?;
                Ok(Some(Job::single_task(task, false)))
            }
            SelectRoute::NotRoutable => Ok(None),
        }
    }

    /// Route a read using the restriction context: every relation must prune
    /// to at most one shard, and all surviving shards must share a worker.
    ///
    /// Relations that prune to nothing contribute no shard and are skipped;
    /// only when no relation contributed any shard at all does the whole
    /// read collapse to the dummy-placement case.
    fn route_select(&self, ctx: &RestrictionContext) -> Result<SelectRoute> {
        if ctx.relations.is_empty() {
            return Ok(SelectRoute::NotRoutable);
        }

        let mut shard_by_table: Vec<(TableId, ShardId)> = Vec::new();
        let mut relation_shards: Vec<RelationShard> = Vec::new();
        let mut placement_lists = Vec::new();
        let mut anchor: Option<ShardId> = None;

        for restriction in &ctx.relations {
            let Some(dist) = self.snapshot.table(restriction.table) else {
                return Ok(SelectRoute::NotRoutable);
            };
            if dist.is_reference() {
                if let Some(interval) = dist.intervals.first() {
                    relation_shards
                        .push(RelationShard { table: dist.table, shard: interval.shard });
                    placement_lists.push(self.snapshot.active_placements(interval.shard));
                }
                continue;
            }
            if restriction.has_false_clause() {
                continue;
            }

            let conjuncts: Vec<&Expr> = restriction
                .restrictions
                .iter()
                .flat_map(|expr| expr.conjuncts())
                .collect();
            let pruned = prune_shards(dist, &conjuncts);
            match pruned.as_slice() {
                [] => continue,
                [interval] => {
                    // Two references to one table must agree on the shard.
                    if let Some((_, prior)) =
                        shard_by_table.iter().find(|(t, _)| *t == dist.table)
                    {
                        if *prior != interval.shard {
                            return Ok(SelectRoute::NotRoutable);
                        }
                    } else {
                        shard_by_table.push((dist.table, interval.shard));
                        relation_shards
                            .push(RelationShard { table: dist.table, shard: interval.shard });
                        placement_lists.push(self.snapshot.active_placements(interval.shard));
                    }
                    anchor.get_or_insert(interval.shard);
                }
                _ => return Ok(SelectRoute::NotRoutable),
            }
        }

        if relation_shards.is_empty() {
            return Ok(SelectRoute::AllShardsPruned);
        }

        let placements = intersect_placements(&placement_lists);
        if placements.is_empty() {
            debug!("surviving shards share no worker node");
            return Ok(SelectRoute::NotRoutable);
        }
        Ok(SelectRoute::Routed { placements, anchor, relation_shards })
    }

    fn plan_modify(&self, stmt: &Statement, ctx: &RestrictionContext) -> Result<Job> {
        let dist = self.target_distribution(stmt)?;
        validate_modification(stmt, dist)?;

        let shard = self.target_shard_for_modify(stmt, ctx, dist)?;

        // Shared metadata lock: placement capture and deparse see a stable
        // placement set even if a shard move is pending.
        let _guard = self.locks.share(shard);

        let placements: Vec<TaskPlacement> = self
            .snapshot
            .active_placements(shard)
            .into_iter()
            .map(|p| TaskPlacement { node: p.node, shard: Some(p.shard) })
            .collect();
        if placements.is_empty() {
            warn!(shard = %shard, "modification target shard has no active placements");
            return Err(RouterError::NoShardPlacements { shard });
        }

        let relation_shards = vec![RelationShard { table: dist.table, shard }];
        let task = self.build_task(
            stmt,
            TaskKind::Modify,
            1,
            Some(shard),
            placements,
            relation_shards,
            false,
        )?;
        debug!(shard = %shard, "routed modification to single shard");
        Ok(Job::single_task(task, stmt.requires_coordinator_evaluation()))
    }

    fn target_distribution(&self, stmt: &Statement) -> Result<&'a TableDistribution> {
        let table = stmt
            .result_table()
            .ok_or(RouterError::NoShards { table: "?".into() })?;
        self.snapshot
            .table(table)
            .ok_or(RouterError::NoShards { table: table.to_string() })
    }

    /// Resolve the single shard a modification targets.
    fn target_shard_for_modify(
        &self,
        stmt: &Statement,
        ctx: &RestrictionContext,
        dist: &TableDistribution,
    ) -> Result<ShardId> {
        if dist.shard_count() == 0 {
            return Err(RouterError::NoShards { table: dist.name.clone() });
        }

        if stmt.command == CommandType::Insert {
            let value = self.insert_partition_value(stmt, dist)?;
            if value.is_null() {
                return Err(RouterError::NullPartitionValue);
            }
            // Hash and range layouts resolve the owning shard directly.
            if matches!(dist.method, PartitionMethod::Hash | PartitionMethod::Range) {
                return match fast_prune_insert(dist, &value) {
                    Some(interval) => Ok(interval.shard),
                    None => Err(RouterError::NotSingleShardModification {
                        detail: ": this command modifies no shards",
                        partition_column: dist.partition_column_label(),
                    }),
                };
            }
            // Other layouts prune on a synthesized partition equality; the
            // single-shard requirement still applies.
            let Some(column) = dist.partition_column else {
                return Err(RouterError::NonConstantPartitionValue);
            };
            let rte_index = stmt.result_relation.unwrap_or(0);
            let synthesized = Expr::eq(
                Expr::Column(ColumnRef { rte_index, column }),
                Expr::Literal(value),
            );
            let pruned = prune_shards(dist, &[&synthesized]);
            return match pruned.as_slice() {
                [interval] => Ok(interval.shard),
                [] => Err(RouterError::NotSingleShardModification {
                    detail: ": this command modifies no shards",
                    partition_column: dist.partition_column_label(),
                }),
                _ => Err(RouterError::NotSingleShardModification {
                    detail: "",
                    partition_column: dist.partition_column_label(),
                }),
            };
        }

        // UPDATE/DELETE: prune on the filter plus the planner's restriction
        // context for the target relation.
        let mut conjuncts: Vec<&Expr> = stmt
            .filter
            .iter()
            .flat_map(|filter| filter.conjuncts())
            .collect();
        if let Some(restriction) = ctx.relation(dist.table) {
            conjuncts.extend(restriction.restrictions.iter().flat_map(|e| e.conjuncts()));
            conjuncts.extend(restriction.join_pseudo_constants.iter());
        }

        let pruned = prune_shards(dist, &conjuncts);
        match pruned.as_slice() {
            [interval] => Ok(interval.shard),
            [] => Err(RouterError::NotSingleShardModification {
                detail: ": this command modifies no shards",
                partition_column: dist.partition_column_label(),
            }),
            rest => Err(RouterError::NotSingleShardModification {
                detail: if rest.len() == dist.shard_count() {
                    ": this command modifies all shards"
                } else {
                    ""
                },
                partition_column: dist.partition_column_label(),
            }),
        }
    }

    fn insert_partition_value(&self, stmt: &Statement, dist: &TableDistribution) -> Result<Datum> {
        let entry = stmt
            .target_list
            .iter()
            .find(|entry| dist.is_partition_column(entry.column))
            .ok_or(RouterError::NullPartitionValue)?;
        match &entry.expr {
            Expr::Literal(value) => Ok(value.clone()),
            _ => Err(RouterError::NonConstantPartitionValue),
        }
    }

    /// Fan an INSERT ... SELECT out into one modify task per target shard.
    /// Shards whose instantiated SELECT prunes to nothing are skipped.
    fn plan_insert_select(&self, stmt: &Statement, ctx: &RestrictionContext) -> Result<Job> {
        let dist = self.target_distribution(stmt)?;
        validate_modification(stmt, dist)?;
        let source_table = validate_insert_select(stmt, ctx, self.snapshot)?;

        let mut prepared = stmt.clone();
        add_deferred_partition_restriction(&mut prepared, self.snapshot);

        let mut tasks = Vec::new();
        let mut task_id: u32 = 1;
        for interval in &dist.intervals {
            if let Some(task) =
                self.fanout_task(&prepared, ctx, dist, source_table, interval, task_id)?
            {
                tasks.push(task);
                task_id += 1;
            }
        }

        debug!(
            target = %dist.table,
            task_count = tasks.len(),
            "fanned INSERT ... SELECT out over target shards"
        );
        Ok(Job {
            tasks,
            requires_coordinator_evaluation: stmt.requires_coordinator_evaluation(),
            dependencies: Vec::new(),
        })
    }

    /// Build the modify task targeting one shard of the insert target, or
    /// `None` when the shard's slice of the source is provably empty.
    fn fanout_task(
        &self,
        stmt: &Statement,
        ctx: &RestrictionContext,
        dist: &TableDistribution,
        source_table: TableId,
        interval: &PartitionInterval,
        task_id: u32,
    ) -> Result<Option<Task>> {
        let _guard = self.locks.share(interval.shard);

        let mut shard_stmt = stmt.clone();
        let mut shard_ctx = ctx.clone();

        // Reference-table-only sources produce identical rows for every
        // target shard; no per-shard narrowing applies.
        if !ctx.all_reference_tables {
            self.narrow_to_shard(&mut shard_stmt, &mut shard_ctx, source_table, interval);
        }

        let route = self.route_select(&shard_ctx)?;
        let (select_placements, mut relation_shards) = match route {
            SelectRoute::NotRoutable => {
                return Err(RouterError::FanoutSelectNotRoutable { shard: interval.shard })
            }
            SelectRoute::AllShardsPruned => {
                debug!(shard = %interval.shard, "skipping target shard with empty source slice");
                return Ok(None);
            }
            SelectRoute::Routed { placements, relation_shards, .. } => {
                (placements, relation_shards)
            }
        };

        // The insert must run on every replica of the target shard, and each
        // replica must also be able to run the SELECT side.
        let insert_placements = self.snapshot.active_placements(interval.shard);
        if insert_placements.is_empty() {
            warn!(shard = %interval.shard, "insert target shard has no active placements");
            return Err(RouterError::NoShardPlacements { shard: interval.shard });
        }
        let joint: Vec<TaskPlacement> = insert_placements
            .iter()
            .filter(|p| select_placements.iter().any(|sp| sp.node == p.node))
            .map(|p| TaskPlacement { node: p.node.clone(), shard: Some(interval.shard) })
            .collect();
        if joint.len() != insert_placements.len() {
            return Err(RouterError::PlacementMismatch { shard: interval.shard });
        }

        reorder_insert_select_target_lists(&mut shard_stmt)?;

        relation_shards.insert(0, RelationShard { table: dist.table, shard: interval.shard });
        let task = self.build_task(
            &shard_stmt,
            TaskKind::Modify,
            task_id,
            Some(interval.shard),
            joint,
            relation_shards,
            true,
        )?;
        Ok(Some(task))
    }

    /// Instantiate the deferred partition restriction with one shard's
    /// bounds, in both the statement's SELECT filter and the restriction
    /// context used for pruning.
    fn narrow_to_shard(
        &self,
        stmt: &mut Statement,
        ctx: &mut RestrictionContext,
        source_table: TableId,
        interval: &PartitionInterval,
    ) {
        if let Some(subquery) = stmt.subquery_mut() {
            if let Some(filter) = subquery.filter.take() {
                subquery.filter = Some(instantiate_partition_placeholders(&filter, interval));
            }
        }
        for restriction in &mut ctx.relations {
            for expr in &mut restriction.restrictions {
                *expr = instantiate_partition_placeholders(expr, interval);
            }
        }

        // Make the shard bound visible to pruning even when the caller's
        // restrictions never mentioned the source partition column.
        let source_rte = stmt
            .subquery()
            .and_then(|sq| {
                sq.relation_entries()
                    .into_iter()
                    .find(|(_, table)| *table == source_table)
            })
            .map(|(index, _)| index);
        let partition_column = self
            .snapshot
            .table(source_table)
            .and_then(|dist| dist.partition_column);
        if let (Some(rte_index), Some(column)) = (source_rte, partition_column) {
            let column_ref = ColumnRef { rte_index, column };
            if let Some(bound) = shard_bound_conjunction(column_ref, interval) {
                if let Some(restriction) =
                    ctx.relations.iter_mut().find(|r| r.table == source_table)
                {
                    restriction.restrictions.push(bound.clone());
                }
                if let Some(subquery) = stmt.subquery_mut() {
                    add_conjunct(&mut subquery.filter, bound);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_task(
        &self,
        stmt: &Statement,
        kind: TaskKind,
        task_id: u32,
        anchor_shard: Option<ShardId>,
        placements: Vec<TaskPlacement>,
        relation_shards: Vec<RelationShard>,
        insert_select_fanout: bool,
    ) -> Result<Task> {
        let query = self.deparser.deparse(stmt, &relation_shards);
        Ok(Task {
            task_id,
            kind,
            query,
            anchor_shard,
            placements,
            relation_shards,
            upsert: stmt.on_conflict.is_some(),
            insert_select_fanout,
        })
    }
}
