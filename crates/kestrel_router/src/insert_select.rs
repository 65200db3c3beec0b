//! INSERT ... SELECT support: eligibility checks, the deferred partition
//! restriction and its per-shard instantiation, and target-list reordering so
//! the SELECT's output columns line up with the INSERT's columns.

use kestrel_common::types::TableId;

use crate::catalog::{MetadataSnapshot, PartitionInterval, PartitionMethod, TableDistribution};
use crate::error::{Result, RouterError};
use crate::expr::{add_conjunct, BinOp, ColumnRef, Expr};
use crate::statement::{RestrictionContext, Statement, TargetEntry};

fn unsupported(detail: impl Into<String>) -> RouterError {
    RouterError::InsertSelectUnsupported { detail: detail.into() }
}

/// The insert target entry assigning the target table's partition column.
fn partition_target_entry<'a>(
    stmt: &'a Statement,
    dist: &TableDistribution,
) -> Option<&'a TargetEntry> {
    stmt.target_list
        .iter()
        .find(|entry| dist.is_partition_column(entry.column))
}

/// Add the deferred partition restriction to the SELECT side of an
/// INSERT ... SELECT: a placeholder equality on the source column feeding the
/// target partition column, instantiated later with each target shard's
/// bounds.
///
/// Skipped when the source column is not a bare column reference or the
/// SELECT is a set operation (there is no single filter to extend); the
/// fan-out then relies on the injected shard-bound filter alone.
pub fn add_deferred_partition_restriction(stmt: &mut Statement, snapshot: &MetadataSnapshot) {
    let Some(target_table) = stmt.result_table() else {
        return;
    };
    let Some(dist) = snapshot.table(target_table) else {
        return;
    };
    let Some(subquery_rte) = stmt.subquery_rte_index() else {
        return;
    };
    let Some(entry) = partition_target_entry(stmt, dist) else {
        return;
    };
    let Expr::Column(insert_col) = &entry.expr else {
        return;
    };
    if insert_col.rte_index != subquery_rte {
        return;
    }
    let ordinal = insert_col.column.0 as usize;

    let Some(subquery) = stmt.subquery_mut() else {
        return;
    };
    if subquery.set_operation.is_some() {
        return;
    }
    let Some(source_entry) = subquery.target_list.get(ordinal) else {
        return;
    };
    let Expr::Column(source_col) = source_entry.expr else {
        return;
    };
    add_conjunct(
        &mut subquery.filter,
        Expr::eq(Expr::Column(source_col), Expr::PartitionPlaceholder),
    );
}

/// Check that an INSERT ... SELECT can be fanned out shard by shard, and
/// resolve the source table whose partition column feeds the target's.
pub fn validate_insert_select(
    stmt: &Statement,
    ctx: &RestrictionContext,
    snapshot: &MetadataSnapshot,
) -> Result<TableId> {
    if stmt.contains_volatile_functions() {
        return Err(unsupported("volatile functions are not allowed"));
    }

    let subquery = stmt
        .subquery()
        .ok_or_else(|| unsupported("missing SELECT source"))?;

    for select in subquery.self_and_subqueries() {
        if select.limit.is_some() || select.offset.is_some() {
            return Err(unsupported("LIMIT and OFFSET clauses are not allowed"));
        }
        if select.has_window_functions {
            return Err(unsupported("window functions are not allowed"));
        }
        if select.set_operation.is_some() {
            return Err(unsupported("set operations are not allowed"));
        }
        if select.has_grouping_sets {
            return Err(unsupported("grouping sets are not allowed"));
        }
        if select.has_distinct_on {
            return Err(unsupported("DISTINCT ON clauses are not allowed"));
        }
    }

    let target_table = stmt
        .result_table()
        .ok_or_else(|| unsupported("missing INSERT target relation"))?;
    let target_dist = snapshot
        .table(target_table)
        .ok_or_else(|| unsupported("INSERT target is not distributed"))?;

    if target_dist.is_reference() {
        if ctx.all_reference_tables {
            return Ok(target_table);
        }
        return Err(unsupported(
            "only fully replicated tables may feed a fully replicated target",
        ));
    }

    let subquery_rte = stmt
        .subquery_rte_index()
        .ok_or_else(|| unsupported("missing SELECT source"))?;
    let entry = partition_target_entry(stmt, target_dist).ok_or_else(|| {
        unsupported("the partition column of the target table must be assigned")
    })?;
    let Expr::Column(insert_col) = &entry.expr else {
        return Err(unsupported(
            "the partition column value must come directly from the SELECT",
        ));
    };
    if insert_col.rte_index != subquery_rte {
        return Err(unsupported(
            "the partition column value must come directly from the SELECT",
        ));
    }
    let source_entry = subquery
        .target_list
        .get(insert_col.column.0 as usize)
        .ok_or_else(|| unsupported("partition column ordinal out of range"))?;
    let Expr::Column(source_col) = &source_entry.expr else {
        return Err(unsupported(
            "the partition column value must be a column of the source table",
        ));
    };

    let source_table = match subquery.range_table.get(source_col.rte_index) {
        Some(crate::statement::RangeTableEntry::Relation { table }) => *table,
        _ => {
            return Err(unsupported(
                "the partition column value must be a column of the source table",
            ))
        }
    };
    let source_dist = snapshot
        .table(source_table)
        .ok_or_else(|| unsupported("SELECT source is not distributed"))?;
    if !source_dist.is_partition_column(source_col.column) {
        return Err(unsupported(
            "the partition column value must come from the source table's partition column",
        ));
    }
    if !snapshot.tables_colocated(target_table, source_table) {
        return Err(RouterError::ColocationMismatch);
    }
    Ok(source_table)
}

/// The predicate confining a column to one shard's interval: hash-token
/// bounds for hash tables, value bounds for range tables.
pub fn shard_bound_conjunction(
    column: ColumnRef,
    interval: &PartitionInterval,
) -> Option<Expr> {
    let min = interval.min_value.clone()?;
    let max = interval.max_value.clone()?;
    let (lower_operand, upper_operand) = match interval.method {
        PartitionMethod::Hash => (Expr::PartitionHash(column), Expr::PartitionHash(column)),
        PartitionMethod::Range => (Expr::Column(column), Expr::Column(column)),
        PartitionMethod::Append | PartitionMethod::Reference => return None,
    };
    Some(Expr::and(
        Expr::cmp(BinOp::GtEq, lower_operand, Expr::Literal(min)),
        Expr::cmp(BinOp::LtEq, upper_operand, Expr::Literal(max)),
    ))
}

/// Replace every placeholder equality `col = <placeholder>` in the tree with
/// the given shard's bound predicate, leaving everything else untouched.
pub fn instantiate_partition_placeholders(expr: &Expr, interval: &PartitionInterval) -> Expr {
    if let Expr::BinaryOp { op: BinOp::Eq, left, right } = expr {
        let column = match (left.as_ref(), right.as_ref()) {
            (Expr::Column(col), Expr::PartitionPlaceholder)
            | (Expr::PartitionPlaceholder, Expr::Column(col)) => Some(*col),
            _ => None,
        };
        if let Some(column) = column {
            if let Some(bound) = shard_bound_conjunction(column, interval) {
                return bound;
            }
        }
    }
    match expr {
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: *op,
            left: Box::new(instantiate_partition_placeholders(left, interval)),
            right: Box::new(instantiate_partition_placeholders(right, interval)),
        },
        Expr::Not(inner) => {
            Expr::Not(Box::new(instantiate_partition_placeholders(inner, interval)))
        }
        Expr::IsNull(inner) => {
            Expr::IsNull(Box::new(instantiate_partition_placeholders(inner, interval)))
        }
        Expr::Case { operand, conditions, results, else_result } => Expr::Case {
            operand: operand
                .as_ref()
                .map(|e| Box::new(instantiate_partition_placeholders(e, interval))),
            conditions: conditions
                .iter()
                .map(|e| instantiate_partition_placeholders(e, interval))
                .collect(),
            results: results
                .iter()
                .map(|e| instantiate_partition_placeholders(e, interval))
                .collect(),
            else_result: else_result
                .as_ref()
                .map(|e| Box::new(instantiate_partition_placeholders(e, interval))),
        },
        Expr::Coalesce(args) => Expr::Coalesce(
            args.iter()
                .map(|e| instantiate_partition_placeholders(e, interval))
                .collect(),
        ),
        Expr::FuncCall { name, volatility, args } => Expr::FuncCall {
            name: name.clone(),
            volatility: *volatility,
            args: args
                .iter()
                .map(|e| instantiate_partition_placeholders(e, interval))
                .collect(),
        },
        other => other.clone(),
    }
}

/// Align the SELECT's output columns with the INSERT's target list so that
/// output ordinal `i` feeds insert column `i`.
///
/// Bare references into the SELECT are repositioned; source-independent
/// expressions (constants, immutable computations without column references)
/// are pushed down into the SELECT's projection.  Expressions mixing the two
/// cannot be pushed down and reject the fan-out.
pub fn reorder_insert_select_target_lists(stmt: &mut Statement) -> Result<()> {
    let Some(subquery_rte) = stmt.subquery_rte_index() else {
        return Ok(());
    };
    let old_subquery_targets = stmt
        .subquery()
        .map(|sq| sq.target_list.clone())
        .unwrap_or_default();

    let mut new_subquery_targets: Vec<TargetEntry> = Vec::new();
    for (position, entry) in stmt.target_list.iter_mut().enumerate() {
        match &entry.expr {
            Expr::Column(col) if col.rte_index == subquery_rte => {
                let ordinal = col.column.0 as usize;
                let source = old_subquery_targets.get(ordinal).ok_or_else(|| {
                    unsupported("target list ordinal out of range")
                })?;
                new_subquery_targets.push(TargetEntry {
                    column: kestrel_common::types::ColumnId(position as u32),
                    name: entry.name.clone(),
                    expr: source.expr.clone(),
                });
            }
            expr if !expr.contains_column_reference() => {
                new_subquery_targets.push(TargetEntry {
                    column: kestrel_common::types::ColumnId(position as u32),
                    name: entry.name.clone(),
                    expr: expr.clone(),
                });
            }
            _ => {
                return Err(unsupported(
                    "expressions over source columns in the target list cannot be pushed down",
                ))
            }
        }
        entry.expr = Expr::Column(ColumnRef {
            rte_index: subquery_rte,
            column: kestrel_common::types::ColumnId(position as u32),
        });
    }

    if let Some(subquery) = stmt.subquery_mut() {
        subquery.target_list = new_subquery_targets;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{CommandType, RangeTableEntry};
    use kestrel_common::datum::Datum;
    use kestrel_common::types::{ColocationGroupId, ColumnId, ShardId};

    fn snapshot() -> MetadataSnapshot {
        let mut snap = MetadataSnapshot::new();
        snap.add_table(TableDistribution::uniform_hash(
            TableId(1),
            "orders",
            ColumnId(0),
            "order_id",
            ColocationGroupId(1),
            &[ShardId(101), ShardId(102)],
        ));
        snap.add_table(TableDistribution::uniform_hash(
            TableId(2),
            "orders_staging",
            ColumnId(0),
            "order_id",
            ColocationGroupId(1),
            &[ShardId(201), ShardId(202)],
        ));
        snap.add_table(TableDistribution::uniform_hash(
            TableId(3),
            "events",
            ColumnId(0),
            "event_id",
            ColocationGroupId(7),
            &[ShardId(301), ShardId(302)],
        ));
        snap
    }

    /// INSERT INTO orders (order_id, total) SELECT order_id, total FROM
    /// orders_staging, with the subquery as range-table entry 1.
    fn insert_select(source: TableId) -> Statement {
        let mut select = Statement::new(CommandType::Select);
        select.range_table.push(RangeTableEntry::Relation { table: source });
        select.target_list.push(TargetEntry {
            column: ColumnId(0),
            name: "order_id".into(),
            expr: Expr::Column(ColumnRef { rte_index: 0, column: ColumnId(0) }),
        });
        select.target_list.push(TargetEntry {
            column: ColumnId(1),
            name: "total".into(),
            expr: Expr::Column(ColumnRef { rte_index: 0, column: ColumnId(1) }),
        });

        let mut insert = Statement::new(CommandType::Insert);
        insert.range_table.push(RangeTableEntry::Relation { table: TableId(1) });
        insert.result_relation = Some(0);
        insert.range_table.push(RangeTableEntry::Subquery { statement: Box::new(select) });
        insert.target_list.push(TargetEntry {
            column: ColumnId(0),
            name: "order_id".into(),
            expr: Expr::Column(ColumnRef { rte_index: 1, column: ColumnId(0) }),
        });
        insert.target_list.push(TargetEntry {
            column: ColumnId(1),
            name: "total".into(),
            expr: Expr::Column(ColumnRef { rte_index: 1, column: ColumnId(1) }),
        });
        insert
    }

    #[test]
    fn test_deferred_restriction_added_to_select_filter() {
        let snap = snapshot();
        let mut stmt = insert_select(TableId(2));
        add_deferred_partition_restriction(&mut stmt, &snap);
        let filter = stmt.subquery().unwrap().filter.as_ref().unwrap();
        assert!(filter.contains_partition_placeholder());
    }

    #[test]
    fn test_colocated_source_accepted() {
        let snap = snapshot();
        let stmt = insert_select(TableId(2));
        let ctx = RestrictionContext::default();
        assert_eq!(validate_insert_select(&stmt, &ctx, &snap).unwrap(), TableId(2));
    }

    #[test]
    fn test_non_colocated_source_rejected() {
        let snap = snapshot();
        let stmt = insert_select(TableId(3));
        let ctx = RestrictionContext::default();
        assert!(matches!(
            validate_insert_select(&stmt, &ctx, &snap),
            Err(RouterError::ColocationMismatch)
        ));
    }

    #[test]
    fn test_limit_in_select_rejected() {
        let snap = snapshot();
        let mut stmt = insert_select(TableId(2));
        stmt.subquery_mut().unwrap().limit = Some(10);
        assert!(matches!(
            validate_insert_select(&stmt, &RestrictionContext::default(), &snap),
            Err(RouterError::InsertSelectUnsupported { .. })
        ));
    }

    #[test]
    fn test_placeholder_instantiated_with_shard_token_bounds() {
        let snap = snapshot();
        let dist = snap.table(TableId(2)).unwrap();
        let interval = &dist.intervals[0];
        let (lo, hi) = interval.token_bounds().unwrap();

        let column = ColumnRef { rte_index: 0, column: ColumnId(0) };
        let placeholder = Expr::eq(Expr::Column(column), Expr::PartitionPlaceholder);
        let instantiated = instantiate_partition_placeholders(&placeholder, interval);

        assert!(!instantiated.contains_partition_placeholder());
        let conjuncts = instantiated.conjuncts();
        assert_eq!(conjuncts.len(), 2);
        assert!(matches!(
            conjuncts[0],
            Expr::BinaryOp { op: BinOp::GtEq, .. }
        ));
        let constraints = crate::extract::extract_partition_constraints(dist, &conjuncts);
        assert_eq!(constraints.hash_lower, Some(lo));
        assert_eq!(constraints.hash_upper, Some(hi));
    }

    #[test]
    fn test_reorder_swapped_columns() {
        // INSERT (total, order_id) SELECT order_id, total: insert entries
        // reference subquery ordinals 1 and 0 respectively.
        let mut stmt = insert_select(TableId(2));
        stmt.target_list[0] = TargetEntry {
            column: ColumnId(1),
            name: "total".into(),
            expr: Expr::Column(ColumnRef { rte_index: 1, column: ColumnId(1) }),
        };
        stmt.target_list[1] = TargetEntry {
            column: ColumnId(0),
            name: "order_id".into(),
            expr: Expr::Column(ColumnRef { rte_index: 1, column: ColumnId(0) }),
        };
        reorder_insert_select_target_lists(&mut stmt).unwrap();

        let subquery = stmt.subquery().unwrap();
        // Output 0 now feeds insert entry 0 (total), output 1 feeds order_id.
        assert_eq!(subquery.target_list[0].name, "total");
        assert_eq!(subquery.target_list[1].name, "order_id");
        assert!(matches!(
            &stmt.target_list[0].expr,
            Expr::Column(c) if c.column == ColumnId(0)
        ));
        assert!(matches!(
            &stmt.target_list[1].expr,
            Expr::Column(c) if c.column == ColumnId(1)
        ));
    }

    #[test]
    fn test_reorder_pushes_constants_into_select() {
        let mut stmt = insert_select(TableId(2));
        stmt.target_list.push(TargetEntry {
            column: ColumnId(2),
            name: "status".into(),
            expr: Expr::Literal(Datum::Text("imported".into())),
        });
        reorder_insert_select_target_lists(&mut stmt).unwrap();
        let subquery = stmt.subquery().unwrap();
        assert_eq!(subquery.target_list.len(), 3);
        assert!(matches!(subquery.target_list[2].expr, Expr::Literal(_)));
        assert!(matches!(&stmt.target_list[2].expr, Expr::Column(c) if c.column == ColumnId(2)));
    }

    #[test]
    fn test_reorder_rejects_expressions_over_source_columns() {
        let mut stmt = insert_select(TableId(2));
        stmt.target_list[1].expr = Expr::cmp(
            BinOp::Plus,
            Expr::Column(ColumnRef { rte_index: 1, column: ColumnId(1) }),
            Expr::Literal(Datum::Int64(1)),
        );
        assert!(matches!(
            reorder_insert_select_target_lists(&mut stmt),
            Err(RouterError::InsertSelectUnsupported { .. })
        ));
    }
}
