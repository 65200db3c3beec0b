//! Modification safety checks.
//!
//! Modifications are replicated per statement: every placement of the target
//! shard executes the same deparsed SQL.  Any construct whose result could
//! differ between placements (volatile functions, stable functions over row
//! data, lazily evaluated CASE/COALESCE branches with non-immutable arms)
//! must be rejected before a task is built, as must shapes the single-shard
//! executor cannot run at all (joins, CTEs, multi-row inserts).

use crate::catalog::TableDistribution;
use crate::error::{Result, RouterError};
use crate::expr::{scan_irreducible, BinOp, Expr, IrreducibleScan};
use crate::statement::{CommandType, RangeTableEntry, Statement, TargetEntry};

/// Whether a SET-clause entry can change the stored value of its column.
///
/// `SET col = col` never changes the value.  `SET col = <literal>` does not
/// when the filter pins the column to that same literal with a top-level
/// equality conjunct.  Anything else is assumed to change it.
pub fn target_entry_changes_value(
    entry: &TargetEntry,
    rte_index: usize,
    filter: Option<&Expr>,
) -> bool {
    match &entry.expr {
        Expr::Column(col) => col.rte_index != rte_index || col.column != entry.column,
        Expr::Literal(new_value) => {
            let Some(filter) = filter else {
                return true;
            };
            !filter.conjuncts().iter().any(|conjunct| match conjunct {
                Expr::BinaryOp { op: BinOp::Eq, left, right } => {
                    match (left.as_ref(), right.as_ref()) {
                        (Expr::Column(col), Expr::Literal(value))
                        | (Expr::Literal(value), Expr::Column(col)) => {
                            col.rte_index == rte_index
                                && col.column == entry.column
                                && value.try_eq(new_value)
                        }
                        _ => false,
                    }
                }
                _ => false,
            })
        }
        _ => true,
    }
}

/// Reject every modification shape that cannot be executed safely as a
/// single-shard, statement-replicated task.
pub fn validate_modification(stmt: &Statement, dist: &TableDistribution) -> Result<()> {
    if stmt.has_sublinks() {
        return Err(RouterError::SubqueryInModification);
    }
    if !stmt.ctes.is_empty() {
        return Err(RouterError::CteInModification);
    }

    let insert_select = stmt.is_insert_select();
    let mut relation_tables = Vec::new();
    for rte in &stmt.range_table {
        match rte {
            RangeTableEntry::Relation { table } => relation_tables.push(*table),
            RangeTableEntry::Subquery { .. } if insert_select => {}
            RangeTableEntry::Subquery { .. } => {
                return Err(RouterError::SubqueryInModification)
            }
            RangeTableEntry::Join => return Err(RouterError::JoinInModification),
            RangeTableEntry::Function { .. } => {
                return Err(RouterError::FunctionInFromClause)
            }
            RangeTableEntry::Values { .. } => return Err(RouterError::MultiRowInsert),
        }
    }
    // An upsert carries an implicit second reference to the target table for
    // its conflict arm; any other extra relation is a join.
    let upsert_self_reference = relation_tables.len() == 2
        && stmt.on_conflict.is_some()
        && relation_tables[0] == relation_tables[1];
    if relation_tables.len() != 1 && !upsert_self_reference {
        return Err(RouterError::JoinInModification);
    }

    let rte_index = stmt.result_relation.unwrap_or(0);
    let mut scan = IrreducibleScan::default();
    let mut specifies_partition_value = false;

    for entry in &stmt.target_list {
        match stmt.command {
            CommandType::Update => {
                if entry.expr.contains_volatile_functions() {
                    return Err(RouterError::VolatileFunction { clause: "the SET clause" });
                }
                scan = scan.merge(scan_irreducible(&entry.expr));
                if dist.is_partition_column(entry.column)
                    && target_entry_changes_value(entry, rte_index, stmt.filter.as_ref())
                {
                    specifies_partition_value = true;
                }
            }
            CommandType::Insert => {
                if dist.is_partition_column(entry.column) {
                    let constant_like = match &entry.expr {
                        Expr::Literal(_) => true,
                        // Insert-select target lists carry references to the
                        // subquery's output columns.
                        Expr::Column(_) => insert_select,
                        _ => false,
                    };
                    if !constant_like {
                        return Err(RouterError::NonConstantPartitionValue);
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(filter) = &stmt.filter {
        if filter.contains_volatile_functions() {
            return Err(RouterError::VolatileFunction { clause: "the WHERE clause" });
        }
        if stmt.command == CommandType::Update {
            scan = scan.merge(scan_irreducible(filter));
        }
    }

    if scan.stable_column_argument {
        return Err(RouterError::StableFunctionWithColumnArgument);
    }
    if scan.mutable_case_or_coalesce {
        return Err(RouterError::MutableCaseOrCoalesce);
    }

    if stmt.returning.iter().any(Expr::contains_mutable_functions) {
        return Err(RouterError::MutableReturningClause);
    }

    if let Some(conflict) = &stmt.on_conflict {
        for entry in &conflict.set {
            if entry.expr.contains_mutable_functions() {
                return Err(RouterError::MutableOnConflictSet);
            }
            if dist.is_partition_column(entry.column)
                && target_entry_changes_value(entry, rte_index, None)
            {
                specifies_partition_value = true;
            }
        }
        let mutable_where = conflict
            .set_where
            .iter()
            .chain(conflict.arbiter_where.iter())
            .any(Expr::contains_mutable_functions);
        if mutable_where {
            return Err(RouterError::MutableOnConflictWhere);
        }
    }

    if specifies_partition_value {
        return Err(RouterError::PartitionColumnUpdate);
    }

    Ok(())
}
