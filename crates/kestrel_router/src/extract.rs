//! Extraction of partition-column constraints from a conjunct list.
//!
//! The pruner only understands a small predicate language: equality and range
//! comparisons between the partition column and literal constants, hash-token
//! comparisons produced by fan-out instantiation, and the pseudo-constant
//! `false` clause join inference emits for contradictions.  Everything else is
//! ignored, which is always safe (it can only make pruning less precise).

use kestrel_common::datum::Datum;

use crate::catalog::TableDistribution;
use crate::expr::{BinOp, ColumnRef, Expr};

/// Constraints recovered for one table's partition column.
#[derive(Debug, Clone, Default)]
pub struct PartitionConstraints {
    /// `col = value` equality, strongest constraint when present.
    pub eq: Option<Datum>,
    /// Lower bound on the column value; bool marks inclusivity.
    pub lower: Option<(Datum, bool)>,
    /// Upper bound on the column value; bool marks inclusivity.
    pub upper: Option<(Datum, bool)>,
    /// Inclusive lower bound on `hash(col)` tokens.
    pub hash_lower: Option<i64>,
    /// Inclusive upper bound on `hash(col)` tokens.
    pub hash_upper: Option<i64>,
    /// A provably-false clause was present; no shard can match.
    pub contradiction: bool,
    /// At least one recognized constraint was found.
    pub constrained: bool,
}

fn is_partition_column(dist: &TableDistribution, column: &ColumnRef) -> bool {
    dist.is_partition_column(column.column)
}

/// Fold a comparison `col <op> value` into the constraint set.
fn apply_value_comparison(constraints: &mut PartitionConstraints, op: BinOp, value: &Datum) {
    if value.is_null() {
        return;
    }
    match op {
        BinOp::Eq => {
            constraints.eq = Some(value.clone());
            constraints.constrained = true;
        }
        BinOp::Gt => {
            constraints.lower = Some((value.clone(), false));
            constraints.constrained = true;
        }
        BinOp::GtEq => {
            constraints.lower = Some((value.clone(), true));
            constraints.constrained = true;
        }
        BinOp::Lt => {
            constraints.upper = Some((value.clone(), false));
            constraints.constrained = true;
        }
        BinOp::LtEq => {
            constraints.upper = Some((value.clone(), true));
            constraints.constrained = true;
        }
        _ => {}
    }
}

fn apply_token_comparison(constraints: &mut PartitionConstraints, op: BinOp, token: i64) {
    match op {
        BinOp::GtEq => {
            constraints.hash_lower = Some(token);
            constraints.constrained = true;
        }
        BinOp::LtEq => {
            constraints.hash_upper = Some(token);
            constraints.constrained = true;
        }
        _ => {}
    }
}

/// Mirror a comparison operator for `value <op> col` written backwards.
fn commute(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::LtEq => BinOp::GtEq,
        BinOp::Gt => BinOp::Lt,
        BinOp::GtEq => BinOp::LtEq,
        other => other,
    }
}

/// Walk a flat conjunct list and collect every partition-column constraint it
/// implies for `dist`.  Unrecognized conjuncts are skipped.
pub fn extract_partition_constraints(
    dist: &TableDistribution,
    conjuncts: &[&Expr],
) -> PartitionConstraints {
    let mut constraints = PartitionConstraints::default();
    for conjunct in conjuncts {
        if conjunct.is_false_clause() {
            constraints.contradiction = true;
            constraints.constrained = true;
            continue;
        }
        let Expr::BinaryOp { op, left, right } = conjunct else {
            continue;
        };
        match (left.as_ref(), right.as_ref()) {
            (Expr::Column(col), Expr::Literal(value))
                if is_partition_column(dist, col) =>
            {
                apply_value_comparison(&mut constraints, *op, value);
            }
            (Expr::Literal(value), Expr::Column(col))
                if is_partition_column(dist, col) =>
            {
                apply_value_comparison(&mut constraints, commute(*op), value);
            }
            (Expr::PartitionHash(col), Expr::Literal(value))
                if is_partition_column(dist, col) =>
            {
                if let Some(token) = value.as_i64() {
                    apply_token_comparison(&mut constraints, *op, token);
                }
            }
            (Expr::Literal(value), Expr::PartitionHash(col))
                if is_partition_column(dist, col) =>
            {
                if let Some(token) = value.as_i64() {
                    apply_token_comparison(&mut constraints, commute(*op), token);
                }
            }
            _ => {}
        }
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::types::{ColocationGroupId, ColumnId, ShardId, TableId};

    fn dist() -> TableDistribution {
        TableDistribution::uniform_hash(
            TableId(1),
            "orders",
            ColumnId(0),
            "order_id",
            ColocationGroupId(1),
            &[ShardId(101), ShardId(102)],
        )
    }

    fn part_col() -> Expr {
        Expr::Column(ColumnRef { rte_index: 0, column: ColumnId(0) })
    }

    #[test]
    fn test_equality_extraction() {
        let clause = Expr::eq(part_col(), Expr::Literal(Datum::Int64(7)));
        let constraints = extract_partition_constraints(&dist(), &[&clause]);
        assert_eq!(constraints.eq, Some(Datum::Int64(7)));
        assert!(constraints.constrained);
    }

    #[test]
    fn test_reversed_comparison_commutes() {
        // 10 > col  is  col < 10
        let clause = Expr::cmp(BinOp::Gt, Expr::Literal(Datum::Int64(10)), part_col());
        let constraints = extract_partition_constraints(&dist(), &[&clause]);
        assert_eq!(constraints.upper, Some((Datum::Int64(10), false)));
    }

    #[test]
    fn test_non_partition_column_ignored() {
        let other = Expr::Column(ColumnRef { rte_index: 0, column: ColumnId(5) });
        let clause = Expr::eq(other, Expr::Literal(Datum::Int64(7)));
        let constraints = extract_partition_constraints(&dist(), &[&clause]);
        assert!(!constraints.constrained);
    }

    #[test]
    fn test_null_comparison_ignored() {
        let clause = Expr::eq(part_col(), Expr::Literal(Datum::Null));
        let constraints = extract_partition_constraints(&dist(), &[&clause]);
        assert!(!constraints.constrained);
    }

    #[test]
    fn test_hash_token_bounds() {
        let ge = Expr::cmp(
            BinOp::GtEq,
            Expr::PartitionHash(ColumnRef { rte_index: 0, column: ColumnId(0) }),
            Expr::Literal(Datum::Int64(-100)),
        );
        let le = Expr::cmp(
            BinOp::LtEq,
            Expr::PartitionHash(ColumnRef { rte_index: 0, column: ColumnId(0) }),
            Expr::Literal(Datum::Int64(100)),
        );
        let constraints = extract_partition_constraints(&dist(), &[&ge, &le]);
        assert_eq!(constraints.hash_lower, Some(-100));
        assert_eq!(constraints.hash_upper, Some(100));
    }

    #[test]
    fn test_false_clause_is_contradiction() {
        let clause = Expr::Literal(Datum::Boolean(false));
        let constraints = extract_partition_constraints(&dist(), &[&clause]);
        assert!(constraints.contradiction);
    }
}
