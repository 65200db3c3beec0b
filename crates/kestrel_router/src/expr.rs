//! Predicate and expression trees as a closed tagged union, plus the tree
//! walkers the validators and the pruner are built on.
//!
//! Walkers return small structured results instead of threading mutable
//! accumulators through the recursion.

use kestrel_common::datum::Datum;
use kestrel_common::types::ColumnId;

use crate::statement::Statement;

/// Function volatility category, ordered least to most permissive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

impl Volatility {
    /// Most permissive of the two: an expression combining a stable and a
    /// volatile function is volatile.
    pub fn combine(self, other: Volatility) -> Volatility {
        self.max(other)
    }
}

/// A column reference: range-table index plus column within that relation.
/// When the referenced range-table entry is a subquery, `column` holds the
/// 0-based ordinal of the subquery's output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    pub rte_index: usize,
    pub column: ColumnId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

/// Expression tree.  Built-in operators (`BinaryOp`, `Not`, `IsNull`) are
/// immutable; only `FuncCall` and `SequenceNextval` carry volatility.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Datum),
    Column(ColumnRef),
    /// The hash-partitioning token of a column, `hash(col)`.  Produced when a
    /// deferred partition predicate is instantiated with a shard's hash-token
    /// bounds; the pruner recognizes comparisons against it.
    PartitionHash(ColumnRef),
    /// Placeholder parameter standing for "this row belongs to the shard
    /// currently being targeted".  Only valid inside the subquery of an
    /// INSERT ... SELECT; replaced per target shard during fan-out.
    PartitionPlaceholder,
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    Case {
        operand: Option<Box<Expr>>,
        conditions: Vec<Expr>,
        results: Vec<Expr>,
        else_result: Option<Box<Expr>>,
    },
    Coalesce(Vec<Expr>),
    FuncCall {
        name: String,
        volatility: Volatility,
        args: Vec<Expr>,
    },
    /// `nextval('seq')` — requires one coordinator-side evaluation.
    SequenceNextval(String),
    /// Scalar subquery in a target list or filter.
    Subquery(Box<Statement>),
}

impl Expr {
    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp { op: BinOp::Eq, left: Box::new(left), right: Box::new(right) }
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp { op: BinOp::And, left: Box::new(left), right: Box::new(right) }
    }

    pub fn cmp(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
    }

    /// Direct children of this node, in no particular order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_)
            | Expr::Column(_)
            | Expr::PartitionHash(_)
            | Expr::PartitionPlaceholder
            | Expr::SequenceNextval(_)
            | Expr::Subquery(_) => Vec::new(),
            Expr::BinaryOp { left, right, .. } => vec![left, right],
            Expr::Not(inner) | Expr::IsNull(inner) => vec![inner],
            Expr::Case { operand, conditions, results, else_result } => {
                let mut children: Vec<&Expr> = Vec::new();
                if let Some(op) = operand {
                    children.push(op);
                }
                children.extend(conditions.iter());
                children.extend(results.iter());
                if let Some(e) = else_result {
                    children.push(e);
                }
                children
            }
            Expr::Coalesce(args) => args.iter().collect(),
            Expr::FuncCall { args, .. } => args.iter().collect(),
        }
    }

    /// The most permissive volatility of any function in this tree.
    /// Does not descend into subqueries (those are rejected separately).
    pub fn max_volatility(&self) -> Volatility {
        let own = match self {
            Expr::FuncCall { volatility, .. } => *volatility,
            Expr::SequenceNextval(_) => Volatility::Volatile,
            _ => Volatility::Immutable,
        };
        self.children()
            .into_iter()
            .fold(own, |acc, child| acc.combine(child.max_volatility()))
    }

    pub fn contains_volatile_functions(&self) -> bool {
        self.max_volatility() == Volatility::Volatile
    }

    /// True if any function in the tree is STABLE or VOLATILE.
    pub fn contains_mutable_functions(&self) -> bool {
        self.max_volatility() >= Volatility::Stable
    }

    pub fn contains_column_reference(&self) -> bool {
        matches!(self, Expr::Column(_))
            || self.children().into_iter().any(Expr::contains_column_reference)
    }

    pub fn contains_subquery(&self) -> bool {
        matches!(self, Expr::Subquery(_))
            || self.children().into_iter().any(Expr::contains_subquery)
    }

    pub fn contains_partition_placeholder(&self) -> bool {
        matches!(self, Expr::PartitionPlaceholder)
            || self.children().into_iter().any(Expr::contains_partition_placeholder)
    }

    /// Split a conjunction into its flat conjunct list.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::BinaryOp { op: BinOp::And, left, right } => {
                let mut list = left.conjuncts();
                list.extend(right.conjuncts());
                list
            }
            other => vec![other],
        }
    }

    /// A pseudo-constant `false` clause, as surfaced by join inference for
    /// contradictory filters.
    pub fn is_false_clause(&self) -> bool {
        matches!(self, Expr::Literal(Datum::Boolean(false)))
    }
}

/// Append a conjunct to an optional filter, preserving existing clauses.
pub fn add_conjunct(filter: &mut Option<Expr>, clause: Expr) {
    *filter = match filter.take() {
        Some(existing) => Some(Expr::and(existing, clause)),
        None => Some(clause),
    };
}

/// Result of scanning an expression for constructs that cannot be reduced to
/// a constant on the coordinator before the statement is replicated.
///
/// Assumes the expression has already been checked to contain no VOLATILE
/// functions.  Column references are allowed, but only when passed solely to
/// IMMUTABLE functions; CASE and COALESCE are rejected whenever any branch is
/// above IMMUTABLE, since lazy branch evaluation may diverge across replicas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrreducibleScan {
    pub saw_column_reference: bool,
    pub stable_column_argument: bool,
    pub mutable_case_or_coalesce: bool,
}

impl IrreducibleScan {
    pub fn rejected(&self) -> bool {
        self.stable_column_argument || self.mutable_case_or_coalesce
    }

    pub fn merge(self, other: IrreducibleScan) -> IrreducibleScan {
        IrreducibleScan {
            saw_column_reference: self.saw_column_reference || other.saw_column_reference,
            stable_column_argument: self.stable_column_argument || other.stable_column_argument,
            mutable_case_or_coalesce: self.mutable_case_or_coalesce
                || other.mutable_case_or_coalesce,
        }
    }
}

/// Scan for coordinator-irreducible constructs.  See [`IrreducibleScan`].
pub fn scan_irreducible(expr: &Expr) -> IrreducibleScan {
    match expr {
        // CASE/COALESCE are evaluated lazily; any non-IMMUTABLE function in a
        // candidate branch makes the outcome replica-dependent.
        Expr::Case { .. } | Expr::Coalesce(_) => {
            let mutable = expr
                .children()
                .into_iter()
                .any(|c| c.contains_mutable_functions());
            IrreducibleScan {
                mutable_case_or_coalesce: mutable,
                ..Default::default()
            }
        }
        Expr::Column(_) => IrreducibleScan {
            saw_column_reference: true,
            ..Default::default()
        },
        Expr::FuncCall { volatility: Volatility::Stable, args, .. } => {
            let inner = args
                .iter()
                .map(scan_irreducible)
                .fold(IrreducibleScan::default(), IrreducibleScan::merge);
            IrreducibleScan {
                stable_column_argument: inner.stable_column_argument
                    || inner.saw_column_reference,
                ..inner
            }
        }
        _ => expr
            .children()
            .into_iter()
            .map(scan_irreducible)
            .fold(IrreducibleScan::default(), IrreducibleScan::merge),
    }
}
