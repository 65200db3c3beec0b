//! Parsed-and-bound statement trees as consumed by the router planner, plus
//! the per-relation restriction context handed over by the general planner.

use kestrel_common::types::{ColumnId, TableId};

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Select,
    Insert,
    Update,
    Delete,
}

impl CommandType {
    pub fn is_modification(self) -> bool {
        matches!(self, CommandType::Insert | CommandType::Update | CommandType::Delete)
    }
}

/// One entry in a statement's range table.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeTableEntry {
    Relation { table: TableId },
    Subquery { statement: Box<Statement> },
    Join,
    Function { name: String },
    /// Multi-row VALUES scan.
    Values { row_count: usize },
}

/// One target-list entry.  For modifications `column` names the target
/// table's column being set; for SELECT projections the output ordinal is the
/// entry's position in the target list and `column` echoes it.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEntry {
    pub column: ColumnId,
    pub name: String,
    pub expr: Expr,
}

/// ON CONFLICT clause of an upsert.  An empty `set` list is DO NOTHING.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnConflictClause {
    pub set: Vec<TargetEntry>,
    pub set_where: Option<Expr>,
    pub arbiter_where: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

/// A bound statement tree.  SELECT-only features (limit, set operations,
/// window flags) are carried inline so the insert-select validator can check
/// them without a separate node type.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub command: CommandType,
    pub range_table: Vec<RangeTableEntry>,
    /// Index into `range_table` of the modification target relation.
    pub result_relation: Option<usize>,
    pub target_list: Vec<TargetEntry>,
    pub filter: Option<Expr>,
    /// Names of WITH clauses; non-empty rejects the modification.
    pub ctes: Vec<String>,
    pub on_conflict: Option<OnConflictClause>,
    pub returning: Vec<Expr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub has_window_functions: bool,
    pub set_operation: Option<SetOpKind>,
    pub has_grouping_sets: bool,
    pub has_distinct_on: bool,
    /// FOR UPDATE / FOR SHARE locking clause on a SELECT.
    pub for_update: bool,
}

impl Statement {
    /// An empty statement skeleton; tests and builders fill in the rest.
    pub fn new(command: CommandType) -> Self {
        Self {
            command,
            range_table: Vec::new(),
            result_relation: None,
            target_list: Vec::new(),
            filter: None,
            ctes: Vec::new(),
            on_conflict: None,
            returning: Vec::new(),
            limit: None,
            offset: None,
            has_window_functions: false,
            set_operation: None,
            has_grouping_sets: false,
            has_distinct_on: false,
            for_update: false,
        }
    }

    /// True for INSERT INTO ... SELECT: an INSERT whose range table carries a
    /// subquery entry feeding the target list.
    pub fn is_insert_select(&self) -> bool {
        self.command == CommandType::Insert && self.subquery_rte_index().is_some()
    }

    /// Range-table index of the SELECT side of an INSERT ... SELECT.
    pub fn subquery_rte_index(&self) -> Option<usize> {
        self.range_table
            .iter()
            .position(|rte| matches!(rte, RangeTableEntry::Subquery { .. }))
    }

    pub fn subquery(&self) -> Option<&Statement> {
        self.range_table.iter().find_map(|rte| match rte {
            RangeTableEntry::Subquery { statement } => Some(statement.as_ref()),
            _ => None,
        })
    }

    pub fn subquery_mut(&mut self) -> Option<&mut Statement> {
        self.range_table.iter_mut().find_map(|rte| match rte {
            RangeTableEntry::Subquery { statement } => Some(statement.as_mut()),
            _ => None,
        })
    }

    /// Table of the modification target relation.
    pub fn result_table(&self) -> Option<TableId> {
        let index = self.result_relation?;
        match self.range_table.get(index) {
            Some(RangeTableEntry::Relation { table }) => Some(*table),
            _ => None,
        }
    }

    /// All plain relation references, with their range-table indexes.
    pub fn relation_entries(&self) -> Vec<(usize, TableId)> {
        self.range_table
            .iter()
            .enumerate()
            .filter_map(|(index, rte)| match rte {
                RangeTableEntry::Relation { table } => Some((index, *table)),
                _ => None,
            })
            .collect()
    }

    /// Every expression hanging directly off this statement (not descending
    /// into subquery statements).
    fn own_expressions(&self) -> Vec<&Expr> {
        let mut exprs: Vec<&Expr> = Vec::new();
        exprs.extend(self.target_list.iter().map(|te| &te.expr));
        if let Some(filter) = &self.filter {
            exprs.push(filter);
        }
        exprs.extend(self.returning.iter());
        if let Some(conflict) = &self.on_conflict {
            exprs.extend(conflict.set.iter().map(|te| &te.expr));
            if let Some(w) = &conflict.set_where {
                exprs.push(w);
            }
            if let Some(w) = &conflict.arbiter_where {
                exprs.push(w);
            }
        }
        exprs
    }

    /// This statement plus every nested subquery statement, depth-first.
    pub fn self_and_subqueries(&self) -> Vec<&Statement> {
        let mut list = vec![self];
        for rte in &self.range_table {
            if let RangeTableEntry::Subquery { statement } = rte {
                list.extend(statement.self_and_subqueries());
            }
        }
        list
    }

    pub fn contains_volatile_functions(&self) -> bool {
        self.self_and_subqueries()
            .into_iter()
            .any(|stmt| stmt.own_expressions().into_iter().any(Expr::contains_volatile_functions))
    }

    /// True when some expression must be evaluated once on the coordinator
    /// and substituted into every task (e.g. `now()`, sequence values) to
    /// keep replicas consistent.
    pub fn requires_coordinator_evaluation(&self) -> bool {
        self.self_and_subqueries()
            .into_iter()
            .any(|stmt| stmt.own_expressions().into_iter().any(Expr::contains_mutable_functions))
    }

    /// True if any target-list, filter, or RETURNING expression embeds a
    /// scalar subquery.
    pub fn has_sublinks(&self) -> bool {
        self.own_expressions().into_iter().any(Expr::contains_subquery)
    }
}

/// Join-planner restriction metadata for one table reference.
///
/// `restrictions` is the conjunctive predicate fragment applicable to the
/// relation; `join_pseudo_constants` carries join-derived pseudo-constant
/// clauses (a literal `false` there means the relation provably matches no
/// rows).  `Clone` is a deep copy: every function that rewrites predicates
/// clones first and mutates only its copy.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRestriction {
    pub rte_index: usize,
    pub table: TableId,
    pub restrictions: Vec<Expr>,
    pub join_pseudo_constants: Vec<Expr>,
}

impl RelationRestriction {
    pub fn new(rte_index: usize, table: TableId, restrictions: Vec<Expr>) -> Self {
        Self { rte_index, table, restrictions, join_pseudo_constants: Vec::new() }
    }

    pub fn has_false_clause(&self) -> bool {
        self.join_pseudo_constants.iter().any(Expr::is_false_clause)
    }
}

/// One entry per table reference in the statement, built by the general
/// planner before router planning runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestrictionContext {
    pub relations: Vec<RelationRestriction>,
    /// Set when every participating table is fully replicated.
    pub all_reference_tables: bool,
}

impl RestrictionContext {
    pub fn relation(&self, table: TableId) -> Option<&RelationRestriction> {
        self.relations.iter().find(|r| r.table == table)
    }
}
