//! Executable plan fragments: a `Job` of `Task`s, each carrying the deparsed
//! shard query and the placements it may run on.

use kestrel_common::types::{ShardId, TableId, WorkerNode};
use serde::{Deserialize, Serialize};

use crate::statement::Statement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Read,
    Modify,
}

/// A (table, shard) pair a task touches, used by the executor for placement
/// health accounting and by the deparser for shard-name substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationShard {
    pub table: TableId,
    pub shard: ShardId,
}

/// Where a task may execute.  `shard` is unset for dummy placements: a
/// fully-pruned read still needs somewhere to produce its empty result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlacement {
    pub node: WorkerNode,
    pub shard: Option<ShardId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: u32,
    pub kind: TaskKind,
    /// Deparsed SQL with shard-extended relation names.
    pub query: String,
    /// Shard whose placements anchor execution; unset for dummy-placement
    /// reads.
    pub anchor_shard: Option<ShardId>,
    pub placements: Vec<TaskPlacement>,
    pub relation_shards: Vec<RelationShard>,
    /// Carries an ON CONFLICT clause.
    pub upsert: bool,
    /// Produced by insert-select fan-out; the executor treats failures of
    /// sibling tasks as failing the whole statement.
    pub insert_select_fanout: bool,
}

/// A routed plan: one task for single-shard statements, one task per target
/// shard for insert-select fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub tasks: Vec<Task>,
    /// Mutable expressions (now(), sequence values) must be evaluated once on
    /// the coordinator and the results substituted before execution.
    pub requires_coordinator_evaluation: bool,
    /// Upstream jobs this one consumes; router jobs never have any.
    pub dependencies: Vec<u64>,
}

impl Job {
    pub fn single_task(task: Task, requires_coordinator_evaluation: bool) -> Self {
        Self {
            tasks: vec![task],
            requires_coordinator_evaluation,
            dependencies: Vec::new(),
        }
    }
}

/// Turns a statement back into shard-qualified SQL text.
///
/// Deparsing is a separate concern (it needs the full schema catalog, quoting
/// rules, and parameter substitution), so the planner only holds this seam.
pub trait ShardQueryDeparser {
    fn deparse(&self, statement: &Statement, relation_shards: &[RelationShard]) -> String;
}
