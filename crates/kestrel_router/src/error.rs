use kestrel_common::types::ShardId;
use thiserror::Error;

/// Hard planning failures.  Every variant is a machine-checkable kind; the
/// message carries the human-readable detail and remediation hint.
///
/// Router *ineligibility* for SELECTs is not an error — the planner returns
/// `Ok(None)` and the caller falls back to general distributed planning.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("cannot plan distributed modification: subqueries are not supported in distributed modifications")]
    SubqueryInModification,

    #[error("cannot plan distributed modification: common table expressions are not supported in distributed modifications")]
    CteInModification,

    #[error("cannot plan distributed modification: joins are not supported in distributed modifications")]
    JoinInModification,

    #[error("cannot plan distributed modification: functions must not appear in the FROM clause of a distributed modification")]
    FunctionInFromClause,

    #[error("cannot plan distributed modification: multi-row INSERTs to distributed tables are not supported")]
    MultiRowInsert,

    #[error("functions used in {clause} of modification queries on distributed tables must not be VOLATILE")]
    VolatileFunction { clause: &'static str },

    #[error("STABLE functions used in UPDATE queries cannot be called with column references")]
    StableFunctionWithColumnArgument,

    #[error("non-IMMUTABLE functions are not allowed in CASE or COALESCE statements")]
    MutableCaseOrCoalesce,

    #[error("non-IMMUTABLE functions are not allowed in the RETURNING clause")]
    MutableReturningClause,

    #[error("functions used in the DO UPDATE SET clause of INSERTs on distributed tables must be marked IMMUTABLE")]
    MutableOnConflictSet,

    #[error("functions used in the WHERE clause of the ON CONFLICT clause of INSERTs on distributed tables must be marked IMMUTABLE")]
    MutableOnConflictWhere,

    #[error("modifying the partition value of rows is not allowed")]
    PartitionColumnUpdate,

    #[error("values given for the partition column must be constants or constant expressions")]
    NonConstantPartitionValue,

    #[error("cannot plan INSERT using row with NULL value in partition column")]
    NullPartitionValue,

    #[error("could not find any shards for table \"{table}\"; create shards and try again")]
    NoShards { table: String },

    #[error("could not find any active placements for shard {shard}")]
    NoShardPlacements { shard: ShardId },

    #[error("distributed modifications must target exactly one shard{detail}; consider using an equality filter on partition column \"{partition_column}\"")]
    NotSingleShardModification {
        /// "" | ": this command modifies no shards" | ": this command modifies all shards"
        detail: &'static str,
        partition_column: String,
    },

    #[error("cannot plan distributed INSERT ... SELECT: {detail}")]
    InsertSelectUnsupported { detail: String },

    #[error("INSERT target table and the source relation of the SELECT partition column value must be colocated")]
    ColocationMismatch,

    #[error("cannot plan distributed modification for target shard {shard}: SELECT query cannot be pushed down to the worker")]
    FanoutSelectNotRoutable { shard: ShardId },

    #[error("cannot plan distributed modification for target shard {shard}: insert cannot be executed on all placements")]
    PlacementMismatch { shard: ShardId },
}

pub type Result<T> = std::result::Result<T, RouterError>;
