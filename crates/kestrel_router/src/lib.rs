//! Router planning for distributed SQL statements.
//!
//! A statement whose answer lives entirely on one shard (plus the per-shard
//! fan-out of INSERT ... SELECT between colocated tables) can skip general
//! distributed planning: this crate prunes the shard set from partition
//! predicates, checks modification safety under statement replication,
//! resolves placements, and emits executable tasks.

pub mod catalog;
pub mod error;
pub mod expr;
pub mod extract;
pub mod insert_select;
pub mod locks;
pub mod placement;
pub mod planner;
pub mod prune;
pub mod statement;
pub mod task;
pub mod validate;

pub use catalog::{
    MetadataSnapshot, PartitionInterval, PartitionMethod, PlacementState, ShardPlacement,
    TableDistribution,
};
pub use error::{Result, RouterError};
pub use expr::{BinOp, ColumnRef, Expr, Volatility};
pub use locks::ShardMetadataLocks;
pub use planner::{RouterConfig, RouterPlanner};
pub use statement::{
    CommandType, OnConflictClause, RangeTableEntry, RelationRestriction, RestrictionContext,
    SetOpKind, Statement, TargetEntry,
};
pub use task::{Job, RelationShard, ShardQueryDeparser, Task, TaskKind, TaskPlacement};
