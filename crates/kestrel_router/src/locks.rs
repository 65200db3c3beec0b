//! Advisory shard-metadata locks.
//!
//! The planner takes a shared lock on the anchor shard's metadata before it
//! captures placements and deparses the shard query, so concurrent shard
//! moves (which take the exclusive side) cannot change placement sets under
//! a plan being built.

use dashmap::DashMap;
use kestrel_common::types::ShardId;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::sync::Arc;

/// Held for the remainder of plan construction.
pub type SharedShardLock = ArcRwLockReadGuard<RawRwLock, ()>;
/// Held by metadata writers (shard move, placement repair).
pub type ExclusiveShardLock = ArcRwLockWriteGuard<RawRwLock, ()>;

#[derive(Debug, Default)]
pub struct ShardMetadataLocks {
    locks: DashMap<ShardId, Arc<RwLock<()>>>,
}

impl ShardMetadataLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, shard: ShardId) -> Arc<RwLock<()>> {
        self.locks
            .entry(shard)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Shared access: blocks only against exclusive holders.
    pub fn share(&self, shard: ShardId) -> SharedShardLock {
        self.lock_for(shard).read_arc()
    }

    /// Exclusive access for metadata writers.
    pub fn exclusive(&self, shard: ShardId) -> ExclusiveShardLock {
        self.lock_for(shard).write_arc()
    }
}
