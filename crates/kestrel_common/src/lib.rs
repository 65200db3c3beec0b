//! Shared value and identifier types for KestrelDB's distributed planner.

pub mod datum;
pub mod types;
