use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// A single scalar value flowing through the planner: literal constants in
/// predicates, partition boundary values, and insert target values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    Timestamp(i64), // microseconds since Unix epoch
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two datums for partition-bound ordering.  Returns `None` for
    /// NULLs and for cross-type comparisons that have no defined order
    /// (Int32/Int64 are coerced; everything else must match variants).
    pub fn try_cmp(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Null, _) | (_, Datum::Null) => None,
            (Datum::Boolean(a), Datum::Boolean(b)) => Some(a.cmp(b)),
            (Datum::Float64(a), Datum::Float64(b)) => a.partial_cmp(b),
            (Datum::Text(a), Datum::Text(b)) => Some(a.cmp(b)),
            (Datum::Timestamp(a), Datum::Timestamp(b)) => Some(a.cmp(b)),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            },
        }
    }

    /// Structural equality with Int32/Int64 coercion; NULL equals nothing.
    pub fn try_eq(&self, other: &Datum) -> bool {
        self.try_cmp(other) == Some(Ordering::Equal)
    }

    /// Compute the hash-partitioning token for this value.
    ///
    /// The value is encoded with a type tag (so e.g. `1_i64` and `true` never
    /// collide), hashed with xxHash3-64, and the result reinterpreted as an
    /// `i64` token.  Hash-partitioned tables tile the full `i64` token space.
    pub fn partition_hash_token(&self) -> i64 {
        let mut buf = Vec::with_capacity(16);
        self.encode_for_hash(&mut buf);
        xxh3_64(&buf) as i64
    }

    fn encode_for_hash(&self, buf: &mut Vec<u8>) {
        match self {
            Datum::Null => buf.push(0x00),
            Datum::Boolean(b) => {
                buf.push(0x01);
                buf.push(if *b { 1 } else { 0 });
            }
            // Int32 and Int64 share an encoding so that equal values hash to
            // the same token regardless of declared width.
            Datum::Int32(v) => {
                buf.push(0x02);
                buf.extend_from_slice(&(*v as i64).to_le_bytes());
            }
            Datum::Int64(v) => {
                buf.push(0x02);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Datum::Float64(v) => {
                buf.push(0x03);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Datum::Text(s) => {
                buf.push(0x04);
                buf.extend_from_slice(s.as_bytes());
                buf.push(0x00); // terminator to avoid prefix collisions
            }
            Datum::Timestamp(v) => {
                buf.push(0x05);
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            _ => self.try_eq(other),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Text(s) => write!(f, "'{}'", s),
            Datum::Timestamp(v) => write!(f, "ts:{}", v),
        }
    }
}
