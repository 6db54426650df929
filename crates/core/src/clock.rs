//! Causal clock shared by every source of a registry
//!
//! A `Clock` is a vector of SCNs, one slot per source, in the order the
//! watermark registry assigned to its sources. Two clocks are compared
//! slot by slot; a missing trailing slot counts as `0`, so a registry can
//! grow its source list without invalidating clocks already in a log.
//!
//! # Ordering
//!
//! | Result | Meaning |
//! |--------|---------|
//! | `Before` | every slot `<=`, at least one `<` |
//! | `After` | every slot `>=`, at least one `>` |
//! | `Equicurrent` | every slot equal |
//! | `Concurrent` | some slot `<` and some slot `>` |

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::Scn;

/// Outcome of comparing two clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurred {
    /// Left clock happened before the right one
    Before,
    /// Left clock happened after the right one
    After,
    /// Both clocks name the same point
    Equicurrent,
    /// Neither clock dominates the other
    Concurrent,
}

/// Vector clock over the sources of a watermark registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    values: Vec<Scn>,
}

impl Clock {
    /// The minimum clock (no source has progressed)
    pub fn zero() -> Self {
        Clock { values: Vec::new() }
    }

    /// Create a clock from per-source SCNs
    pub fn new(values: Vec<Scn>) -> Self {
        Clock { values }
    }

    /// Per-source SCNs in registry order
    pub fn values(&self) -> &[Scn] {
        &self.values
    }

    /// SCN at a source slot, `0` past the end
    pub fn get(&self, index: usize) -> Scn {
        self.values.get(index).copied().unwrap_or(0)
    }

    /// True when every slot is zero
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0)
    }

    /// Compare two clocks slot by slot
    pub fn compare(&self, other: &Clock) -> Occurred {
        let len = self.values.len().max(other.values.len());
        let mut less = false;
        let mut greater = false;

        for i in 0..len {
            match self.get(i).cmp(&other.get(i)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return Occurred::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => Occurred::Equicurrent,
            (true, false) => Occurred::Before,
            (false, true) => Occurred::After,
            (true, true) => Occurred::Concurrent,
        }
    }

    /// Strictly before `other`
    pub fn before(&self, other: &Clock) -> bool {
        self.compare(other) == Occurred::Before
    }

    /// Strictly after `other`
    pub fn after(&self, other: &Clock) -> bool {
        self.compare(other) == Occurred::After
    }

    /// Before or equal to `other`
    pub fn before_eq(&self, other: &Clock) -> bool {
        matches!(self.compare(other), Occurred::Before | Occurred::Equicurrent)
    }

    /// After or equal to `other`
    pub fn after_eq(&self, other: &Clock) -> bool {
        matches!(self.compare(other), Occurred::After | Occurred::Equicurrent)
    }

    /// Pointwise maximum of two clocks
    pub fn merge(&self, other: &Clock) -> Clock {
        let len = self.values.len().max(other.values.len());
        let values = (0..len).map(|i| self.get(i).max(other.get(i))).collect();
        Clock { values }
    }

    /// Serialize to bytes
    ///
    /// Format: count(4, LE) + count * scn(8, LE)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.values.len() * 8);
        bytes.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for v in &self.values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    /// Deserialize from bytes produced by [`Clock::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let count_bytes: [u8; 4] = bytes
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::corruption("clock too short for slot count"))?;
        let count = u32::from_le_bytes(count_bytes) as usize;

        let expected = 4 + count * 8;
        if bytes.len() != expected {
            return Err(Error::corruption(format!(
                "clock length mismatch: expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }

        let values = bytes[4..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                u64::from_le_bytes(buf)
            })
            .collect();

        Ok(Clock { values })
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}
