//! Identity types for SENTINEL entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// BLOCK ID
// ============================================================================

/// Monotonically increasing identifier for transcript blocks.
///
/// Ids are assigned by the narrative collaborator and must strictly
/// increase within a session; the window rejects out-of-order appends.
/// The newtype keeps block ids from being confused with token counts or
/// session counters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId(u64);

impl BlockId {
    /// Create a block id from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The successor id. Saturates at `u64::MAX`.
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlockId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl From<u64> for BlockId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl Serialize for BlockId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Serialize transparently as the raw integer
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self)
    }
}

// ============================================================================
// OTHER IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Session counter. A session is the interval between two checkpoint
/// invocations; the facade bumps this on every checkpoint.
pub type SessionIndex = u32;

// ============================================================================
// UTILITY FUNCTIONS
// ============================================================================

/// Compute the SHA-256 fingerprint of assembled pack text, hex-encoded.
///
/// Golden tests compare this single value instead of the full rendered
/// pack.
pub fn pack_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
