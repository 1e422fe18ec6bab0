//! Configuration structures for Oxbow.

use crate::error::OxbowError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Buffer replacement policy, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementPolicy {
    /// Clock sweep with second-chance usage counts.
    Clock,
    /// Evict the least recently unpinned frame.
    Lru,
    /// Evict the most recently unpinned frame.
    Mru,
    /// Two-queue: probationary FIFO (A1) feeding a warm LRU list (Am).
    #[default]
    #[serde(rename = "2q")]
    TwoQ,
}

impl ReplacementPolicy {
    /// Stable lowercase name of the policy.
    pub fn name(&self) -> &'static str {
        match self {
            ReplacementPolicy::Clock => "clock",
            ReplacementPolicy::Lru => "lru",
            ReplacementPolicy::Mru => "mru",
            ReplacementPolicy::TwoQ => "2q",
        }
    }
}

impl std::fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReplacementPolicy {
    type Err = OxbowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clock" => Ok(ReplacementPolicy::Clock),
            "lru" => Ok(ReplacementPolicy::Lru),
            "mru" => Ok(ReplacementPolicy::Mru),
            "2q" => Ok(ReplacementPolicy::TwoQ),
            other => Err(OxbowError::InvalidParameter {
                name: "replacement_policy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<i32> for ReplacementPolicy {
    type Error = OxbowError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReplacementPolicy::Clock),
            1 => Ok(ReplacementPolicy::Lru),
            2 => Ok(ReplacementPolicy::Mru),
            3 => Ok(ReplacementPolicy::TwoQ),
            other => Err(OxbowError::InvalidReplacementPolicy(other)),
        }
    }
}

/// Buffer pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of frames in the buffer pool.
    pub buffer_pool_pages: usize,
    /// Victim-selection policy for the whole pool.
    pub replacement_policy: ReplacementPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_pool_pages: 8192, // 128 MB with 16 KB pages
            replacement_policy: ReplacementPolicy::TwoQ,
        }
    }
}
