//! Delta records and compaction bookkeeping types

use super::scope::{CounterKey, CounterScope};

/// One signed counter adjustment, appended by an interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub key: CounterKey,
    pub value: i64,
}

impl Delta {
    pub fn new(key: CounterKey, value: i64) -> Self {
        Self { key, value }
    }

    pub fn scope(&self) -> CounterScope {
        self.key.scope()
    }
}

/// A key that has unsquashed deltas, as listed by the compactor sweep.
/// The key is kept in its encoded form so rows written by older key layouts
/// can still be folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKey {
    pub scope: CounterScope,
    pub encoded_key: String,
    pub pending: usize,
}

/// Result of squashing one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SquashOutcome {
    /// Delta rows deleted
    pub consumed: usize,
    /// Sum of the consumed deltas added to the total
    pub folded: i64,
    /// Consolidated total after the squash
    pub total: i64,
}
