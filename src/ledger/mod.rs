//! # Counter Ledger
//!
//! Append-only delta ledger with periodic squash into consolidated totals.
//!
//! ## Architecture
//!
//! ```text
//! Mutation interceptor ──append──▶ counter_deltas (one row per ±1 / ±N)
//!                                        │
//!                           squash (one key, one transaction)
//!                                        ▼
//!                                  counter_totals (one row per key)
//!
//! read(key) = counter_totals.total + Σ counter_deltas.value
//! ```
//!
//! Writers only ever INSERT into `counter_deltas`, so two transactions that
//! bump the same counter never contend on a shared row. The compactor is the
//! single writer of `counter_totals`.
//!
//! ## Module Organization
//!
//! - `scope` - Counter scopes and typed keys
//! - `delta` - Delta records and squash bookkeeping
//! - `error` - Ledger error type
//! - `schema` - Embedded schema loader
//! - `sqlite_ledger` - SQLite implementation
//! - `rollups` - Owner-wide reads (run stats, category counts)

pub mod delta;
pub mod error;
pub mod rollups;
pub mod schema;
pub mod scope;
pub mod sqlite_ledger;

pub use delta::{Delta, PendingKey, SquashOutcome};
pub use error::LedgerError;
pub use schema::init_schema;
pub use scope::{CounterKey, CounterScope, Direction, ExitType, MsgType};
pub use sqlite_ledger::SqliteLedger;

/// Storage for counters: append deltas, squash them, read current values.
///
/// Implementations must make `squash` atomic (consumed deltas deleted and
/// total updated together, or neither) and must never let `append` read or
/// lock the consolidated total.
pub trait CounterLedger: Send + Sync {
    /// Append one delta
    fn append(&self, delta: &Delta) -> Result<(), LedgerError>;

    /// Fold all pending deltas for `key` into its consolidated total
    fn squash(&self, key: &CounterKey) -> Result<SquashOutcome, LedgerError>;

    /// Current value: consolidated total (0 if absent) + pending deltas
    fn read(&self, key: &CounterKey) -> Result<i64, LedgerError>;

    /// Up to `limit` keys with pending deltas, oldest first
    fn pending_keys(&self, limit: usize) -> Result<Vec<PendingKey>, LedgerError>;

    /// Squash a key as listed by `pending_keys`
    fn squash_pending(&self, pending: &PendingKey) -> Result<SquashOutcome, LedgerError>;

    /// Current value of every key of `scope` owned by `owner_id`
    fn read_owner(
        &self,
        scope: CounterScope,
        owner_id: i64,
    ) -> Result<Vec<(CounterKey, i64)>, LedgerError>;

    /// Overwrite a key with an out-of-band recount, discarding pending deltas
    fn reconcile(&self, key: &CounterKey, count: i64) -> Result<(), LedgerError>;
}
