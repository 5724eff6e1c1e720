//! tallyflow - low-contention counters and change propagation for
//! high-write tables
//!
//! Writers append signed deltas inside their own transaction; a compactor
//! folds them into consolidated totals later; reads add the two together.
//! Committed row mutations of notified tables are streamed to a change sink.
//!
//! ```text
//! mutation ──▶ TriggerHub ──▶ interceptors ──▶ counter_deltas ──▶ compactor ──▶ counter_totals
//!                  │                                  └────────── read ◀─────────────┘
//!                  └──(after commit)──▶ ChangeNotifier ──▶ ChangeSink
//! ```

#[cfg(test)]
mod tests;

pub mod compactor;
pub mod config;
pub mod groups;
pub mod ingest;
pub mod ledger;
pub mod notify;
pub mod runs;
pub mod sqlite_pragma;
pub mod triggers;

pub use config::{NegativeReadPolicy, TallyConfig};
pub use ledger::{CounterKey, CounterLedger, CounterScope, LedgerError, SqliteLedger};
pub use triggers::{MutationEvent, TriggerHub};
