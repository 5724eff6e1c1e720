//! # Mutation Triggers
//!
//! Row-level mutation observers for the high-write tables.
//!
//! ## Module Organization
//!
//! - `event` - Mutation events and observed entity types
//! - `rows` - Row images of the observed tables
//! - `interceptor` - Generic tracker contract and delta planning
//! - `trackers` - One interceptor per tracked relationship
//! - `tracked` - Per-table wiring (interceptors, notification, cascades)
//! - `hub` - Transactional entry point every write path goes through

pub mod event;
pub mod hub;
pub mod interceptor;
pub mod rows;
pub mod tracked;
pub mod trackers;

pub use event::{EntityType, MutationEvent, Operation};
pub use hub::{MutationTx, TriggerHub, TriggerStats, TriggerStatsSnapshot};
pub use interceptor::{plan_deltas, Contribution, CounterTracker, DeltaPlan, DerivationError};
pub use tracked::TrackedRow;
