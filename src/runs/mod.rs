//! Flow run lifecycle tracking
//!
//! Validates run state transitions and derives the per-run facts (current
//! node, waiting flag) that the node-count interceptor and downstream
//! analytics consume.

pub mod lifecycle;

pub use lifecycle::{derive_facts, transition, LifecycleError, RunFacts, RunState, RunTransition};
