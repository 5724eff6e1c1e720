//! Generic mutation interceptor contract
//!
//! A tracker maps one row image to the counters that row contributes to.
//! `plan_deltas` turns a mutation event into signed deltas by comparing the
//! contributions of the old and new images:
//!
//! - Insert: `+contribution(new)`
//! - Delete: `-contribution(old)`
//! - Update: per-key difference; identical contributions yield nothing
//!
//! Each image is derived on its own. An image that fails derivation
//! contributes nothing, which is exactly what it contributed when it was
//! written, so the other image's deltas still keep the counter exact.
//!
//! Unit scopes are emitted as individual ±1 deltas, credit scopes as one ±N.

use super::event::{MutationEvent, Operation};
use crate::ledger::{CounterKey, Delta};
use std::collections::BTreeMap;

/// A row's contribution to a single counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub key: CounterKey,
    pub value: i64,
}

impl Contribution {
    pub fn one(key: CounterKey) -> Self {
        Self { key, value: 1 }
    }
}

/// Key derivation failed for a row; the tracker's deltas are skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    MissingField(&'static str),
    InvalidValue { field: &'static str, reason: String },
    MalformedEvent(Operation),
}

impl std::fmt::Display for DerivationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DerivationError::MissingField(field) => write!(f, "missing {}", field),
            DerivationError::InvalidValue { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            DerivationError::MalformedEvent(op) => {
                write!(f, "{} event without the required row image", op.as_str())
            }
        }
    }
}

impl std::error::Error for DerivationError {}

/// Maps a row of `R` to the counters it contributes to
pub trait CounterTracker<R>: Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Every counter this row image contributes to. An empty vector means the
    /// row does not count (e.g. a message without a topup).
    fn contributions(&self, row: &R) -> Result<Vec<Contribution>, DerivationError>;
}

/// Deltas for one tracker and one event, plus the derivation failures of
/// any image that was counted as empty
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeltaPlan {
    pub deltas: Vec<Delta>,
    pub failures: Vec<DerivationError>,
}

fn summed<R>(
    tracker: &dyn CounterTracker<R>,
    row: Option<&R>,
    failures: &mut Vec<DerivationError>,
) -> BTreeMap<CounterKey, i64> {
    let mut sums = BTreeMap::new();
    if let Some(row) = row {
        match tracker.contributions(row) {
            Ok(contributions) => {
                for contribution in contributions {
                    *sums.entry(contribution.key).or_insert(0) += contribution.value;
                }
            }
            Err(e) => failures.push(e),
        }
    }
    sums
}

/// Signed deltas for one tracker and one mutation event. Only an event
/// missing the image its operation needs is an error.
pub fn plan_deltas<R>(
    tracker: &dyn CounterTracker<R>,
    event: &MutationEvent<R>,
) -> Result<DeltaPlan, DerivationError> {
    if !event.is_well_formed() {
        return Err(DerivationError::MalformedEvent(event.op));
    }

    let mut plan = DeltaPlan::default();
    let old = match event.op {
        Operation::Insert => BTreeMap::new(),
        _ => summed(tracker, event.old.as_ref(), &mut plan.failures),
    };
    let new = match event.op {
        Operation::Delete => BTreeMap::new(),
        _ => summed(tracker, event.new.as_ref(), &mut plan.failures),
    };

    if old == new {
        return Ok(plan);
    }

    let mut net: BTreeMap<CounterKey, i64> = BTreeMap::new();
    for (key, value) in old {
        *net.entry(key).or_insert(0) -= value;
    }
    for (key, value) in new {
        *net.entry(key).or_insert(0) += value;
    }

    for (key, value) in net {
        if value == 0 {
            continue;
        }
        if key.scope().is_unit() {
            for _ in 0..value.abs() {
                plan.deltas.push(Delta::new(key.clone(), value.signum()));
            }
        } else {
            plan.deltas.push(Delta::new(key, value));
        }
    }

    Ok(plan)
}
