//! Squash compactor
//!
//! Folds pending deltas into consolidated totals, one key per transaction.
//! A failed key is left untouched and picked up again by the next pass.

pub mod backoff;

use crate::ledger::{CounterLedger, LedgerError};
use backoff::ExponentialBackoff;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub keys_squashed: usize,
    pub deltas_consumed: usize,
    pub failures: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.keys_squashed += other.keys_squashed;
        self.deltas_consumed += other.deltas_consumed;
        self.failures += other.failures;
    }
}

/// Squash up to `batch` keys with pending deltas, oldest first
pub fn sweep(ledger: &dyn CounterLedger, batch: usize) -> Result<SweepReport, LedgerError> {
    let mut report = SweepReport::default();

    for pending in ledger.pending_keys(batch)? {
        match ledger.squash_pending(&pending) {
            Ok(outcome) => {
                report.keys_squashed += 1;
                report.deltas_consumed += outcome.consumed;
                log::debug!(
                    "🗜️  {} {}: folded {} from {} deltas (total {})",
                    pending.scope.as_str(),
                    pending.encoded_key,
                    outcome.folded,
                    outcome.consumed,
                    outcome.total
                );
            }
            Err(e) => {
                report.failures += 1;
                log::error!(
                    "❌ Squash failed for {} {}: {}",
                    pending.scope.as_str(),
                    pending.encoded_key,
                    e
                );
            }
        }
    }

    Ok(report)
}

/// Sweep repeatedly until nothing is pending or a pass hits a failure
pub fn drain(ledger: &dyn CounterLedger, batch: usize) -> Result<SweepReport, LedgerError> {
    let mut total = SweepReport::default();
    loop {
        let report = sweep(ledger, batch)?;
        total.absorb(report);
        if report.failures > 0 || report.keys_squashed < batch.max(1) {
            return Ok(total);
        }
    }
}

/// Compaction scheduler task - sweeps every `interval_ms`
///
/// A failing pass backs off exponentially (capped at 60s) before the next
/// attempt; a clean pass resets the backoff. Runs until cancelled.
pub async fn squash_scheduler_task(
    ledger: Arc<dyn CounterLedger>,
    interval_ms: u64,
    batch: usize,
) {
    log::info!(
        "⏰ Starting squash compactor (interval: {}ms, batch: {} keys)",
        interval_ms,
        batch
    );

    let mut timer = interval(Duration::from_millis(interval_ms.max(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(interval_ms.max(1)),
        Duration::from_secs(60),
    );

    loop {
        timer.tick().await;

        match sweep(ledger.as_ref(), batch) {
            Ok(report) if report.failures == 0 => {
                backoff.reset();
                if report.keys_squashed > 0 {
                    log::info!(
                        "✅ Compactor squashed {} keys ({} deltas)",
                        report.keys_squashed,
                        report.deltas_consumed
                    );
                }
            }
            Ok(report) => {
                log::warn!(
                    "⚠️  Compactor pass: {} keys squashed, {} failed",
                    report.keys_squashed,
                    report.failures
                );
                backoff.sleep().await;
            }
            Err(e) => {
                log::error!("❌ Compactor pass failed: {}", e);
                backoff.sleep().await;
            }
        }
    }
}
