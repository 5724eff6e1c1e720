//! Post-commit change delivery
//!
//! The trigger hub publishes committed events into a bounded queue with
//! `try_send`, so a slow or broken sink can never stall or fail a mutation.
//! A single dispatcher task drains the queue into the sink, which keeps
//! per-row order equal to commit order.

use super::event::ChangeEvent;
use super::sink::{ChangeSink, NotifyError};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Queue an event without waiting
    pub fn publish(&self, event: ChangeEvent) -> Result<(), NotifyError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::Full,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Drain the queue into `sink` until every notifier handle is dropped.
///
/// Delivery failures are logged and counted, never retried.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<ChangeEvent>,
    mut sink: Box<dyn ChangeSink>,
    flush_interval_ms: u64,
) -> DispatchStats {
    log::info!(
        "📣 Starting change dispatcher ({} sink, flush every {}ms)",
        sink.sink_type(),
        flush_interval_ms
    );

    let mut stats = DispatchStats::default();
    let mut flush_timer = interval(Duration::from_millis(flush_interval_ms.max(1)));
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let event = match maybe_event {
                    Some(event) => event,
                    None => break,
                };

                match sink.deliver(&event).await {
                    Ok(()) => stats.delivered += 1,
                    Err(e) => {
                        stats.failed += 1;
                        log::warn!(
                            "⚠️  Change event {} {} #{} not delivered: {}",
                            event.entity_type.as_str(),
                            event.operation.as_str(),
                            event.entity_id,
                            e
                        );
                    }
                }
            }
            _ = flush_timer.tick() => {
                if let Err(e) = sink.flush().await {
                    log::warn!("⚠️  {} sink flush failed: {}", sink.sink_type(), e);
                }
            }
        }
    }

    if let Err(e) = sink.flush().await {
        log::warn!("⚠️  {} sink final flush failed: {}", sink.sink_type(), e);
    }

    log::info!(
        "✅ Change dispatcher stopped ({} delivered, {} failed)",
        stats.delivered,
        stats.failed
    );
    stats
}
