//! Trigger hub - the mutation observer every write path goes through
//!
//! ```text
//! with_mutations(|tx| {            BEGIN IMMEDIATE
//!     tx.fire(event)?;   ──▶  interceptors ──append──▶ counter_deltas
//!                        ──▶  cascade (group sync, lifecycle checks)
//!                        ──▶  change event buffered
//! })                               COMMIT ──▶ buffered events published
//! ```
//!
//! Counter deltas are written in the caller's transaction, so they commit or
//! roll back with the mutation. Change events are only published once the
//! commit succeeded, and while the connection lock is still held, so events
//! leave in commit order.

use super::event::{MutationEvent, Operation};
use super::interceptor::plan_deltas;
use super::rows::{ContactRow, GroupMembershipRow};
use super::tracked::TrackedRow;
use crate::groups::{memberships, GroupSynchronizer};
use crate::ledger::sqlite_ledger::{append_delta, reconcile_key};
use crate::ledger::{CounterKey, LedgerError, SqliteLedger};
use crate::notify::{ChangeEvent, ChangeNotifier};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
pub struct TriggerStats {
    deltas_appended: AtomicU64,
    derivation_failures: AtomicU64,
    events_queued: AtomicU64,
    events_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerStatsSnapshot {
    pub deltas_appended: u64,
    pub derivation_failures: u64,
    pub events_queued: u64,
    pub events_dropped: u64,
}

impl TriggerStats {
    pub fn snapshot(&self) -> TriggerStatsSnapshot {
        TriggerStatsSnapshot {
            deltas_appended: self.deltas_appended.load(Ordering::Relaxed),
            derivation_failures: self.derivation_failures.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    deltas_appended: u64,
    derivation_failures: u64,
    events: Vec<ChangeEvent>,
}

/// An open mutation transaction
pub struct MutationTx<'a> {
    conn: &'a Connection,
    hub: &'a TriggerHub,
    now: DateTime<Utc>,
    tally: Tally,
}

impl MutationTx<'_> {
    /// The transaction's connection, for the caller's own writes
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Run every interceptor and cascade for one row mutation. Returns the
    /// number of deltas appended.
    ///
    /// Derivation failures are logged and counted, never returned: the
    /// mutation goes ahead and the failing image counts as empty. Storage
    /// errors are returned and abort the transaction.
    pub fn fire<R: TrackedRow>(&mut self, event: MutationEvent<R>) -> Result<usize, LedgerError> {
        R::route(self, event)
    }

    pub(crate) fn fire_tracked<R: TrackedRow>(
        &mut self,
        event: MutationEvent<R>,
    ) -> Result<usize, LedgerError> {
        if !event.is_well_formed() {
            log::warn!(
                "⚠️  Malformed {} {} event skipped",
                R::ENTITY.as_str(),
                event.op.as_str()
            );
            self.tally.derivation_failures += 1;
            return Ok(0);
        }

        let row_id = event.row().map_or(0, R::id);
        let row_label = event.row().map_or_else(String::new, R::describe);
        let mut appended = 0;

        for tracker in R::trackers() {
            let failures = match plan_deltas(*tracker, &event) {
                Ok(plan) => {
                    for delta in &plan.deltas {
                        append_delta(self.conn, delta, self.now.timestamp())?;
                    }
                    appended += plan.deltas.len();
                    plan.failures
                }
                Err(e) => vec![e],
            };

            for e in failures {
                log::warn!(
                    "⚠️  {} counted nothing for {} {} ({}): {}",
                    tracker.name(),
                    R::ENTITY.as_str(),
                    row_label,
                    event.op.as_str(),
                    e
                );
                self.tally.derivation_failures += 1;
            }
        }
        self.tally.deltas_appended += appended as u64;

        R::cascade(self, &event)?;

        if self.hub.notifier.is_some() {
            if let Some(changed_fields) = R::change_fields(&event) {
                self.tally.events.push(ChangeEvent {
                    entity_type: R::ENTITY,
                    entity_id: row_id,
                    operation: event.op,
                    changed_fields,
                    occurred_at: self.now,
                });
            }
        }

        Ok(appended)
    }

    /// Membership events change the relation itself, so the count only moves
    /// when a row was really added or removed. A duplicate insert or a delete
    /// of a missing row counts nothing.
    pub(crate) fn fire_membership(
        &mut self,
        event: MutationEvent<GroupMembershipRow>,
    ) -> Result<usize, LedgerError> {
        if !event.is_well_formed() {
            return self.fire_tracked(event);
        }

        let before = self.tally.deltas_appended;
        match (event.op, event.old, event.new) {
            (Operation::Update, Some(old), Some(new)) if old == new => {}
            (op, old, new) => {
                if let (Operation::Update | Operation::Delete, Some(old)) = (op, old) {
                    self.remove_from_group(old.group_id, old.contact_id)?;
                }
                if let (Operation::Insert | Operation::Update, Some(new)) = (op, new) {
                    self.add_to_group(new.group_id, new.contact_id)?;
                }
            }
        }
        Ok((self.tally.deltas_appended - before) as usize)
    }

    /// Add a contact to a group. Returns false (and counts nothing) if it was
    /// already a member.
    pub fn add_to_group(&mut self, group_id: i64, contact_id: i64) -> Result<bool, LedgerError> {
        if !memberships::add_member(self.conn, group_id, contact_id, self.now.timestamp())? {
            return Ok(false);
        }
        self.fire_tracked(MutationEvent::insert(GroupMembershipRow {
            group_id,
            contact_id,
        }))?;
        Ok(true)
    }

    /// Remove a contact from a group. Returns false if it was not a member.
    pub fn remove_from_group(&mut self, group_id: i64, contact_id: i64) -> Result<bool, LedgerError> {
        if !memberships::remove_member(self.conn, group_id, contact_id)? {
            return Ok(false);
        }
        self.fire_tracked(MutationEvent::delete(GroupMembershipRow {
            group_id,
            contact_id,
        }))?;
        Ok(true)
    }

    /// Re-evaluate dynamic groups for a changed contact and apply the flips.
    /// Returns the number of memberships that changed.
    pub fn sync_groups(
        &mut self,
        old: Option<&ContactRow>,
        new: &ContactRow,
    ) -> Result<usize, LedgerError> {
        let checks = {
            let groups = self
                .hub
                .groups
                .read()
                .map_err(|_| LedgerError::LockPoisoned)?;
            groups.plan(old, new)
        };

        let mut flips = 0;
        for check in checks {
            let flipped = if check.should_be_member {
                self.add_to_group(check.group_id, new.id)?
            } else {
                self.remove_from_group(check.group_id, new.id)?
            };

            if flipped {
                flips += 1;
                log::debug!(
                    "👥 Contact {} {} dynamic group {}",
                    new.id,
                    if check.should_be_member { "joined" } else { "left" },
                    check.group_id
                );
            }
        }
        Ok(flips)
    }

    /// Remove every member of a group. Returns the number removed.
    pub fn clear_group(&mut self, group_id: i64) -> Result<usize, LedgerError> {
        let members = memberships::members_of(self.conn, group_id)?;
        for &contact_id in &members {
            self.remove_from_group(group_id, contact_id)?;
        }
        Ok(members.len())
    }

    /// Drop a deleted contact from every group it belonged to
    pub fn leave_all_groups(&mut self, contact_id: i64) -> Result<usize, LedgerError> {
        let groups = memberships::groups_of(self.conn, contact_id)?;
        for &group_id in &groups {
            self.remove_from_group(group_id, contact_id)?;
        }
        Ok(groups.len())
    }
}

/// Routes row mutations to interceptors, cascades and the change notifier
pub struct TriggerHub {
    ledger: Arc<SqliteLedger>,
    notifier: Option<ChangeNotifier>,
    groups: RwLock<GroupSynchronizer>,
    stats: TriggerStats,
}

impl TriggerHub {
    pub fn new(ledger: Arc<SqliteLedger>) -> Self {
        Self {
            ledger,
            notifier: None,
            groups: RwLock::new(GroupSynchronizer::new()),
            stats: TriggerStats::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn ledger(&self) -> &Arc<SqliteLedger> {
        &self.ledger
    }

    pub fn stats(&self) -> TriggerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Register a dynamic group. Existing contacts are picked up on their
    /// next change.
    pub fn register_dynamic_group(&self, group_id: i64, query: &str) -> Result<(), LedgerError> {
        let mut groups = self.groups.write().map_err(|_| LedgerError::LockPoisoned)?;
        groups.register(group_id, query)?;
        Ok(())
    }

    /// Unregister a dynamic group and clear the memberships it derived, so
    /// the relation and its counter both return to zero. `None` if the group
    /// was not registered.
    pub fn unregister_dynamic_group(&self, group_id: i64) -> Result<Option<usize>, LedgerError> {
        // Released before the transaction: sync_groups takes it under the
        // connection lock
        let registered = {
            let mut groups = self.groups.write().map_err(|_| LedgerError::LockPoisoned)?;
            groups.unregister(group_id)
        };
        if !registered {
            return Ok(None);
        }

        let cleared = self.with_mutations(|tx| tx.clear_group(group_id))?;
        log::info!(
            "👥 Dynamic group {} unregistered, {} memberships cleared",
            group_id,
            cleared
        );
        Ok(Some(cleared))
    }

    /// Run `f` inside one transaction. Everything `f` fires commits together;
    /// an error from `f` rolls all of it back and publishes nothing.
    pub fn with_mutations<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut MutationTx<'_>) -> Result<T, LedgerError>,
    {
        let mut conn = self.ledger.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (value, tally) = {
            let mut mutation_tx = MutationTx {
                conn: &tx,
                hub: self,
                now: Utc::now(),
                tally: Tally::default(),
            };
            let value = f(&mut mutation_tx)?;
            (value, mutation_tx.tally)
        };

        tx.commit()?;

        self.stats
            .deltas_appended
            .fetch_add(tally.deltas_appended, Ordering::Relaxed);
        self.stats
            .derivation_failures
            .fetch_add(tally.derivation_failures, Ordering::Relaxed);
        self.publish(tally.events);

        drop(conn);
        Ok(value)
    }

    /// Fire a single mutation in its own transaction
    pub fn apply<R: TrackedRow>(&self, event: MutationEvent<R>) -> Result<usize, LedgerError> {
        self.with_mutations(|tx| tx.fire(event))
    }

    /// Reset a group's counter to the cardinality of the membership relation
    pub fn recount_group(&self, group_id: i64) -> Result<i64, LedgerError> {
        let mut conn = self.ledger.lock()?;
        let count = memberships::member_count(&conn, group_id)?;
        reconcile_key(
            &mut conn,
            &CounterKey::Group { group_id },
            count,
            Utc::now().timestamp(),
        )?;
        Ok(count)
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        let notifier = match &self.notifier {
            Some(notifier) => notifier,
            None => return,
        };

        for event in events {
            let (entity, op, id) = (event.entity_type, event.operation, event.entity_id);
            match notifier.publish(event) {
                Ok(()) => {
                    self.stats.events_queued.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "⚠️  Dropped {} {} #{} change event: {}",
                        entity.as_str(),
                        op.as_str(),
                        id,
                        e
                    );
                }
            }
        }
    }
}
