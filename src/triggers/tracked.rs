//! Per-table wiring: which interceptors fire, what gets notified, and what
//! cascades a mutation sets off
//!
//! | Table            | Interceptors | Notified                  | Cascade            |
//! |------------------|--------------|---------------------------|--------------------|
//! | msg              | 2            | every mutation            |                    |
//! | broadcast        |              | every mutation            |                    |
//! | channel_event    |              | every mutation            |                    |
//! | flow_run         | 5            | insert, delete, path edit | lifecycle check    |
//! | channel_log      | 1            |                           |                    |
//! | debit            | 1            |                           |                    |
//! | group_membership | 1            |                           |                    |
//! | contact          |              |                           | dynamic group sync |

use super::event::{EntityType, MutationEvent, Operation};
use super::hub::MutationTx;
use super::interceptor::CounterTracker;
use super::rows::{
    BroadcastRow, ChannelEventRow, ChannelLogRow, ContactRow, DebitRow, FlowRunRow,
    GroupMembershipRow, MsgRow,
};
use super::trackers::{
    CHANNEL_LOG_TRACKERS, DEBIT_TRACKERS, FLOW_RUN_TRACKERS, GROUP_MEMBERSHIP_TRACKERS,
    MSG_TRACKERS,
};
use crate::ledger::LedgerError;
use crate::runs::{transition, RunTransition};

/// A row type whose mutations flow through the trigger hub
pub trait TrackedRow: Sized + 'static {
    const ENTITY: EntityType;

    fn id(&self) -> i64;

    /// How the row is named in logs
    fn describe(&self) -> String {
        format!("#{}", self.id())
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>];

    /// Fields to report to the change notifier, or `None` when this mutation
    /// is not notified
    fn change_fields(_event: &MutationEvent<Self>) -> Option<Vec<String>> {
        None
    }

    /// Entry point for `MutationTx::fire`. Rows backed by a relation the hub
    /// maintains itself override this.
    fn route(tx: &mut MutationTx<'_>, event: MutationEvent<Self>) -> Result<usize, LedgerError> {
        tx.fire_tracked(event)
    }

    /// Follow-up work inside the same transaction
    fn cascade(_tx: &mut MutationTx<'_>, _event: &MutationEvent<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Insert lists every field, delete none, update the ones that differ.
/// An update that changes nothing notifiable is not reported.
fn row_change_fields<R>(
    event: &MutationEvent<R>,
    fields: &[&str],
    diff: fn(&R, &R) -> Vec<String>,
) -> Option<Vec<String>> {
    match (event.op, event.old.as_ref(), event.new.as_ref()) {
        (Operation::Insert, _, _) => Some(fields.iter().map(|f| f.to_string()).collect()),
        (Operation::Delete, _, _) => Some(Vec::new()),
        (Operation::Update, Some(old), Some(new)) => {
            let changed = diff(old, new);
            if changed.is_empty() {
                None
            } else {
                Some(changed)
            }
        }
        _ => None,
    }
}

impl TrackedRow for MsgRow {
    const ENTITY: EntityType = EntityType::Msg;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &MSG_TRACKERS
    }

    fn change_fields(event: &MutationEvent<Self>) -> Option<Vec<String>> {
        row_change_fields(event, &MsgRow::FIELDS, MsgRow::diff)
    }
}

impl TrackedRow for BroadcastRow {
    const ENTITY: EntityType = EntityType::Broadcast;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &[]
    }

    fn change_fields(event: &MutationEvent<Self>) -> Option<Vec<String>> {
        row_change_fields(event, &BroadcastRow::FIELDS, BroadcastRow::diff)
    }
}

impl TrackedRow for ChannelEventRow {
    const ENTITY: EntityType = EntityType::ChannelEvent;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &[]
    }

    fn change_fields(event: &MutationEvent<Self>) -> Option<Vec<String>> {
        row_change_fields(event, &ChannelEventRow::FIELDS, ChannelEventRow::diff)
    }
}

impl TrackedRow for FlowRunRow {
    const ENTITY: EntityType = EntityType::FlowRun;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &FLOW_RUN_TRACKERS
    }

    /// Runs are only notified when their path moves
    fn change_fields(event: &MutationEvent<Self>) -> Option<Vec<String>> {
        match (event.op, event.old.as_ref(), event.new.as_ref()) {
            (Operation::Update, Some(old), Some(new)) if old.path == new.path => None,
            _ => row_change_fields(event, &FlowRunRow::FIELDS, FlowRunRow::diff),
        }
    }

    fn cascade(_tx: &mut MutationTx<'_>, event: &MutationEvent<Self>) -> Result<(), LedgerError> {
        match transition(event) {
            Ok(RunTransition::Exited(exit_type)) => {
                log::debug!(
                    "🏁 Run {:?} exited ({})",
                    event.row().map(|r| r.id),
                    exit_type.as_str()
                );
            }
            Ok(_) => {}
            // Counted as it happened; the bucket move is still applied
            Err(e) => log::warn!("⚠️  Flow run lifecycle violation: {}", e),
        }
        Ok(())
    }
}

impl TrackedRow for ChannelLogRow {
    const ENTITY: EntityType = EntityType::ChannelLog;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &CHANNEL_LOG_TRACKERS
    }
}

impl TrackedRow for DebitRow {
    const ENTITY: EntityType = EntityType::Debit;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &DEBIT_TRACKERS
    }
}

/// Membership events always write `group_memberships` too, so the relation
/// and the count move together whichever entry point fires them.
impl TrackedRow for GroupMembershipRow {
    const ENTITY: EntityType = EntityType::GroupMembership;

    fn id(&self) -> i64 {
        self.contact_id
    }

    fn describe(&self) -> String {
        format!("group {} contact {}", self.group_id, self.contact_id)
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &GROUP_MEMBERSHIP_TRACKERS
    }

    fn route(tx: &mut MutationTx<'_>, event: MutationEvent<Self>) -> Result<usize, LedgerError> {
        tx.fire_membership(event)
    }
}

impl TrackedRow for ContactRow {
    const ENTITY: EntityType = EntityType::Contact;

    fn id(&self) -> i64 {
        self.id
    }

    fn trackers() -> &'static [&'static dyn CounterTracker<Self>] {
        &[]
    }

    fn cascade(tx: &mut MutationTx<'_>, event: &MutationEvent<Self>) -> Result<(), LedgerError> {
        match (event.op, event.old.as_ref(), event.new.as_ref()) {
            (Operation::Delete, Some(old), _) => {
                tx.leave_all_groups(old.id)?;
            }
            (_, old, Some(new)) => {
                tx.sync_groups(old, new)?;
            }
            _ => {}
        }
        Ok(())
    }
}
