//! JSONL mutation ingestion
//!
//! One record per line, applied in its own transaction:
//!
//! ```text
//! {"table":"flow_run","op":"update","old":{...},"new":{...}}
//! {"table":"group_membership","op":"insert","new":{"group_id":3,"contact_id":9}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::ledger::LedgerError;
use crate::triggers::event::{EntityType, MutationEvent};
use crate::triggers::hub::{MutationTx, TriggerHub};
use crate::triggers::rows::{
    BroadcastRow, ChannelEventRow, ChannelLogRow, ContactRow, DebitRow, FlowRunRow,
    GroupMembershipRow, MsgRow,
};
use serde::{Deserialize, Serialize};
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum MutationRecord {
    Msg(MutationEvent<MsgRow>),
    Broadcast(MutationEvent<BroadcastRow>),
    ChannelEvent(MutationEvent<ChannelEventRow>),
    FlowRun(MutationEvent<FlowRunRow>),
    ChannelLog(MutationEvent<ChannelLogRow>),
    Debit(MutationEvent<DebitRow>),
    GroupMembership(MutationEvent<GroupMembershipRow>),
    Contact(MutationEvent<ContactRow>),
}

impl MutationRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            MutationRecord::Msg(_) => EntityType::Msg,
            MutationRecord::Broadcast(_) => EntityType::Broadcast,
            MutationRecord::ChannelEvent(_) => EntityType::ChannelEvent,
            MutationRecord::FlowRun(_) => EntityType::FlowRun,
            MutationRecord::ChannelLog(_) => EntityType::ChannelLog,
            MutationRecord::Debit(_) => EntityType::Debit,
            MutationRecord::GroupMembership(_) => EntityType::GroupMembership,
            MutationRecord::Contact(_) => EntityType::Contact,
        }
    }

    /// Fire the record inside an open transaction. Returns the deltas
    /// appended.
    pub fn apply(self, tx: &mut MutationTx<'_>) -> Result<usize, LedgerError> {
        match self {
            MutationRecord::Msg(event) => tx.fire(event),
            MutationRecord::Broadcast(event) => tx.fire(event),
            MutationRecord::ChannelEvent(event) => tx.fire(event),
            MutationRecord::FlowRun(event) => tx.fire(event),
            MutationRecord::ChannelLog(event) => tx.fire(event),
            MutationRecord::Debit(event) => tx.fire(event),
            MutationRecord::GroupMembership(event) => tx.fire(event),
            MutationRecord::Contact(event) => tx.fire(event),
        }
    }
}

/// `Ok(None)` for blank and comment lines
pub fn parse_line(line: &str) -> Result<Option<MutationRecord>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub applied: usize,
    pub deltas: usize,
    /// Lines that did not parse
    pub rejected: usize,
    /// Records whose transaction failed and was rolled back
    pub failed: usize,
}

/// Parse and apply one line, recording the outcome
pub fn ingest_line(hub: &TriggerHub, line: &str, report: &mut IngestReport) {
    let record = match parse_line(line) {
        Ok(Some(record)) => record,
        Ok(None) => return,
        Err(e) => {
            report.rejected += 1;
            log::warn!("⚠️  Rejected mutation record: {}", e);
            return;
        }
    };

    let entity = record.entity_type();
    match hub.with_mutations(|tx| record.apply(tx)) {
        Ok(deltas) => {
            report.applied += 1;
            report.deltas += deltas;
        }
        Err(e) => {
            report.failed += 1;
            log::error!("❌ {} mutation rolled back: {}", entity.as_str(), e);
        }
    }
}

/// Apply every record from a reader
pub fn ingest_reader<B: BufRead>(hub: &TriggerHub, reader: B) -> Result<IngestReport, LedgerError> {
    let mut report = IngestReport::default();
    for line in reader.lines() {
        ingest_line(hub, &line?, &mut report);
    }
    Ok(report)
}
