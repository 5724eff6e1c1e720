//! Row-level mutation events

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Tables whose row mutations are observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Msg,
    Broadcast,
    ChannelEvent,
    FlowRun,
    ChannelLog,
    Debit,
    GroupMembership,
    Contact,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Msg => "msg",
            EntityType::Broadcast => "broadcast",
            EntityType::ChannelEvent => "channel_event",
            EntityType::FlowRun => "flow_run",
            EntityType::ChannelLog => "channel_log",
            EntityType::Debit => "debit",
            EntityType::GroupMembership => "group_membership",
            EntityType::Contact => "contact",
        }
    }
}

/// The (operation, old row, new row) triple seen at trigger time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent<R> {
    pub op: Operation,
    pub old: Option<R>,
    pub new: Option<R>,
}

impl<R> MutationEvent<R> {
    pub fn insert(new: R) -> Self {
        Self {
            op: Operation::Insert,
            old: None,
            new: Some(new),
        }
    }

    pub fn update(old: R, new: R) -> Self {
        Self {
            op: Operation::Update,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(old: R) -> Self {
        Self {
            op: Operation::Delete,
            old: Some(old),
            new: None,
        }
    }

    /// Whether the row images present match the operation
    pub fn is_well_formed(&self) -> bool {
        match self.op {
            Operation::Insert => self.new.is_some(),
            Operation::Update => self.old.is_some() && self.new.is_some(),
            Operation::Delete => self.old.is_some(),
        }
    }

    /// The row image the event is about: new for insert/update, old for delete
    pub fn row(&self) -> Option<&R> {
        match self.op {
            Operation::Delete => self.old.as_ref(),
            _ => self.new.as_ref(),
        }
    }
}
