//! Counter scopes and keys
//!
//! A `CounterKey` identifies one counter. Its variant determines the scope,
//! and its canonical JSON encoding is what the ledger tables store in
//! `counter_key`. serde emits struct fields in declaration order, so two equal
//! keys always encode to the same string.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Category of counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    ChannelCount,
    FlowRunCount,
    FlowCategoryCount,
    FlowStartCount,
    TopUpCredit,
    ChannelLogCount,
    GroupCount,
    FlowPathCount,
    FlowNodeCount,
}

impl CounterScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterScope::ChannelCount => "channel_count",
            CounterScope::FlowRunCount => "flow_run_count",
            CounterScope::FlowCategoryCount => "flow_category_count",
            CounterScope::FlowStartCount => "flow_start_count",
            CounterScope::TopUpCredit => "topup_credit",
            CounterScope::ChannelLogCount => "channel_log_count",
            CounterScope::GroupCount => "group_count",
            CounterScope::FlowPathCount => "flow_path_count",
            CounterScope::FlowNodeCount => "flow_node_count",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|scope| scope.as_str() == s)
    }

    pub fn all() -> [CounterScope; 9] {
        [
            CounterScope::ChannelCount,
            CounterScope::FlowRunCount,
            CounterScope::FlowCategoryCount,
            CounterScope::FlowStartCount,
            CounterScope::TopUpCredit,
            CounterScope::ChannelLogCount,
            CounterScope::GroupCount,
            CounterScope::FlowPathCount,
            CounterScope::FlowNodeCount,
        ]
    }

    /// Unit scopes only ever move by ±1 per delta; credit scopes move by ±N.
    pub fn is_unit(&self) -> bool {
        !matches!(self, CounterScope::TopUpCredit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Text,
    Voice,
}

/// Terminal disposition of a flow run. A run that is still going has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitType {
    Completed,
    Expired,
    Interrupted,
}

impl ExitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitType::Completed => "completed",
            ExitType::Expired => "expired",
            ExitType::Interrupted => "interrupted",
        }
    }
}

/// Identifier of a single counter within its scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CounterKey {
    /// Messages per channel, direction and type, bucketed by UTC day
    Channel {
        channel_id: i64,
        direction: Direction,
        msg_type: MsgType,
        day: NaiveDate,
    },
    /// Runs per flow and exit type (`None` = still active)
    FlowRun {
        flow_id: i64,
        exit_type: Option<ExitType>,
    },
    /// Runs per flow result category
    FlowCategory {
        flow_id: i64,
        result_key: String,
        category: String,
    },
    /// Runs created by a flow start
    FlowStart { start_id: i64 },
    /// Credits consumed from a topup
    TopUpCredit { topup_id: i64 },
    /// Error logs per channel
    ChannelLog { channel_id: i64 },
    /// Members per group
    Group { group_id: i64 },
    /// Path segment traversals per flow, bucketed by UTC hour
    FlowPath {
        flow_id: i64,
        from_uuid: String,
        to_uuid: String,
        period: DateTime<Utc>,
    },
    /// Active runs currently sitting at a node
    FlowNode { flow_id: i64, node_uuid: String },
}

impl CounterKey {
    pub fn scope(&self) -> CounterScope {
        match self {
            CounterKey::Channel { .. } => CounterScope::ChannelCount,
            CounterKey::FlowRun { .. } => CounterScope::FlowRunCount,
            CounterKey::FlowCategory { .. } => CounterScope::FlowCategoryCount,
            CounterKey::FlowStart { .. } => CounterScope::FlowStartCount,
            CounterKey::TopUpCredit { .. } => CounterScope::TopUpCredit,
            CounterKey::ChannelLog { .. } => CounterScope::ChannelLogCount,
            CounterKey::Group { .. } => CounterScope::GroupCount,
            CounterKey::FlowPath { .. } => CounterScope::FlowPathCount,
            CounterKey::FlowNode { .. } => CounterScope::FlowNodeCount,
        }
    }

    /// Id of the entity this counter rolls up to (channel, flow, start,
    /// topup or group). Used for owner-wide reads.
    pub fn owner_id(&self) -> i64 {
        match self {
            CounterKey::Channel { channel_id, .. } | CounterKey::ChannelLog { channel_id } => {
                *channel_id
            }
            CounterKey::FlowRun { flow_id, .. }
            | CounterKey::FlowCategory { flow_id, .. }
            | CounterKey::FlowPath { flow_id, .. }
            | CounterKey::FlowNode { flow_id, .. } => *flow_id,
            CounterKey::FlowStart { start_id } => *start_id,
            CounterKey::TopUpCredit { topup_id } => *topup_id,
            CounterKey::Group { group_id } => *group_id,
        }
    }

    /// Canonical string stored in `counter_key`
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(encoded: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(encoded)
    }
}

/// Day bucket used by channel message counts
pub fn day_bucket(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Hour bucket used by flow path counts
pub fn hour_period(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(ts)
}
