//! Row images of the observed tables
//!
//! Only the columns the interceptors and the change notifier look at are
//! carried. Timestamps are UTC.

use crate::ledger::{Direction, ExitType, MsgType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Names of the listed fields whose values differ between two row images
macro_rules! changed_fields {
    ($old:expr, $new:expr; $($field:ident),+ $(,)?) => {{
        let mut changed: Vec<String> = Vec::new();
        $(
            if $old.$field != $new.$field {
                changed.push(stringify!($field).to_string());
            }
        )+
        changed
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgStatus {
    Pending,
    Queued,
    Wired,
    Sent,
    Delivered,
    Handled,
    Errored,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgRow {
    pub id: i64,
    pub channel_id: Option<i64>,
    pub contact_id: i64,
    pub direction: Direction,
    pub msg_type: MsgType,
    pub status: MsgStatus,
    pub visibility: Visibility,
    pub text: String,
    pub topup_id: Option<i64>,
    pub created_on: DateTime<Utc>,
}

impl MsgRow {
    pub const FIELDS: [&'static str; 9] = [
        "channel_id",
        "contact_id",
        "direction",
        "msg_type",
        "status",
        "visibility",
        "text",
        "topup_id",
        "created_on",
    ];

    pub fn diff(&self, new: &Self) -> Vec<String> {
        changed_fields!(self, new; channel_id, contact_id, direction, msg_type, status,
            visibility, text, topup_id, created_on)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRow {
    pub id: i64,
    pub text: String,
    pub status: MsgStatus,
    pub recipient_count: i64,
    pub created_on: DateTime<Utc>,
}

impl BroadcastRow {
    pub const FIELDS: [&'static str; 4] = ["text", "status", "recipient_count", "created_on"];

    pub fn diff(&self, new: &Self) -> Vec<String> {
        changed_fields!(self, new; text, status, recipient_count, created_on)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEventRow {
    pub id: i64,
    pub channel_id: i64,
    pub contact_id: Option<i64>,
    pub event_type: String,
    pub extra: Option<serde_json::Value>,
    pub occurred_on: DateTime<Utc>,
}

impl ChannelEventRow {
    pub const FIELDS: [&'static str; 5] =
        ["channel_id", "contact_id", "event_type", "extra", "occurred_on"];

    pub fn diff(&self, new: &Self) -> Vec<String> {
        changed_fields!(self, new; channel_id, contact_id, event_type, extra, occurred_on)
    }
}

/// One node visit on a run's path. `exit_uuid` is set once the run leaves
/// the node; the last step of a waiting run has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub node_uuid: String,
    pub exit_uuid: Option<String>,
    pub arrived_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub value: String,
    pub category: Option<String>,
    pub node_uuid: String,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRunRow {
    pub id: i64,
    pub flow_id: i64,
    pub start_id: Option<i64>,
    pub contact_id: i64,
    pub exit_type: Option<ExitType>,
    pub is_active: bool,
    #[serde(default)]
    pub path: Vec<PathStep>,
    #[serde(default)]
    pub results: BTreeMap<String, RunResult>,
    pub modified_on: DateTime<Utc>,
}

impl FlowRunRow {
    pub const FIELDS: [&'static str; 7] = [
        "flow_id",
        "start_id",
        "contact_id",
        "exit_type",
        "is_active",
        "path",
        "results",
    ];

    pub fn diff(&self, new: &Self) -> Vec<String> {
        changed_fields!(self, new; flow_id, start_id, contact_id, exit_type, is_active,
            path, results)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLogRow {
    pub id: i64,
    pub channel_id: Option<i64>,
    pub is_error: bool,
    pub description: String,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitRow {
    pub id: i64,
    pub topup_id: Option<i64>,
    pub amount: i64,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembershipRow {
    pub group_id: i64,
    pub contact_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRow {
    pub id: i64,
    pub name: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    pub is_active: bool,
}

impl ContactRow {
    /// Value of a built-in attribute (`name`, `language`) or a custom field.
    /// Custom field keys match case-insensitively.
    pub fn attribute(&self, field: &str) -> Option<&str> {
        match field {
            "name" => self.name.as_deref(),
            "language" => self.language.as_deref(),
            _ => self.fields.get(field).map(String::as_str).or_else(|| {
                self.fields
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(field))
                    .map(|(_, value)| value.as_str())
            }),
        }
    }

    /// Lowercased names of attributes that differ between two images,
    /// including `is_active`
    pub fn changed_attributes(&self, new: &Self) -> BTreeSet<String> {
        let mut changed: BTreeSet<String> = changed_fields!(self, new; name, language, is_active)
            .into_iter()
            .collect();

        for key in self.fields.keys().chain(new.fields.keys()) {
            if self.fields.get(key) != new.fields.get(key) {
                changed.insert(key.to_lowercase());
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn contact(fields: &[(&str, &str)]) -> ContactRow {
        ContactRow {
            id: 1,
            name: Some("Ann".to_string()),
            language: None,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            is_active: true,
        }
    }

    #[test]
    fn test_msg_diff_lists_changed_columns() {
        let old = MsgRow {
            id: 1,
            channel_id: Some(2),
            contact_id: 3,
            direction: Direction::Out,
            msg_type: MsgType::Text,
            status: MsgStatus::Queued,
            visibility: Visibility::Visible,
            text: "hi".to_string(),
            topup_id: None,
            created_on: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let mut new = old.clone();
        new.status = MsgStatus::Sent;

        assert_eq!(old.diff(&new), vec!["status".to_string()]);
        assert!(old.diff(&old).is_empty());
    }

    #[test]
    fn test_contact_attribute_lookup() {
        let c = contact(&[("Age", "31")]);
        assert_eq!(c.attribute("name"), Some("Ann"));
        assert_eq!(c.attribute("age"), Some("31"));
        assert_eq!(c.attribute("language"), None);
        assert_eq!(c.attribute("city"), None);
    }

    #[test]
    fn test_contact_changed_attributes() {
        let old = contact(&[("age", "31"), ("city", "Kigali")]);
        let mut new = contact(&[("age", "32"), ("district", "Gasabo")]);
        new.is_active = false;

        let changed = old.changed_attributes(&new);
        let expected: BTreeSet<String> = ["age", "city", "district", "is_active"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(changed, expected);
    }
}
