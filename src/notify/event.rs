use crate::triggers::event::{EntityType, Operation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row mutation, as seen by external consumers. Emitted, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub operation: Operation,
    /// Every notifiable field on insert, the differing ones on update,
    /// empty on delete
    pub changed_fields: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}
