//! Concrete interceptors, one per tracked relationship
//!
//! | Tracker                | Row            | Scope               |
//! |------------------------|----------------|---------------------|
//! | `ChannelCountTracker`  | msg            | `ChannelCount`      |
//! | `TopUpMessageTracker`  | msg            | `TopUpCredit`       |
//! | `TopUpDebitTracker`    | debit          | `TopUpCredit`       |
//! | `ChannelLogTracker`    | channel log    | `ChannelLogCount`   |
//! | `GroupCountTracker`    | membership     | `GroupCount`        |
//! | `FlowRunCountTracker`  | flow run       | `FlowRunCount`      |
//! | `FlowCategoryTracker`  | flow run       | `FlowCategoryCount` |
//! | `FlowStartCountTracker`| flow run       | `FlowStartCount`    |
//! | `FlowPathTracker`      | flow run       | `FlowPathCount`     |
//! | `FlowNodeTracker`      | flow run       | `FlowNodeCount`     |

use super::interceptor::{Contribution, CounterTracker, DerivationError};
use super::rows::{ChannelLogRow, DebitRow, FlowRunRow, GroupMembershipRow, MsgRow};
use crate::ledger::scope::{day_bucket, hour_period};
use crate::ledger::CounterKey;
use crate::runs::{derive_facts, RunState};

pub struct ChannelCountTracker;

impl CounterTracker<MsgRow> for ChannelCountTracker {
    fn name(&self) -> &'static str {
        "channel_count"
    }

    fn contributions(&self, row: &MsgRow) -> Result<Vec<Contribution>, DerivationError> {
        let channel_id = row
            .channel_id
            .ok_or(DerivationError::MissingField("channel_id"))?;

        Ok(vec![Contribution::one(CounterKey::Channel {
            channel_id,
            direction: row.direction,
            msg_type: row.msg_type,
            day: day_bucket(row.created_on),
        })])
    }
}

/// Each message sent against a topup consumes one credit
pub struct TopUpMessageTracker;

impl CounterTracker<MsgRow> for TopUpMessageTracker {
    fn name(&self) -> &'static str {
        "topup_msg"
    }

    fn contributions(&self, row: &MsgRow) -> Result<Vec<Contribution>, DerivationError> {
        Ok(row
            .topup_id
            .map(|topup_id| Contribution::one(CounterKey::TopUpCredit { topup_id }))
            .into_iter()
            .collect())
    }
}

pub struct TopUpDebitTracker;

impl CounterTracker<DebitRow> for TopUpDebitTracker {
    fn name(&self) -> &'static str {
        "topup_debit"
    }

    fn contributions(&self, row: &DebitRow) -> Result<Vec<Contribution>, DerivationError> {
        let topup_id = row
            .topup_id
            .ok_or(DerivationError::MissingField("topup_id"))?;

        if row.amount <= 0 {
            return Err(DerivationError::InvalidValue {
                field: "amount",
                reason: format!("debit amount must be positive, got {}", row.amount),
            });
        }

        Ok(vec![Contribution {
            key: CounterKey::TopUpCredit { topup_id },
            value: row.amount,
        }])
    }
}

/// Only error logs count
pub struct ChannelLogTracker;

impl CounterTracker<ChannelLogRow> for ChannelLogTracker {
    fn name(&self) -> &'static str {
        "channel_log"
    }

    fn contributions(&self, row: &ChannelLogRow) -> Result<Vec<Contribution>, DerivationError> {
        if !row.is_error {
            return Ok(Vec::new());
        }

        let channel_id = row
            .channel_id
            .ok_or(DerivationError::MissingField("channel_id"))?;
        Ok(vec![Contribution::one(CounterKey::ChannelLog { channel_id })])
    }
}

pub struct GroupCountTracker;

impl CounterTracker<GroupMembershipRow> for GroupCountTracker {
    fn name(&self) -> &'static str {
        "group_count"
    }

    fn contributions(
        &self,
        row: &GroupMembershipRow,
    ) -> Result<Vec<Contribution>, DerivationError> {
        Ok(vec![Contribution::one(CounterKey::Group {
            group_id: row.group_id,
        })])
    }
}

pub struct FlowRunCountTracker;

impl CounterTracker<FlowRunRow> for FlowRunCountTracker {
    fn name(&self) -> &'static str {
        "flow_run_count"
    }

    fn contributions(&self, row: &FlowRunRow) -> Result<Vec<Contribution>, DerivationError> {
        Ok(vec![Contribution::one(CounterKey::FlowRun {
            flow_id: row.flow_id,
            exit_type: row.exit_type,
        })])
    }
}

/// One count per (result key, category) the run has recorded
pub struct FlowCategoryTracker;

impl CounterTracker<FlowRunRow> for FlowCategoryTracker {
    fn name(&self) -> &'static str {
        "flow_category_count"
    }

    fn contributions(&self, row: &FlowRunRow) -> Result<Vec<Contribution>, DerivationError> {
        Ok(row
            .results
            .iter()
            .filter_map(|(result_key, result)| {
                let category = result.category.as_deref()?;
                if category.is_empty() {
                    return None;
                }
                Some(Contribution::one(CounterKey::FlowCategory {
                    flow_id: row.flow_id,
                    result_key: result_key.clone(),
                    category: category.to_string(),
                }))
            })
            .collect())
    }
}

pub struct FlowStartCountTracker;

impl CounterTracker<FlowRunRow> for FlowStartCountTracker {
    fn name(&self) -> &'static str {
        "flow_start_count"
    }

    fn contributions(&self, row: &FlowRunRow) -> Result<Vec<Contribution>, DerivationError> {
        Ok(row
            .start_id
            .map(|start_id| Contribution::one(CounterKey::FlowStart { start_id }))
            .into_iter()
            .collect())
    }
}

/// Segments walked by the run: the exit of each step into the node of the
/// next, bucketed by the hour the run arrived at the next node
pub struct FlowPathTracker;

impl CounterTracker<FlowRunRow> for FlowPathTracker {
    fn name(&self) -> &'static str {
        "flow_path_count"
    }

    fn contributions(&self, row: &FlowRunRow) -> Result<Vec<Contribution>, DerivationError> {
        row.path
            .windows(2)
            .map(|pair| {
                let exit_uuid =
                    pair[0]
                        .exit_uuid
                        .clone()
                        .ok_or_else(|| DerivationError::InvalidValue {
                            field: "path",
                            reason: format!("step at node {} has no exit", pair[0].node_uuid),
                        })?;

                Ok(Contribution::one(CounterKey::FlowPath {
                    flow_id: row.flow_id,
                    from_uuid: exit_uuid,
                    to_uuid: pair[1].node_uuid.clone(),
                    period: hour_period(pair[1].arrived_on),
                }))
            })
            .collect()
    }
}

pub struct FlowNodeTracker;

impl CounterTracker<FlowRunRow> for FlowNodeTracker {
    fn name(&self) -> &'static str {
        "flow_node_count"
    }

    fn contributions(&self, row: &FlowRunRow) -> Result<Vec<Contribution>, DerivationError> {
        let facts = derive_facts(row);
        if !facts.is_active || facts.state != RunState::Active {
            return Ok(Vec::new());
        }

        Ok(facts
            .current_node
            .map(|node_uuid| {
                Contribution::one(CounterKey::FlowNode {
                    flow_id: row.flow_id,
                    node_uuid,
                })
            })
            .into_iter()
            .collect())
    }
}

pub static MSG_TRACKERS: [&dyn CounterTracker<MsgRow>; 2] =
    [&ChannelCountTracker, &TopUpMessageTracker];

pub static DEBIT_TRACKERS: [&dyn CounterTracker<DebitRow>; 1] = [&TopUpDebitTracker];

pub static CHANNEL_LOG_TRACKERS: [&dyn CounterTracker<ChannelLogRow>; 1] = [&ChannelLogTracker];

pub static GROUP_MEMBERSHIP_TRACKERS: [&dyn CounterTracker<GroupMembershipRow>; 1] =
    [&GroupCountTracker];

pub static FLOW_RUN_TRACKERS: [&dyn CounterTracker<FlowRunRow>; 5] = [
    &FlowRunCountTracker,
    &FlowCategoryTracker,
    &FlowStartCountTracker,
    &FlowPathTracker,
    &FlowNodeTracker,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Delta, Direction, ExitType, MsgType};
    use crate::triggers::event::MutationEvent;
    use crate::triggers::interceptor::plan_deltas;
    use crate::triggers::rows::{MsgStatus, PathStep, RunResult, Visibility};
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, hour, min, 0).unwrap()
    }

    fn msg(channel_id: Option<i64>, topup_id: Option<i64>) -> MsgRow {
        MsgRow {
            id: 1,
            channel_id,
            contact_id: 9,
            direction: Direction::Out,
            msg_type: MsgType::Text,
            status: MsgStatus::Queued,
            visibility: Visibility::Visible,
            text: "hello".to_string(),
            topup_id,
            created_on: at(23, 59),
        }
    }

    fn run(exit_type: Option<ExitType>) -> FlowRunRow {
        FlowRunRow {
            id: 5,
            flow_id: 3,
            start_id: Some(8),
            contact_id: 9,
            exit_type,
            is_active: exit_type.is_none(),
            path: vec![
                PathStep {
                    node_uuid: "n1".to_string(),
                    exit_uuid: Some("x1".to_string()),
                    arrived_on: at(10, 5),
                },
                PathStep {
                    node_uuid: "n2".to_string(),
                    exit_uuid: None,
                    arrived_on: at(11, 30),
                },
            ],
            results: BTreeMap::new(),
            modified_on: at(11, 30),
        }
    }

    #[test]
    fn test_channel_count_day_bucket() {
        let c = ChannelCountTracker.contributions(&msg(Some(4), None)).unwrap();
        assert_eq!(
            c,
            vec![Contribution::one(CounterKey::Channel {
                channel_id: 4,
                direction: Direction::Out,
                msg_type: MsgType::Text,
                day: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            })]
        );
    }

    #[test]
    fn test_channel_count_requires_channel() {
        assert_eq!(
            ChannelCountTracker.contributions(&msg(None, None)).unwrap_err(),
            DerivationError::MissingField("channel_id")
        );
    }

    #[test]
    fn test_msg_status_update_is_noop_for_every_msg_tracker() {
        let old = msg(Some(4), Some(2));
        let mut new = old.clone();
        new.status = MsgStatus::Delivered;
        let event = MutationEvent::update(old, new);

        for tracker in MSG_TRACKERS.iter() {
            assert!(plan_deltas(*tracker, &event).unwrap().deltas.is_empty());
        }
    }

    #[test]
    fn test_topup_message_only_when_topup_set() {
        assert!(TopUpMessageTracker
            .contributions(&msg(Some(1), None))
            .unwrap()
            .is_empty());
        assert_eq!(
            TopUpMessageTracker
                .contributions(&msg(Some(1), Some(6)))
                .unwrap(),
            vec![Contribution::one(CounterKey::TopUpCredit { topup_id: 6 })]
        );
    }

    #[test]
    fn test_debit_validation() {
        let debit = DebitRow {
            id: 1,
            topup_id: Some(2),
            amount: 40,
            created_on: at(9, 0),
        };
        assert_eq!(
            plan_deltas(&TopUpDebitTracker, &MutationEvent::insert(debit.clone()))
                .unwrap()
                .deltas,
            vec![Delta::new(CounterKey::TopUpCredit { topup_id: 2 }, 40)]
        );

        let mut zero = debit.clone();
        zero.amount = 0;
        assert!(matches!(
            TopUpDebitTracker.contributions(&zero),
            Err(DerivationError::InvalidValue { field: "amount", .. })
        ));

        let mut orphan = debit;
        orphan.topup_id = None;
        assert_eq!(
            TopUpDebitTracker.contributions(&orphan).unwrap_err(),
            DerivationError::MissingField("topup_id")
        );
    }

    #[test]
    fn test_channel_log_counts_errors_only() {
        let mut log_row = ChannelLogRow {
            id: 1,
            channel_id: Some(3),
            is_error: false,
            description: "ok".to_string(),
            created_on: at(9, 0),
        };
        assert!(ChannelLogTracker.contributions(&log_row).unwrap().is_empty());

        log_row.is_error = true;
        assert_eq!(ChannelLogTracker.contributions(&log_row).unwrap().len(), 1);
    }

    #[test]
    fn test_categories_skip_uncategorized_results() {
        let mut row = run(None);
        for (key, category) in [("color", Some("Red")), ("age", None), ("name", Some(""))] {
            row.results.insert(
                key.to_string(),
                RunResult {
                    name: key.to_string(),
                    value: "v".to_string(),
                    category: category.map(str::to_string),
                    node_uuid: "n1".to_string(),
                    created_on: at(10, 0),
                },
            );
        }

        assert_eq!(
            FlowCategoryTracker.contributions(&row).unwrap(),
            vec![Contribution::one(CounterKey::FlowCategory {
                flow_id: 3,
                result_key: "color".to_string(),
                category: "Red".to_string(),
            })]
        );
    }

    #[test]
    fn test_path_segments_by_arrival_hour() {
        assert_eq!(
            FlowPathTracker.contributions(&run(None)).unwrap(),
            vec![Contribution::one(CounterKey::FlowPath {
                flow_id: 3,
                from_uuid: "x1".to_string(),
                to_uuid: "n2".to_string(),
                period: at(11, 0),
            })]
        );
    }

    #[test]
    fn test_path_step_without_exit_fails() {
        let mut row = run(None);
        row.path[0].exit_uuid = None;
        assert!(FlowPathTracker.contributions(&row).is_err());
    }

    #[test]
    fn test_repaired_path_counts_its_segments() {
        let mut broken = run(None);
        broken.path[0].exit_uuid = None;

        let plan = plan_deltas(&FlowPathTracker, &MutationEvent::update(broken, run(None))).unwrap();
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(
            plan.deltas,
            vec![Delta::new(
                CounterKey::FlowPath {
                    flow_id: 3,
                    from_uuid: "x1".to_string(),
                    to_uuid: "n2".to_string(),
                    period: at(11, 0),
                },
                1
            )]
        );
    }

    #[test]
    fn test_channel_assigned_after_insert() {
        let plan = plan_deltas(
            &ChannelCountTracker,
            &MutationEvent::update(msg(None, None), msg(Some(4), None)),
        )
        .unwrap();
        assert_eq!(plan.deltas.len(), 1);
        assert_eq!(plan.deltas[0].value, 1);
        assert_eq!(
            plan.failures,
            vec![DerivationError::MissingField("channel_id")]
        );
    }

    #[test]
    fn test_node_count_follows_waiting_run() {
        assert_eq!(
            FlowNodeTracker.contributions(&run(None)).unwrap(),
            vec![Contribution::one(CounterKey::FlowNode {
                flow_id: 3,
                node_uuid: "n2".to_string(),
            })]
        );
        assert!(FlowNodeTracker
            .contributions(&run(Some(ExitType::Completed)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_run_exit_moves_every_bucketed_counter() {
        let event = MutationEvent::update(run(None), run(Some(ExitType::Completed)));

        let runs = plan_deltas(&FlowRunCountTracker, &event).unwrap().deltas;
        assert_eq!(runs.len(), 2);

        let nodes = plan_deltas(&FlowNodeTracker, &event).unwrap().deltas;
        assert_eq!(
            nodes,
            vec![Delta::new(
                CounterKey::FlowNode {
                    flow_id: 3,
                    node_uuid: "n2".to_string()
                },
                -1
            )]
        );

        assert!(plan_deltas(&FlowStartCountTracker, &event)
            .unwrap()
            .deltas
            .is_empty());
        assert!(plan_deltas(&FlowPathTracker, &event).unwrap().deltas.is_empty());
    }
}
