//! Flow run lifecycle
//!
//! ```text
//! Created ──▶ Active ⇄ (path / results updates) ──▶ Completed | Expired | Interrupted
//! ```
//!
//! Exit types are terminal: once set they never change or revert to none.

use crate::ledger::ExitType;
use crate::triggers::event::{MutationEvent, Operation};
use crate::triggers::rows::FlowRunRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Active,
    Exited(ExitType),
}

impl RunState {
    pub fn of(run: &FlowRunRow) -> Self {
        match run.exit_type {
            Some(exit_type) => RunState::Exited(exit_type),
            None => RunState::Active,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Exited(_))
    }
}

/// Facts derived from a run row, consumed by node counts and analytics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFacts {
    pub state: RunState,
    pub is_active: bool,
    /// Node of the last path step, while the run has not exited
    pub current_node: Option<String>,
    /// Active, not exited, and sitting at a node it has not left yet
    pub is_waiting: bool,
}

pub fn derive_facts(run: &FlowRunRow) -> RunFacts {
    let state = RunState::of(run);
    let last = if state.is_terminal() {
        None
    } else {
        run.path.last()
    };

    RunFacts {
        state,
        is_active: run.is_active,
        current_node: last.map(|step| step.node_uuid.clone()),
        is_waiting: run.is_active && last.map_or(false, |step| step.exit_uuid.is_none()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTransition {
    Started,
    Progressed {
        path_changed: bool,
        results_changed: bool,
        facts_changed: bool,
    },
    Exited(ExitType),
    Unchanged,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    MissingImage(Operation),
    IdentityChanged { old_id: i64, new_id: i64 },
    ExitReverted {
        run_id: i64,
        from: ExitType,
        to: Option<ExitType>,
    },
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::MissingImage(op) => {
                write!(f, "{} event without the required run image", op.as_str())
            }
            LifecycleError::IdentityChanged { old_id, new_id } => {
                write!(f, "run id changed from {} to {}", old_id, new_id)
            }
            LifecycleError::ExitReverted { run_id, from, to } => write!(
                f,
                "run {} exit_type moved from {} to {}",
                run_id,
                from.as_str(),
                to.map_or("none", |t| t.as_str())
            ),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Classify a run mutation and check it against the state machine
pub fn transition(event: &MutationEvent<FlowRunRow>) -> Result<RunTransition, LifecycleError> {
    match (event.op, event.old.as_ref(), event.new.as_ref()) {
        (Operation::Insert, _, Some(new)) => Ok(match new.exit_type {
            // Runs can be created already exited (e.g. imported history)
            Some(exit_type) => RunTransition::Exited(exit_type),
            None => RunTransition::Started,
        }),
        (Operation::Delete, Some(_), _) => Ok(RunTransition::Deleted),
        (Operation::Update, Some(old), Some(new)) => {
            if old.id != new.id {
                return Err(LifecycleError::IdentityChanged {
                    old_id: old.id,
                    new_id: new.id,
                });
            }

            match (old.exit_type, new.exit_type) {
                (Some(from), to) if to != Some(from) => Err(LifecycleError::ExitReverted {
                    run_id: new.id,
                    from,
                    to,
                }),
                (None, Some(exit_type)) => Ok(RunTransition::Exited(exit_type)),
                _ => {
                    let path_changed = old.path != new.path;
                    let results_changed = old.results != new.results;
                    let facts_changed = derive_facts(old) != derive_facts(new);

                    if path_changed || results_changed || facts_changed {
                        Ok(RunTransition::Progressed {
                            path_changed,
                            results_changed,
                            facts_changed,
                        })
                    } else {
                        Ok(RunTransition::Unchanged)
                    }
                }
            }
        }
        (op, _, _) => Err(LifecycleError::MissingImage(op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::rows::PathStep;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn run(exit_type: Option<ExitType>, path: &[(&str, Option<&str>)]) -> FlowRunRow {
        FlowRunRow {
            id: 1,
            flow_id: 10,
            start_id: None,
            contact_id: 100,
            exit_type,
            is_active: exit_type.is_none(),
            path: path
                .iter()
                .map(|(node, exit)| PathStep {
                    node_uuid: node.to_string(),
                    exit_uuid: exit.map(str::to_string),
                    arrived_on: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
                })
                .collect(),
            results: BTreeMap::new(),
            modified_on: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_facts_for_waiting_run() {
        let facts = derive_facts(&run(None, &[("n1", Some("e1")), ("n2", None)]));
        assert_eq!(facts.current_node.as_deref(), Some("n2"));
        assert!(facts.is_waiting);
        assert_eq!(facts.state, RunState::Active);
    }

    #[test]
    fn test_facts_for_exited_run() {
        let facts = derive_facts(&run(Some(ExitType::Completed), &[("n1", Some("e1"))]));
        assert_eq!(facts.current_node, None);
        assert!(!facts.is_waiting);
        assert!(facts.state.is_terminal());
    }

    #[test]
    fn test_transition_to_terminal() {
        let event = MutationEvent::update(
            run(None, &[("n1", None)]),
            run(Some(ExitType::Expired), &[("n1", None)]),
        );
        assert_eq!(
            transition(&event).unwrap(),
            RunTransition::Exited(ExitType::Expired)
        );
    }

    #[test]
    fn test_exit_never_reverts() {
        let event = MutationEvent::update(
            run(Some(ExitType::Completed), &[]),
            run(None, &[]),
        );
        assert_eq!(
            transition(&event).unwrap_err(),
            LifecycleError::ExitReverted {
                run_id: 1,
                from: ExitType::Completed,
                to: None
            }
        );

        let switched = MutationEvent::update(
            run(Some(ExitType::Completed), &[]),
            run(Some(ExitType::Interrupted), &[]),
        );
        assert!(transition(&switched).is_err());
    }

    #[test]
    fn test_path_progress() {
        let event = MutationEvent::update(
            run(None, &[("n1", None)]),
            run(None, &[("n1", Some("e1")), ("n2", None)]),
        );
        assert_eq!(
            transition(&event).unwrap(),
            RunTransition::Progressed {
                path_changed: true,
                results_changed: false,
                facts_changed: true,
            }
        );

        let same = MutationEvent::update(run(None, &[("n1", None)]), run(None, &[("n1", None)]));
        assert_eq!(transition(&same).unwrap(), RunTransition::Unchanged);
    }
}
