//! Dynamic group registry
//!
//! Decides which dynamic groups a contact change has to be re-evaluated
//! against. Applying the resulting membership flips is the trigger hub's job.

use super::predicate::{Predicate, PredicateError};
use crate::triggers::rows::ContactRow;
use std::collections::BTreeMap;

/// Desired membership of one contact in one dynamic group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipCheck {
    pub group_id: i64,
    pub should_be_member: bool,
}

#[derive(Debug, Default)]
pub struct GroupSynchronizer {
    groups: BTreeMap<i64, Predicate>,
}

impl GroupSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register (or replace) a dynamic group's query
    pub fn register(&mut self, group_id: i64, query: &str) -> Result<(), PredicateError> {
        let predicate = Predicate::parse(query)?;
        log::info!(
            "👥 Dynamic group {} registered ({} fields)",
            group_id,
            predicate.fields().len()
        );
        self.groups.insert(group_id, predicate);
        Ok(())
    }

    pub fn unregister(&mut self, group_id: i64) -> bool {
        self.groups.remove(&group_id).is_some()
    }

    pub fn is_dynamic(&self, group_id: i64) -> bool {
        self.groups.contains_key(&group_id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups to re-evaluate after a contact insert (`old` = None) or update.
    ///
    /// Inactive contacts belong to no dynamic group. On update, a group is
    /// skipped unless its predicate references a changed attribute or the
    /// contact's active flag flipped.
    pub fn plan(&self, old: Option<&ContactRow>, new: &ContactRow) -> Vec<MembershipCheck> {
        let changed = old.map(|old| old.changed_attributes(new));
        let reevaluate_all = changed
            .as_ref()
            .map_or(true, |changed| changed.contains("is_active"));

        self.groups
            .iter()
            .filter(|(_, predicate)| {
                reevaluate_all
                    || changed
                        .as_ref()
                        .map_or(true, |changed| !predicate.fields().is_disjoint(changed))
            })
            .map(|(&group_id, predicate)| MembershipCheck {
                group_id,
                should_be_member: new.is_active && predicate.matches(new),
            })
            .collect()
    }
}
