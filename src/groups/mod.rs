//! Contact groups
//!
//! - `memberships` - the `group_memberships` relation
//! - `predicate` - dynamic group query language
//! - `sync` - registry of dynamic groups and re-evaluation planning

pub mod memberships;
pub mod predicate;
pub mod sync;

pub use predicate::{CompareOp, Predicate, PredicateError};
pub use sync::{GroupSynchronizer, MembershipCheck};
