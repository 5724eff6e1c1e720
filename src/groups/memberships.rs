//! The `group_memberships` relation
//!
//! Authoritative for static groups and derived for dynamic ones. These
//! functions only touch the relation; counting happens in the trigger hub.

use crate::ledger::LedgerError;
use rusqlite::{params, Connection};

pub fn is_member(conn: &Connection, group_id: i64, contact_id: i64) -> Result<bool, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM group_memberships WHERE group_id = ?1 AND contact_id = ?2)",
    )?;
    Ok(stmt.query_row(params![group_id, contact_id], |row| row.get(0))?)
}

/// Returns false if the contact was already a member
pub fn add_member(
    conn: &Connection,
    group_id: i64,
    contact_id: i64,
    now: i64,
) -> Result<bool, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO group_memberships (group_id, contact_id, created_at)
         VALUES (?1, ?2, ?3)",
    )?;
    Ok(stmt.execute(params![group_id, contact_id, now])? > 0)
}

/// Returns false if the contact was not a member
pub fn remove_member(conn: &Connection, group_id: i64, contact_id: i64) -> Result<bool, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "DELETE FROM group_memberships WHERE group_id = ?1 AND contact_id = ?2",
    )?;
    Ok(stmt.execute(params![group_id, contact_id])? > 0)
}

pub fn groups_of(conn: &Connection, contact_id: i64) -> Result<Vec<i64>, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "SELECT group_id FROM group_memberships WHERE contact_id = ?1 ORDER BY group_id",
    )?;
    let groups = stmt
        .query_map(params![contact_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(groups)
}

pub fn members_of(conn: &Connection, group_id: i64) -> Result<Vec<i64>, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "SELECT contact_id FROM group_memberships WHERE group_id = ?1 ORDER BY contact_id",
    )?;
    let members = stmt
        .query_map(params![group_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(members)
}

/// Cardinality of the relation, used to recount `GroupCount`
pub fn member_count(conn: &Connection, group_id: i64) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM group_memberships WHERE group_id = ?1",
        params![group_id],
        |row| row.get(0),
    )?)
}
