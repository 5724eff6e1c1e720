//! Schema loader for the counter tables
//!
//! The `.sql` files under `/sql/` are embedded at build time and applied in
//! filename order. All of them use `IF NOT EXISTS`, so applying twice is a
//! no-op.

use super::error::LedgerError;
use rusqlite::Connection;

const MIGRATIONS: [(&str, &str); 3] = [
    (
        "01_counter_deltas.sql",
        include_str!("../../sql/01_counter_deltas.sql"),
    ),
    (
        "02_counter_totals.sql",
        include_str!("../../sql/02_counter_totals.sql"),
    ),
    (
        "03_group_memberships.sql",
        include_str!("../../sql/03_group_memberships.sql"),
    ),
];

/// Create the ledger and membership tables if they do not exist
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    log::debug!("🔧 Applying {} schema files", MIGRATIONS.len());

    for (filename, sql) in MIGRATIONS {
        conn.execute_batch(sql)?;
        log::debug!("   └─ ✅ {}", filename);
    }

    Ok(())
}
