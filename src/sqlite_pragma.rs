//! Shared SQLite connection tuning
//!
//! Every connection that touches the counter tables goes through
//! `apply_optimized_pragmas` so writers and the compactor agree on journal
//! mode and lock waiting behaviour.

use rusqlite::Connection;

/// Busy timeout applied to every connection (milliseconds)
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Apply WAL, NORMAL sync, in-memory temp store, busy timeout and
/// autocheckpoint to a connection.
///
/// In-memory databases report `memory` for `journal_mode`; that is accepted.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("📊 SQLite journal_mode={}", mode);

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;

    Ok(())
}
