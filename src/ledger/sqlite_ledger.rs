//! SQLite-backed counter ledger
//!
//! Tables (see `/sql/`):
//! - `counter_deltas` - INSERT only from interceptors, DELETE only from squash
//! - `counter_totals` - UPSERT with add semantics from squash
//!
//! The free functions take a plain `&Connection` so interceptors can append
//! inside the caller's open transaction (a `Transaction` derefs to
//! `Connection`). Squash and reconcile need `&mut Connection` because they
//! open their own `BEGIN IMMEDIATE` transaction, which is what serializes two
//! compactions of the same key across processes.

use super::delta::{Delta, PendingKey, SquashOutcome};
use super::error::LedgerError;
use super::schema::init_schema;
use super::scope::{CounterKey, CounterScope};
use super::CounterLedger;
use crate::config::NegativeReadPolicy;
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Append one delta row. Never reads or touches `counter_totals`.
pub fn append_delta(conn: &Connection, delta: &Delta, now: i64) -> Result<(), LedgerError> {
    let encoded = delta.key.encode()?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO counter_deltas (scope, counter_key, owner_id, value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    stmt.execute(params![
        delta.scope().as_str(),
        encoded,
        delta.key.owner_id(),
        delta.value,
        now,
    ])?;
    Ok(())
}

/// `total + Σ pending` for one encoded key, in a single statement so both
/// halves come from the same snapshot.
pub fn read_encoded(
    conn: &Connection,
    scope: CounterScope,
    encoded: &str,
) -> Result<i64, LedgerError> {
    let value = conn.query_row(
        "SELECT COALESCE((SELECT total FROM counter_totals
                          WHERE scope = ?1 AND counter_key = ?2), 0)
              + COALESCE((SELECT SUM(value) FROM counter_deltas
                          WHERE scope = ?1 AND counter_key = ?2), 0)",
        params![scope.as_str(), encoded],
        |row| row.get(0),
    )?;
    Ok(value)
}

/// Fold every pending delta of one key into its consolidated total.
///
/// Only rows with `id <= MAX(id)` observed at the start are deleted, so a
/// delta appended by another connection after the sum was taken survives
/// for the next pass. Any failure drops the transaction and leaves both
/// tables untouched.
pub fn squash_encoded(
    conn: &mut Connection,
    scope: CounterScope,
    encoded: &str,
    now: i64,
) -> Result<SquashOutcome, LedgerError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (sum, max_id, owner_id): (i64, Option<i64>, Option<i64>) = tx.query_row(
        "SELECT COALESCE(SUM(value), 0), MAX(id), MAX(owner_id)
         FROM counter_deltas WHERE scope = ?1 AND counter_key = ?2",
        params![scope.as_str(), encoded],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let outcome = match (max_id, owner_id) {
        (Some(max_id), Some(owner_id)) => {
            tx.execute(
                "INSERT INTO counter_totals (scope, counter_key, owner_id, total, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(scope, counter_key) DO UPDATE SET
                    total = counter_totals.total + excluded.total,
                    updated_at = excluded.updated_at",
                params![scope.as_str(), encoded, owner_id, sum, now],
            )?;

            let consumed = tx.execute(
                "DELETE FROM counter_deltas
                 WHERE scope = ?1 AND counter_key = ?2 AND id <= ?3",
                params![scope.as_str(), encoded, max_id],
            )?;

            let total: i64 = tx.query_row(
                "SELECT total FROM counter_totals WHERE scope = ?1 AND counter_key = ?2",
                params![scope.as_str(), encoded],
                |row| row.get(0),
            )?;

            SquashOutcome {
                consumed,
                folded: sum,
                total,
            }
        }
        _ => {
            // Nothing pending: repeated squashes are no-ops
            let total: Option<i64> = tx
                .query_row(
                    "SELECT total FROM counter_totals WHERE scope = ?1 AND counter_key = ?2",
                    params![scope.as_str(), encoded],
                    |row| row.get(0),
                )
                .optional()?;

            SquashOutcome {
                consumed: 0,
                folded: 0,
                total: total.unwrap_or(0),
            }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

/// Replace a key's total and pending deltas with an out-of-band recount
pub fn reconcile_key(
    conn: &mut Connection,
    key: &CounterKey,
    count: i64,
    now: i64,
) -> Result<(), LedgerError> {
    let encoded = key.encode()?;
    let scope = key.scope();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let dropped = tx.execute(
        "DELETE FROM counter_deltas WHERE scope = ?1 AND counter_key = ?2",
        params![scope.as_str(), encoded],
    )?;
    tx.execute(
        "INSERT INTO counter_totals (scope, counter_key, owner_id, total, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(scope, counter_key) DO UPDATE SET
            total = excluded.total,
            updated_at = excluded.updated_at",
        params![scope.as_str(), encoded, key.owner_id(), count, now],
    )?;

    tx.commit()?;
    log::info!(
        "🔁 Reconciled {} {} to {} ({} pending deltas discarded)",
        scope.as_str(),
        encoded,
        count,
        dropped
    );
    Ok(())
}

/// Keys with pending deltas, oldest first
pub fn list_pending(conn: &Connection, limit: usize) -> Result<Vec<PendingKey>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT scope, counter_key, COUNT(*) FROM counter_deltas
         GROUP BY scope, counter_key
         ORDER BY MIN(id)
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(scope, encoded_key, pending)| {
            let scope = CounterScope::from_str(&scope).ok_or(LedgerError::UnknownScope(scope))?;
            Ok(PendingKey {
                scope,
                encoded_key,
                pending: pending as usize,
            })
        })
        .collect()
}

/// Current value of every key of `scope` owned by `owner_id`
pub fn read_owner_values(
    conn: &Connection,
    scope: CounterScope,
    owner_id: i64,
) -> Result<Vec<(CounterKey, i64)>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT counter_key, SUM(v) FROM (
            SELECT counter_key, total AS v FROM counter_totals
            WHERE scope = ?1 AND owner_id = ?2
            UNION ALL
            SELECT counter_key, value AS v FROM counter_deltas
            WHERE scope = ?1 AND owner_id = ?2
         )
         GROUP BY counter_key
         ORDER BY counter_key",
    )?;

    let rows = stmt
        .query_map(params![scope.as_str(), owner_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(encoded, value)| Ok((CounterKey::decode(&encoded)?, value)))
        .collect()
}

/// SQLite implementation of `CounterLedger`
///
/// One connection behind a mutex, shared by the trigger hub, the read path
/// and the compactor within a process.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    read_policy: NegativeReadPolicy,
}

impl SqliteLedger {
    /// Open (or create) a database file and apply the schema
    pub fn open(
        db_path: impl AsRef<Path>,
        read_policy: NegativeReadPolicy,
    ) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, read_policy)
    }

    pub fn open_in_memory(read_policy: NegativeReadPolicy) -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?, read_policy)
    }

    pub fn from_connection(
        conn: Connection,
        read_policy: NegativeReadPolicy,
    ) -> Result<Self, LedgerError> {
        apply_optimized_pragmas(&conn)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            read_policy,
        })
    }

    pub fn read_policy(&self) -> NegativeReadPolicy {
        self.read_policy
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Run a closure against the underlying connection
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Total number of unsquashed delta rows
    pub fn pending_delta_count(&self) -> Result<i64, LedgerError> {
        self.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM counter_deltas", [], |row| row.get(0))?)
        })
    }

    fn checked(&self, scope: CounterScope, key: &str, value: i64) -> Result<i64, LedgerError> {
        if value >= 0 {
            return Ok(value);
        }

        match self.read_policy {
            NegativeReadPolicy::Report => {
                log::error!(
                    "❌ Integrity: negative count {} for {} {}",
                    value,
                    scope.as_str(),
                    key
                );
                Ok(value)
            }
            NegativeReadPolicy::Clamp => {
                log::error!(
                    "❌ Integrity: negative count {} for {} {} (clamped to 0)",
                    value,
                    scope.as_str(),
                    key
                );
                Ok(0)
            }
            NegativeReadPolicy::Reject => Err(LedgerError::NegativeCount {
                scope,
                key: key.to_string(),
                value,
            }),
        }
    }
}

impl CounterLedger for SqliteLedger {
    fn append(&self, delta: &Delta) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        append_delta(&conn, delta, chrono::Utc::now().timestamp())
    }

    fn squash(&self, key: &CounterKey) -> Result<SquashOutcome, LedgerError> {
        let encoded = key.encode()?;
        let mut conn = self.lock()?;
        squash_encoded(&mut conn, key.scope(), &encoded, chrono::Utc::now().timestamp())
    }

    fn read(&self, key: &CounterKey) -> Result<i64, LedgerError> {
        let encoded = key.encode()?;
        let value = {
            let conn = self.lock()?;
            read_encoded(&conn, key.scope(), &encoded)?
        };
        self.checked(key.scope(), &encoded, value)
    }

    fn pending_keys(&self, limit: usize) -> Result<Vec<PendingKey>, LedgerError> {
        let conn = self.lock()?;
        list_pending(&conn, limit)
    }

    fn squash_pending(&self, pending: &PendingKey) -> Result<SquashOutcome, LedgerError> {
        let mut conn = self.lock()?;
        squash_encoded(
            &mut conn,
            pending.scope,
            &pending.encoded_key,
            chrono::Utc::now().timestamp(),
        )
    }

    fn read_owner(
        &self,
        scope: CounterScope,
        owner_id: i64,
    ) -> Result<Vec<(CounterKey, i64)>, LedgerError> {
        let values = {
            let conn = self.lock()?;
            read_owner_values(&conn, scope, owner_id)?
        };

        values
            .into_iter()
            .map(|(key, value)| {
                let encoded = key.encode()?;
                let value = self.checked(scope, &encoded, value)?;
                Ok((key, value))
            })
            .collect()
    }

    fn reconcile(&self, key: &CounterKey, count: i64) -> Result<(), LedgerError> {
        let mut conn = self.lock()?;
        reconcile_key(&mut conn, key, count, chrono::Utc::now().timestamp())
    }
}
