use super::scope::CounterScope;
use crate::groups::PredicateError;

#[derive(Debug)]
pub enum LedgerError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
    /// Counter read back below zero under `NegativeReadPolicy::Reject`
    NegativeCount {
        scope: CounterScope,
        key: String,
        value: i64,
    },
    UnknownScope(String),
    /// Dynamic group query failed to parse
    Predicate(PredicateError),
    LockPoisoned,
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Database(err)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err)
    }
}

impl From<PredicateError> for LedgerError {
    fn from(err: PredicateError) -> Self {
        LedgerError::Predicate(err)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err)
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Database(e) => write!(f, "Database error: {}", e),
            LedgerError::Serialization(e) => write!(f, "Serialization error: {}", e),
            LedgerError::Io(e) => write!(f, "IO error: {}", e),
            LedgerError::NegativeCount { scope, key, value } => write!(
                f,
                "Negative count {} for {} {}",
                value,
                scope.as_str(),
                key
            ),
            LedgerError::UnknownScope(s) => write!(f, "Unknown counter scope: {}", s),
            LedgerError::Predicate(e) => write!(f, "Group query error: {}", e),
            LedgerError::LockPoisoned => write!(f, "Ledger connection lock poisoned"),
        }
    }
}

impl std::error::Error for LedgerError {}
