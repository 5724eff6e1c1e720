//! Runtime configuration from environment variables

use std::env;

/// What the read path does when a counter comes back negative.
///
/// A negative count has no legitimate decrement path behind it, so it always
/// indicates a lost or doubled delta somewhere upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeReadPolicy {
    /// Log an error for operators and return the raw value
    #[default]
    Report,
    /// Fail the read with `LedgerError::NegativeCount`
    Reject,
    /// Log an error and return zero
    Clamp,
}

impl NegativeReadPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "report" => Some(NegativeReadPolicy::Report),
            "reject" => Some(NegativeReadPolicy::Reject),
            "clamp" => Some(NegativeReadPolicy::Clamp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NegativeReadPolicy::Report => "report",
            NegativeReadPolicy::Reject => "reject",
            NegativeReadPolicy::Clamp => "clamp",
        }
    }
}

/// Configuration for the tally runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct TallyConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Squash sweep interval in milliseconds
    pub squash_interval_ms: u64,

    /// Maximum number of keys squashed per sweep
    pub squash_batch_size: usize,

    /// Change event channel buffer (events)
    pub notify_channel_buffer: usize,

    /// Where the JSONL change sink appends events
    pub notify_jsonl_path: String,

    /// Behaviour of the read path on negative counts
    pub negative_read_policy: NegativeReadPolicy,

    /// Master enable flag for the background compactor
    pub compactor_enabled: bool,
}

impl TallyConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `TALLY_DB_PATH` (default: tallyflow.db)
    /// - `SQUASH_INTERVAL_MS` (default: 5000)
    /// - `SQUASH_BATCH_SIZE` (default: 1000)
    /// - `NOTIFY_CHANNEL_BUFFER` (default: 10000)
    /// - `NOTIFY_JSONL_PATH` (default: streams/changes.jsonl)
    /// - `NEGATIVE_READ_POLICY` (report | reject | clamp, default: report)
    /// - `ENABLE_COMPACTOR` (default: true)
    pub fn from_env() -> Self {
        let negative_read_policy = match env::var("NEGATIVE_READ_POLICY") {
            Ok(raw) => NegativeReadPolicy::from_str(&raw).unwrap_or_else(|| {
                log::warn!(
                    "Invalid NEGATIVE_READ_POLICY '{}', defaulting to report",
                    raw
                );
                NegativeReadPolicy::Report
            }),
            Err(_) => NegativeReadPolicy::Report,
        };

        Self {
            db_path: env::var("TALLY_DB_PATH").unwrap_or_else(|_| "tallyflow.db".to_string()),

            squash_interval_ms: env::var("SQUASH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),

            squash_batch_size: env::var("SQUASH_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(1_000),

            notify_channel_buffer: env::var("NOTIFY_CHANNEL_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(10_000),

            notify_jsonl_path: env::var("NOTIFY_JSONL_PATH")
                .unwrap_or_else(|_| "streams/changes.jsonl".to_string()),

            negative_read_policy,

            compactor_enabled: env::var("ENABLE_COMPACTOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        }
    }
}
