//! Tally Runtime
//!
//! - Opens the SQLite ledger and applies the schema
//! - Spawns the squash compactor and the change dispatcher
//! - Applies JSONL mutation records read from stdin, one transaction each
//! - On EOF or CTRL+C, stops the compactor and runs a final sweep
//!
//! Usage:
//!   tally_runtime < mutations.jsonl
//!
//! Environment variables:
//!   TALLY_DB_PATH - SQLite database path (default: tallyflow.db)
//!   SQUASH_INTERVAL_MS - Compactor interval (default: 5000)
//!   SQUASH_BATCH_SIZE - Keys per sweep (default: 1000)
//!   NOTIFY_CHANNEL_BUFFER - Change event queue size (default: 10000)
//!   NOTIFY_JSONL_PATH - Change event output (default: streams/changes.jsonl)
//!   NEGATIVE_READ_POLICY - report | reject | clamp (default: report)
//!   ENABLE_COMPACTOR - Background compactor switch (default: true)
//!   TALLY_DYNAMIC_GROUPS - Optional `id:query;id:query` dynamic group list

use dotenv::dotenv;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;
use tallyflow::compactor::{drain, squash_scheduler_task};
use tallyflow::config::TallyConfig;
use tallyflow::ingest::{ingest_line, IngestReport};
use tallyflow::ledger::{CounterLedger, SqliteLedger};
use tallyflow::notify::{run_dispatcher, ChangeNotifier, JsonlChangeSink};
use tallyflow::triggers::TriggerHub;
use tokio::io::{AsyncBufReadExt, BufReader};

fn register_dynamic_groups(hub: &TriggerHub, list: &str) {
    for entry in list.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry
            .split_once(':')
            .and_then(|(id, query)| id.trim().parse::<i64>().ok().map(|id| (id, query)));

        match parsed {
            Some((group_id, query)) => {
                if let Err(e) = hub.register_dynamic_group(group_id, query) {
                    error!("❌ Dynamic group {} not registered: {}", group_id, e);
                }
            }
            None => warn!("⚠️  Ignoring malformed dynamic group entry '{}'", entry),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Tally Runtime");

    let config = TallyConfig::from_env();
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Squash interval: {}ms", config.squash_interval_ms);
    info!("   ├─ Squash batch: {} keys", config.squash_batch_size);
    info!("   ├─ Change buffer: {} events", config.notify_channel_buffer);
    info!("   ├─ Change output: {}", config.notify_jsonl_path);
    info!("   └─ Negative reads: {}", config.negative_read_policy.as_str());

    // Initialize database
    info!("🔧 Initializing database...");
    let ledger = Arc::new(SqliteLedger::open(
        &config.db_path,
        config.negative_read_policy,
    )?);
    info!(
        "✅ Database initialized ({} pending deltas)",
        ledger.pending_delta_count()?
    );

    // Change notification
    let (notifier, change_rx) = ChangeNotifier::channel(config.notify_channel_buffer);
    let sink = JsonlChangeSink::new(&config.notify_jsonl_path)?;
    let dispatcher = tokio::spawn(run_dispatcher(change_rx, Box::new(sink), 5_000));

    let hub = TriggerHub::new(ledger.clone()).with_notifier(notifier);
    if let Ok(groups) = env::var("TALLY_DYNAMIC_GROUPS") {
        register_dynamic_groups(&hub, &groups);
    }

    // Compactor
    let compactor = if config.compactor_enabled {
        let compactor_ledger: Arc<dyn CounterLedger> = ledger.clone();
        Some(tokio::spawn(squash_scheduler_task(
            compactor_ledger,
            config.squash_interval_ms,
            config.squash_batch_size,
        )))
    } else {
        info!("⚠️  Compactor is DISABLED (set ENABLE_COMPACTOR=true to activate)");
        None
    };

    info!("🔄 Reading mutation records from stdin (CTRL+C to stop)");

    let mut report = IngestReport::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => ingest_line(&hub, &line, &mut report),
                Ok(None) => {
                    info!("📭 End of input");
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read stdin: {}", e);
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                    Err(e) => error!("❌ Failed to listen for CTRL+C: {}", e),
                }
                break;
            }
        }
    }

    if let Some(handle) = compactor {
        handle.abort();
    }

    match drain(&*ledger, config.squash_batch_size) {
        Ok(sweep) => info!(
            "🗜️  Final sweep: {} keys squashed ({} deltas, {} failures)",
            sweep.keys_squashed, sweep.deltas_consumed, sweep.failures
        ),
        Err(e) => error!("❌ Final sweep failed: {}", e),
    }

    let stats = hub.stats();
    info!(
        "📊 Records: {} applied, {} rejected, {} failed, {} deltas",
        report.applied, report.rejected, report.failed, report.deltas
    );
    info!("📊 Triggers: {}", serde_json::to_string(&stats)?);

    // Dropping the hub closes the change queue so the dispatcher can finish
    drop(hub);
    if let Err(e) = dispatcher.await {
        error!("❌ Change dispatcher task failed: {}", e);
    }

    info!("✅ Tally runtime stopped");
    Ok(())
}
