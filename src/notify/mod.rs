//! Change notification
//!
//! ```text
//! TriggerHub ──(commit)──▶ ChangeNotifier::publish ──try_send──▶ mpsc queue
//!                                                                  │
//!                                                    run_dispatcher (one task)
//!                                                                  ▼
//!                                                     ChangeSink (JSONL / channel)
//! ```

pub mod channel_sink;
pub mod event;
pub mod jsonl_sink;
pub mod notifier;
pub mod sink;

pub use channel_sink::ChannelSink;
pub use event::ChangeEvent;
pub use jsonl_sink::JsonlChangeSink;
pub use notifier::{run_dispatcher, ChangeNotifier, DispatchStats};
pub use sink::{ChangeSink, NotifyError};
