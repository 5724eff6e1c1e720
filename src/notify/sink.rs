//! Sink trait for change events
//!
//! The concrete external wire protocol lives behind this trait.

use super::event::ChangeEvent;
use async_trait::async_trait;

#[derive(Debug)]
pub enum NotifyError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// Bounded queue at capacity; the event was dropped
    Full,
    /// Receiving side has gone away
    Closed,
}

impl From<std::io::Error> for NotifyError {
    fn from(err: std::io::Error) -> Self {
        NotifyError::Io(err)
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(err: serde_json::Error) -> Self {
        NotifyError::Serialization(err)
    }
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Io(e) => write!(f, "IO error: {}", e),
            NotifyError::Serialization(e) => write!(f, "Serialization error: {}", e),
            NotifyError::Full => write!(f, "Change queue full"),
            NotifyError::Closed => write!(f, "Change queue closed"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Destination for committed change events
#[async_trait]
pub trait ChangeSink: Send {
    /// Deliver a single event
    async fn deliver(&mut self, event: &ChangeEvent) -> Result<(), NotifyError>;

    /// Flush anything buffered
    async fn flush(&mut self) -> Result<(), NotifyError>;

    /// Sink type for logging
    fn sink_type(&self) -> &'static str;
}
