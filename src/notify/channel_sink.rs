//! In-process sink forwarding events to a bounded channel

use super::event::ChangeEvent;
use super::sink::{ChangeSink, NotifyError};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub struct ChannelSink {
    tx: mpsc::Sender<ChangeEvent>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ChangeSink for ChannelSink {
    /// Never waits on a slow consumer: a full channel drops the event
    async fn deliver(&mut self, event: &ChangeEvent) -> Result<(), NotifyError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::Full,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }

    async fn flush(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "Channel"
    }
}
