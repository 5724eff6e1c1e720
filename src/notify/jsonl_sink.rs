//! JSONL sink - appends one change event per line

use super::event::ChangeEvent;
use super::sink::{ChangeSink, NotifyError};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

pub struct JsonlChangeSink {
    writer: BufWriter<std::fs::File>,
    last_flush: Instant,
}

impl JsonlChangeSink {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("📝 Writing change events to: {}", path.display());

        Ok(Self {
            writer: BufWriter::new(file),
            last_flush: Instant::now(),
        })
    }

    pub fn write_event(&mut self, event: &ChangeEvent) -> Result<(), NotifyError> {
        let json = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", json)?;

        // Flush every 5 seconds
        if self.last_flush.elapsed() > Duration::from_secs(5) {
            self.flush_now()?;
        }

        Ok(())
    }

    pub fn flush_now(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }
}

impl Drop for JsonlChangeSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[async_trait]
impl ChangeSink for JsonlChangeSink {
    async fn deliver(&mut self, event: &ChangeEvent) -> Result<(), NotifyError> {
        self.write_event(event)
    }

    async fn flush(&mut self) -> Result<(), NotifyError> {
        self.flush_now()?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "JSONL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::event::{EntityType, Operation};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_one_line_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/changes.jsonl");

        {
            let mut sink = JsonlChangeSink::new(&path).unwrap();
            for id in 1..=2 {
                let event = ChangeEvent {
                    entity_type: EntityType::Broadcast,
                    entity_id: id,
                    operation: Operation::Insert,
                    changed_fields: vec!["text".to_string()],
                    occurred_at: Utc::now(),
                };
                sink.deliver(&event).await.unwrap();
            }
            sink.flush().await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<i64> = contents
            .lines()
            .map(|line| serde_json::from_str::<ChangeEvent>(line).unwrap().entity_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
