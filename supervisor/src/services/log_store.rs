//! Bounded in-memory store for log entries streamed in by services
//!
//! Every ingested entry is also forwarded to the supervisor's own tracing
//! output, tagged with the originating service.

use async_trait::async_trait;
use shared::{process_debug, process_error, process_info, process_warn, LogEntry, LogLevel, ProcessId, ServiceId};
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::traits::LogSink;

/// An ingested entry with the service name resolved at ingest time
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub service_name: Option<String>,
    pub entry: LogEntry,
}

pub struct LogStore {
    capacity: usize,
    entries: Mutex<VecDeque<StoredLog>>,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Up to `limit` most recent entries, oldest first; `None` means every service
    pub async fn recent(&self, service_id: Option<&ServiceId>, limit: usize) -> Vec<StoredLog> {
        let entries = self.entries.lock().await;
        let mut matched: Vec<StoredLog> = entries
            .iter()
            .rev()
            .filter(|stored| service_id.map_or(true, |id| &stored.entry.service_id == id))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    fn forward(service_name: Option<&str>, entry: &LogEntry) {
        let source = service_name.unwrap_or(entry.service_id.as_str());
        match entry.level {
            LogLevel::Error => {
                process_error!(ProcessId::current(), "[{}] {}", source, entry.message);
            }
            LogLevel::Warn => {
                process_warn!(ProcessId::current(), "[{}] {}", source, entry.message);
            }
            LogLevel::Info => {
                process_info!(ProcessId::current(), "[{}] {}", source, entry.message);
            }
            LogLevel::Debug | LogLevel::Trace => {
                process_debug!(ProcessId::current(), "[{}] {}", source, entry.message);
            }
        }
    }
}

#[async_trait]
impl LogSink for LogStore {
    async fn ingest(&self, service_name: Option<String>, entry: LogEntry) {
        Self::forward(service_name.as_deref(), &entry);

        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().await;
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(StoredLog { service_name, entry });
    }
}
