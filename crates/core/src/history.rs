// Call history: a capped, append-only record of dispatched calls

use crate::resolver::CallKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CallHistoryEntry {
    pub fn new(
        kind: CallKind,
        name: impl Into<String>,
        input: serde_json::Value,
        outcome: Result<serde_json::Value, String>,
        duration: Duration,
    ) -> Self {
        let (output, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(message) => (None, Some(message)),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.as_str().to_string(),
            name: name.into(),
            input,
            output,
            error,
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Ring buffer of recent calls; the oldest entry is evicted once full.
pub struct CallHistory {
    capacity: usize,
    entries: Mutex<VecDeque<CallHistoryEntry>>,
}

impl CallHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, entry: CallHistoryEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::trace!(id = %evicted.id, name = %evicted.name, "History entry evicted");
            }
        }
        entries.push_back(entry);
    }

    /// Snapshot, oldest first.
    pub fn entries(&self) -> Vec<CallHistoryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for CallHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
