//! Notification sink: a bounded ring of recent inference events, each one
//! also written to the log.

use std::collections::VecDeque;
use std::sync::Mutex;

use scout_core::sync::lock_unpoisoned;
use scout_core::{CellId, EventSink, SpawnEvent, SpawnEventKind};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StoredEvent {
    pub(crate) id: Uuid,
    pub(crate) emitted_at: i64,
    pub(crate) kind: SpawnEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) spawnpoint_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) cell_id: Option<CellId>,
    pub(crate) detail: serde_json::Value,
}

impl From<SpawnEvent> for StoredEvent {
    fn from(event: SpawnEvent) -> Self {
        let spawnpoint_id = event.spawnpoint.as_ref().map(|sp| sp.id.clone());
        let detail = match &event.spawnpoint {
            Some(sp) => serde_json::json!({
                "kind": sp.kind,
                "links": sp.links,
                "latest_seen": sp.latest_seen,
                "earliest_unseen": sp.earliest_unseen,
                "missed_count": sp.missed_count,
                "tth_found": sp.tth_found(),
            }),
            None => serde_json::Value::Null,
        };
        Self {
            id: Uuid::new_v4(),
            emitted_at: event.at,
            kind: event.kind,
            spawnpoint_id,
            cell_id: Some(event.cell_id),
            detail,
        }
    }
}

pub(crate) struct EventLog {
    buffer: Mutex<VecDeque<StoredEvent>>,
    capacity: usize,
}

impl EventLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, event: StoredEvent) {
        let mut buffer = lock_unpoisoned(&self.buffer);
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    /// Up to `limit` most recent events, oldest first.
    pub(crate) fn recent(&self, limit: usize) -> Vec<StoredEvent> {
        let buffer = lock_unpoisoned(&self.buffer);
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.buffer).len()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: SpawnEvent) {
        let stored = StoredEvent::from(event);
        match stored.kind {
            SpawnEventKind::Inactive | SpawnEventKind::CellReset => tracing::warn!(
                kind = stored.kind.as_str(),
                spawnpoint = stored.spawnpoint_id.as_deref().unwrap_or("-"),
                cell_id = stored.cell_id,
                "inference event"
            ),
            _ => tracing::info!(
                kind = stored.kind.as_str(),
                spawnpoint = stored.spawnpoint_id.as_deref().unwrap_or("-"),
                cell_id = stored.cell_id,
                "inference event"
            ),
        }
        self.push(stored);
    }
}
