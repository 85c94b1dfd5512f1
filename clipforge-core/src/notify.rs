//! Best-effort realtime status notifications.

use std::fmt;

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{RecordId, RecordStatus, StatusEvent};

const CHANNEL_CAPACITY: usize = 1024;

/// Fire-and-forget, at-most-once delivery. Implementations must not block
/// and must not fail the caller.
pub trait StatusNotifier: Send + Sync {
    fn broadcast(&self, record_id: RecordId, status: RecordStatus);
}

/// Fans events out to every subscriber; slow subscribers drop events.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StatusEvent>,
}

impl fmt::Debug for BroadcastNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastNotifier")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn broadcast(&self, record_id: RecordId, status: RecordStatus) {
        // Err only means nobody is listening right now.
        if self.sender.send(StatusEvent::new(record_id, status)).is_err() {
            debug!(%record_id, ?status, "no status listeners");
        }
    }
}
