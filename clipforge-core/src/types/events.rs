use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RecordId;

/// Status pushed to realtime listeners when a record becomes playable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Resolved by the resolver that followed the original upload.
    Ready,
    /// Resolved later by a healing task.
    Healed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub record_id: RecordId,
    pub status: RecordStatus,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(record_id: RecordId, status: RecordStatus) -> Self {
        Self {
            record_id,
            status,
            at: Utc::now(),
        }
    }
}
