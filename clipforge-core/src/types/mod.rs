pub mod events;
pub mod ids;
pub mod record;

pub use events::{RecordStatus, StatusEvent};
pub use ids::{AssetId, CollectionId, PlaybackId, RecordId, UploadHandle};
pub use record::{IngestRecord, LifecycleState, RecordingTime, TimestampSource};
