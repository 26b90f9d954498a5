pub mod events;
pub mod job;
pub mod store;

pub use events::{EventLog, QueueEvent};
pub use job::{Job, JobId, JobRequest, JobStatus, MediaFormat, MediaKind, Quality};
pub use store::{QueueStats, QueueStore};
