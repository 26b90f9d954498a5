use crate::extractor::{ExtractionError, ProgressEvent};
use crate::queue::{Job, JobId, JobRequest, QueueStats};
use crate::utils::error::Result;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Commands sent from a [`SchedulerHandle`](super::SchedulerHandle) to the actor
#[derive(Debug)]
pub(crate) enum SchedulerCommand {
    Enqueue {
        request: JobRequest,
        reply: oneshot::Sender<Result<JobId>>,
    },
    EnqueueMany {
        requests: Vec<JobRequest>,
        reply: oneshot::Sender<Vec<Result<JobId>>>,
    },
    Get {
        id: JobId,
        reply: oneshot::Sender<Result<Job>>,
    },
    List {
        reply: oneshot::Sender<Vec<Job>>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    ClearCompleted {
        reply: oneshot::Sender<Vec<JobId>>,
    },
    SetConcurrencyLimit {
        limit: usize,
        reply: oneshot::Sender<Result<()>>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    // System
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Reports from worker tasks back to the actor
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Progress {
        id: JobId,
        event: ProgressEvent,
    },
    Retrying {
        id: JobId,
        attempt: u32,
        error: ExtractionError,
    },
    Finished {
        id: JobId,
        outcome: JobOutcome,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JobOutcome {
    Completed(PathBuf),
    Failed(ExtractionError),
    /// The extractor acknowledged the cancellation
    Cancelled,
}
