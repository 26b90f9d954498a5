//! One spawned task per running job: attempts, retries and cancellation

use crate::extractor::{
    ExtractionError, ExtractionErrorKind, ExtractionEvent, ExtractionHandle, Extractor, Stage,
};
use crate::queue::{JobId, JobRequest};
use crate::scheduler::messages::{JobOutcome, WorkerMessage};
use crate::scheduler::policy::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct Worker {
    pub id: JobId,
    pub request: JobRequest,
    pub extractor: Arc<dyn Extractor>,
    pub policy: RetryPolicy,
    pub cancel: CancellationToken,
    pub reports: mpsc::Sender<WorkerMessage>,
}

enum Attempt {
    Done(JobOutcome),
    Failed(ExtractionError),
}

impl Worker {
    pub async fn run(self) {
        let outcome = self.run_attempts().await;
        match &outcome {
            JobOutcome::Completed(path) => info!("Job {} completed: {}", self.id, path.display()),
            JobOutcome::Failed(e) => warn!("Job {} failed: {}", self.id, e),
            JobOutcome::Cancelled => info!("Job {} cancelled", self.id),
        }
        let _ = self
            .reports
            .send(WorkerMessage::Finished {
                id: self.id,
                outcome,
            })
            .await;
    }

    async fn run_attempts(&self) -> JobOutcome {
        let mut attempt: u32 = 1;
        loop {
            let error = match self.attempt().await {
                Attempt::Done(outcome) => return outcome,
                Attempt::Failed(error) => error,
            };

            if !error.is_transient() || attempt >= self.policy.max_attempts() {
                return JobOutcome::Failed(error);
            }

            attempt += 1;
            warn!(
                "Job {} attempt {} failed ({}), retrying in {:?}",
                self.id,
                attempt - 1,
                error,
                self.policy.backoff
            );
            let _ = self
                .reports
                .send(WorkerMessage::Retrying {
                    id: self.id,
                    attempt,
                    error,
                })
                .await;

            tokio::select! {
                _ = self.cancel.cancelled() => return JobOutcome::Cancelled,
                _ = tokio::time::sleep(self.policy.backoff) => {}
            }
        }
    }

    async fn attempt(&self) -> Attempt {
        if self.cancel.is_cancelled() {
            return Attempt::Done(JobOutcome::Cancelled);
        }

        let mut handle = tokio::select! {
            _ = self.cancel.cancelled() => return Attempt::Done(JobOutcome::Cancelled),
            started = self.extractor.start(&self.request) => match started {
                Ok(handle) => handle,
                Err(e) => return Attempt::Failed(e),
            }
        };
        debug!("Job {} started on {}", self.id, self.extractor.id());

        let mut stage = Stage::Downloading;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    handle.cancel().await;
                    return Attempt::Done(JobOutcome::Cancelled);
                }
                next = next_event(&mut handle, stage, self.policy.stall_timeout) => next,
            };

            match next {
                Err(_) => {
                    handle.cancel().await;
                    return Attempt::Failed(ExtractionError::new(
                        ExtractionErrorKind::Stalled,
                        format!("no output for {:?}", self.policy.stall_timeout),
                    ));
                }
                Ok(None) => {
                    return Attempt::Failed(ExtractionError::new(
                        ExtractionErrorKind::Interrupted,
                        "extractor stopped without reporting an outcome",
                    ));
                }
                Ok(Some(ExtractionEvent::Activity(now))) => {
                    if now != stage {
                        debug!("Job {} now {:?}", self.id, now);
                    }
                    stage = now;
                }
                Ok(Some(ExtractionEvent::Progress(event))) => {
                    stage = Stage::Downloading;
                    let _ = self
                        .reports
                        .send(WorkerMessage::Progress { id: self.id, event })
                        .await;
                }
                Ok(Some(ExtractionEvent::Finished(Ok(path)))) => {
                    return Attempt::Done(JobOutcome::Completed(path));
                }
                Ok(Some(ExtractionEvent::Finished(Err(e)))) => return Attempt::Failed(e),
            }
        }
    }
}

/// Wait for the next event. Silence only counts as a stall while
/// downloading; post-processing runs as long as the tool needs.
async fn next_event(
    handle: &mut ExtractionHandle,
    stage: Stage,
    stall_timeout: Duration,
) -> Result<Option<ExtractionEvent>, Elapsed> {
    match stage {
        Stage::Downloading => tokio::time::timeout(stall_timeout, handle.next_event()).await,
        Stage::PostProcessing => Ok(handle.next_event().await),
    }
}
