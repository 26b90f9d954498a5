use super::messages::SchedulerCommand;
use crate::queue::{Job, JobId, JobRequest, QueueEvent, QueueStats};
use crate::utils::error::{Result, YtdlError};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Cloneable front door to a running scheduler.
///
/// Reads return snapshots; the scheduler's own state is never shared.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    events: broadcast::Sender<QueueEvent>,
}

impl SchedulerHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SchedulerCommand>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self { commands, events }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| YtdlError::SchedulerUnavailable)?;
        rx.await.map_err(|_| YtdlError::SchedulerUnavailable)
    }

    /// Validate and queue one request
    pub async fn enqueue(&self, request: JobRequest) -> Result<JobId> {
        self.request(|reply| SchedulerCommand::Enqueue { request, reply })
            .await?
    }

    /// Queue several requests in order; each is validated on its own
    pub async fn enqueue_many(&self, requests: Vec<JobRequest>) -> Result<Vec<Result<JobId>>> {
        self.request(|reply| SchedulerCommand::EnqueueMany { requests, reply })
            .await
    }

    pub async fn get(&self, id: JobId) -> Result<Job> {
        self.request(|reply| SchedulerCommand::Get { id, reply })
            .await?
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        self.request(|reply| SchedulerCommand::List { reply }).await
    }

    /// Queued jobs are cancelled at once. Running jobs become Cancelled after
    /// their extractor confirms teardown. Finished jobs are left alone.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        self.request(|reply| SchedulerCommand::Cancel { id, reply })
            .await?
    }

    /// Cancel every queued and running job, returning how many were targeted
    pub async fn cancel_all(&self) -> Result<usize> {
        self.request(|reply| SchedulerCommand::CancelAll { reply })
            .await
    }

    /// Remove finished jobs, returning their ids
    pub async fn clear_completed(&self) -> Result<Vec<JobId>> {
        self.request(|reply| SchedulerCommand::ClearCompleted { reply })
            .await
    }

    pub async fn set_concurrency_limit(&self, limit: usize) -> Result<()> {
        self.request(|reply| SchedulerCommand::SetConcurrencyLimit { limit, reply })
            .await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::Resume { reply }).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.request(|reply| SchedulerCommand::Stats { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Resolve once nothing is queued or running. Never resolves while
    /// dispatch is paused with jobs still queued.
    pub async fn wait_until_idle(&self) -> Result<QueueStats> {
        let mut events = self.subscribe();
        loop {
            let stats = self.stats().await?;
            if stats.is_idle() {
                return Ok(stats);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(YtdlError::SchedulerUnavailable)
                }
            }
        }
    }

    /// Cancel everything, wait for extractors to acknowledge, then stop the
    /// scheduler. Later calls on any handle fail with `SchedulerUnavailable`.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SchedulerCommand::Shutdown { reply })
            .await
    }
}
