//! The scheduler actor: sole owner of the queue store
//!
//! Every state change happens on this task, in response to either a command
//! from a [`SchedulerHandle`](super::SchedulerHandle) or a report from a worker.
//! Store invariants are checked after each of them.

use super::messages::{JobOutcome, SchedulerCommand, WorkerMessage};
use super::policy::{ConcurrencyLimit, RetryPolicy};
use super::worker::Worker;
use super::SchedulerConfig;
use crate::converter::{ConversionPool, ConversionProfile};
use crate::extractor::{ExtractionError, Extractor, ProgressEvent};
use crate::queue::{Job, JobId, JobRequest, JobStatus, QueueEvent, QueueStore};
use crate::utils::error::{Result, YtdlError};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const WORKER_CHANNEL_CAPACITY: usize = 256;

pub(crate) struct SchedulerActor {
    commands: mpsc::Receiver<SchedulerCommand>,
    reports: mpsc::Receiver<WorkerMessage>,
    report_tx: mpsc::Sender<WorkerMessage>,
    events: broadcast::Sender<QueueEvent>,

    store: QueueStore,
    limit: ConcurrencyLimit,
    /// Upper bound for the running count; above `limit` only while jobs
    /// started before a limit decrease are still running
    ceiling: usize,
    paused: bool,
    retry: RetryPolicy,

    extractor: Arc<dyn Extractor>,
    conversions: Option<Arc<ConversionPool>>,
    auto_convert: Option<ConversionProfile>,

    workers: HashMap<JobId, CancellationToken>,
    closing: bool,
    shutdown_replies: Vec<oneshot::Sender<()>>,
}

impl SchedulerActor {
    pub(crate) fn new(
        config: SchedulerConfig,
        extractor: Arc<dyn Extractor>,
        conversions: Option<Arc<ConversionPool>>,
        commands: mpsc::Receiver<SchedulerCommand>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        let (report_tx, reports) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        Self {
            commands,
            reports,
            report_tx,
            events,
            store: QueueStore::new(),
            limit: config.limit,
            ceiling: config.limit.get(),
            paused: false,
            retry: config.retry,
            extractor,
            conversions,
            auto_convert: config.auto_convert,
            workers: HashMap::new(),
            closing: false,
            shutdown_replies: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        info!(
            "Scheduler started (limit {}, {} retries, extractor {})",
            self.limit,
            self.retry.max_retries,
            self.extractor.id()
        );

        let result = self.event_loop().await;

        if let Err(e) = &result {
            error!("Scheduler stopped: {}", e);
            for token in self.workers.values() {
                token.cancel();
            }
        }
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        info!("Scheduler stopped");
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            if self.closing && self.workers.is_empty() {
                return Ok(());
            }

            tokio::select! {
                cmd = self.commands.recv(), if !self.closing => match cmd {
                    Some(cmd) => self.handle_command(cmd).await?,
                    None => {
                        debug!("All scheduler handles dropped");
                        self.begin_shutdown();
                    }
                },
                Some(report) = self.reports.recv() => self.handle_report(report).await?,
            }

            self.store.check_invariants(self.ceiling)?;
            if self.workers.len() != self.store.running_count() {
                return Err(YtdlError::InvariantViolation(format!(
                    "{} workers for {} running jobs",
                    self.workers.len(),
                    self.store.running_count()
                )));
            }
        }
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) -> Result<()> {
        match cmd {
            SchedulerCommand::Enqueue { request, reply } => {
                let result = self.enqueue(request);
                self.dispatch()?;
                let _ = reply.send(result);
            }
            SchedulerCommand::EnqueueMany { requests, reply } => {
                let results = requests.into_iter().map(|r| self.enqueue(r)).collect();
                self.dispatch()?;
                let _ = reply.send(results);
            }
            SchedulerCommand::Get { id, reply } => {
                let job = self.store.get(id).cloned().ok_or(YtdlError::JobNotFound(id));
                let _ = reply.send(job);
            }
            SchedulerCommand::List { reply } => {
                let _ = reply.send(self.store.list());
            }
            SchedulerCommand::Cancel { id, reply } => {
                let result = self.cancel(id);
                let _ = reply.send(result);
            }
            SchedulerCommand::CancelAll { reply } => {
                let count = self.cancel_all();
                let _ = reply.send(count);
            }
            SchedulerCommand::ClearCompleted { reply } => {
                let removed = self.store.clear_completed();
                if !removed.is_empty() {
                    info!("Cleared {} finished jobs", removed.len());
                    self.emit(QueueEvent::JobsCleared {
                        job_ids: removed.clone(),
                        timestamp: Utc::now(),
                    });
                }
                let _ = reply.send(removed);
            }
            SchedulerCommand::SetConcurrencyLimit { limit, reply } => {
                let result = self.set_limit(limit);
                if result.is_ok() {
                    self.dispatch()?;
                }
                let _ = reply.send(result);
            }
            SchedulerCommand::Pause { reply } => {
                if !self.paused {
                    info!("Dispatch paused");
                    self.paused = true;
                    self.emit(QueueEvent::DispatchPaused {
                        timestamp: Utc::now(),
                    });
                }
                let _ = reply.send(());
            }
            SchedulerCommand::Resume { reply } => {
                if self.paused {
                    info!("Dispatch resumed");
                    self.paused = false;
                    self.emit(QueueEvent::DispatchResumed {
                        timestamp: Utc::now(),
                    });
                    self.dispatch()?;
                }
                let _ = reply.send(());
            }
            SchedulerCommand::Stats { reply } => {
                let _ = reply.send(self.store.stats(self.limit.get(), self.paused));
            }
            SchedulerCommand::Shutdown { reply } => {
                info!("Scheduler shutting down");
                self.shutdown_replies.push(reply);
                self.begin_shutdown();
            }
        }
        Ok(())
    }

    async fn handle_report(&mut self, report: WorkerMessage) -> Result<()> {
        match report {
            WorkerMessage::Progress { id, event } => self.on_progress(id, event),
            WorkerMessage::Retrying { id, attempt, error } => self.on_retrying(id, attempt, error),
            WorkerMessage::Finished { id, outcome } => self.on_finished(id, outcome).await,
        }
    }

    fn enqueue(&mut self, request: JobRequest) -> Result<JobId> {
        request.validate()?;
        let job = Job::new(request.clone());
        let id = self.store.insert(job)?;
        info!("Job {} queued: {}", id, request.url);
        self.emit(QueueEvent::JobQueued {
            job_id: id,
            request,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    /// Start the earliest queued jobs while slots are free
    fn dispatch(&mut self) -> Result<()> {
        if self.paused || self.closing {
            return Ok(());
        }
        while self.store.running_count() < self.limit.get() {
            let Some(id) = self.store.next_queued() else {
                break;
            };
            self.start(id)?;
        }
        Ok(())
    }

    fn start(&mut self, id: JobId) -> Result<()> {
        self.store.mark_running(id)?;
        let request = self
            .store
            .get(id)
            .map(|job| job.request.clone())
            .ok_or(YtdlError::JobNotFound(id))?;

        let token = CancellationToken::new();
        let worker = Worker {
            id,
            request,
            extractor: self.extractor.clone(),
            policy: self.retry,
            cancel: token.clone(),
            reports: self.report_tx.clone(),
        };
        tokio::spawn(worker.run());
        self.workers.insert(id, token);

        debug!(
            "Job {} running ({}/{})",
            id,
            self.store.running_count(),
            self.limit
        );
        self.emit(QueueEvent::JobStarted {
            job_id: id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn cancel(&mut self, id: JobId) -> Result<()> {
        let status = self
            .store
            .get(id)
            .map(|job| job.status)
            .ok_or(YtdlError::JobNotFound(id))?;

        match status {
            JobStatus::Queued => {
                self.store.mark_cancelled(id)?;
                info!("Job {} cancelled before start", id);
                self.emit(QueueEvent::JobCancelled {
                    job_id: id,
                    timestamp: Utc::now(),
                });
            }
            JobStatus::Running => {
                if self.store.request_cancel(id)? {
                    info!("Job {} cancellation requested", id);
                }
                if let Some(token) = self.workers.get(&id) {
                    token.cancel();
                }
            }
            _ => debug!("Job {} already finished, cancel ignored", id),
        }
        Ok(())
    }

    fn cancel_all(&mut self) -> usize {
        let targets: Vec<JobId> = self
            .store
            .queued_ids()
            .into_iter()
            .chain(self.store.running_ids())
            .collect();
        let mut count = 0;
        for id in targets {
            match self.cancel(id) {
                Ok(()) => count += 1,
                Err(e) => warn!("Failed to cancel job {}: {}", id, e),
            }
        }
        if count > 0 {
            info!("Cancelling {} jobs", count);
        }
        count
    }

    fn set_limit(&mut self, value: usize) -> Result<()> {
        let limit = ConcurrencyLimit::new(value)?;
        if limit == self.limit {
            return Ok(());
        }
        info!("Concurrency limit {} -> {}", self.limit, limit);
        self.limit = limit;
        self.ceiling = limit.get().max(self.store.running_count());
        self.emit(QueueEvent::ConcurrencyLimitChanged {
            limit: limit.get(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn begin_shutdown(&mut self) {
        if !self.closing {
            self.cancel_all();
            self.closing = true;
        }
    }

    fn on_progress(&mut self, id: JobId, event: ProgressEvent) -> Result<()> {
        let Some(job) = self.store.get(id) else {
            return Ok(());
        };
        if job.status != JobStatus::Running {
            return Ok(());
        }
        if self.store.apply_progress(id, &event)? {
            if let Some(job) = self.store.get(id) {
                self.emit(QueueEvent::JobProgress {
                    job_id: id,
                    fraction: job.progress,
                    rate: job.rate,
                    eta: job.eta,
                });
            }
        }
        Ok(())
    }

    fn on_retrying(&mut self, id: JobId, attempt: u32, error: ExtractionError) -> Result<()> {
        self.store.mark_retrying(id, attempt)?;
        info!("Job {} retrying (attempt {}): {}", id, attempt, error);
        self.emit(QueueEvent::JobRetrying {
            job_id: id,
            attempt,
            error,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn on_finished(&mut self, id: JobId, outcome: JobOutcome) -> Result<()> {
        if self.workers.remove(&id).is_none() {
            return Err(YtdlError::InvariantViolation(format!(
                "outcome reported for job {} without a worker",
                id
            )));
        }

        let timestamp = Utc::now();
        match outcome {
            JobOutcome::Completed(path) => {
                self.store.mark_completed(id, path.clone())?;
                self.emit(QueueEvent::JobCompleted {
                    job_id: id,
                    output_path: path.clone(),
                    timestamp,
                });
                self.submit_conversion(id, path).await?;
            }
            JobOutcome::Failed(error) => {
                self.store.mark_failed(id, error.clone())?;
                self.emit(QueueEvent::JobFailed {
                    job_id: id,
                    error,
                    timestamp,
                });
            }
            JobOutcome::Cancelled => {
                self.store.mark_cancelled(id)?;
                self.emit(QueueEvent::JobCancelled {
                    job_id: id,
                    timestamp,
                });
            }
        }

        self.ceiling = self.limit.get().max(self.store.running_count());
        self.dispatch()
    }

    async fn submit_conversion(&mut self, id: JobId, path: PathBuf) -> Result<()> {
        let (Some(pool), Some(profile)) = (&self.conversions, self.auto_convert) else {
            return Ok(());
        };
        let conversion_id = pool.submit(path, profile, Some(id)).await;
        self.store.set_conversion(id, conversion_id)?;
        self.emit(QueueEvent::ConversionQueued {
            job_id: id,
            conversion_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
