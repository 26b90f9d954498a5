//! Bounded pool of conversion tasks
//!
//! Runs at most 1-2 conversions at a time, independently of the download
//! concurrency limit. Tasks wait in submission order for a slot.

use crate::converter::profile::ConversionProfile;
use crate::converter::traits::{ConversionError, Converter};
use crate::converter::ConversionId;
use crate::queue::JobId;
use crate::utils::error::{Result, YtdlError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MIN_CONVERSION_SLOTS: usize = 1;
pub const MAX_CONVERSION_SLOTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Converting { fraction: f64 },
    Completed { output: PathBuf },
    Failed { error: ConversionError },
    Cancelled,
}

impl ConversionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionStatus::Completed { .. }
                | ConversionStatus::Failed { .. }
                | ConversionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTask {
    pub id: ConversionId,
    /// Download that produced the source, if any
    pub job_id: Option<JobId>,
    pub source: PathBuf,
    pub profile: ConversionProfile,
    pub status: ConversionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct Entry {
    task: ConversionTask,
    cancel: CancellationToken,
}

pub struct ConversionPool {
    converter: Arc<dyn Converter>,
    permits: Arc<Semaphore>,
    slots: usize,
    keep_original: bool,
    entries: Arc<Mutex<Vec<Entry>>>,
    changed: Arc<Notify>,
    next_id: AtomicU64,
}

impl ConversionPool {
    pub fn new(converter: Arc<dyn Converter>, slots: usize, keep_original: bool) -> Result<Self> {
        if !(MIN_CONVERSION_SLOTS..=MAX_CONVERSION_SLOTS).contains(&slots) {
            return Err(YtdlError::InvalidConversionSlots(slots));
        }
        Ok(Self {
            converter,
            permits: Arc::new(Semaphore::new(slots)),
            slots,
            keep_original,
            entries: Arc::new(Mutex::new(Vec::new())),
            changed: Arc::new(Notify::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Queue a conversion. It starts as soon as a slot frees up.
    pub async fn submit(
        &self,
        source: PathBuf,
        profile: ConversionProfile,
        job_id: Option<JobId>,
    ) -> ConversionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = ConversionTask {
            id,
            job_id,
            source: source.clone(),
            profile,
            status: ConversionStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.entries.lock().await.push(Entry {
            task,
            cancel: cancel.clone(),
        });
        info!("Queued conversion {} of {} to {}", id, source.display(), profile);

        let runner = Runner {
            id,
            source,
            profile,
            keep_original: self.keep_original,
            converter: self.converter.clone(),
            permits: self.permits.clone(),
            entries: self.entries.clone(),
            changed: self.changed.clone(),
            cancel,
        };
        tokio::spawn(runner.run());
        id
    }

    pub async fn get(&self, id: ConversionId) -> Result<ConversionTask> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.task.id == id)
            .map(|e| e.task.clone())
            .ok_or(YtdlError::ConversionNotFound(id))
    }

    pub async fn list(&self) -> Vec<ConversionTask> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.task.clone())
            .collect()
    }

    /// Pending tasks are cancelled at once; a running one once the
    /// converter has stopped. Terminal tasks are left alone.
    pub async fn cancel(&self, id: ConversionId) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.task.id == id)
            .ok_or(YtdlError::ConversionNotFound(id))?;

        if entry.task.status.is_terminal() {
            return Ok(());
        }
        if entry.task.status == ConversionStatus::Pending {
            entry.task.status = ConversionStatus::Cancelled;
            entry.task.finished_at = Some(Utc::now());
            self.changed.notify_waiters();
        }
        entry.cancel.cancel();
        Ok(())
    }

    pub async fn cancel_all(&self) {
        let ids: Vec<ConversionId> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| !e.task.status.is_terminal())
            .map(|e| e.task.id)
            .collect();
        for id in ids {
            let _ = self.cancel(id).await;
        }
    }

    /// Drop every terminal task, keeping the rest in submission order
    pub async fn clear_finished(&self) -> Vec<ConversionId> {
        let mut entries = self.entries.lock().await;
        let removed: Vec<ConversionId> = entries
            .iter()
            .filter(|e| e.task.status.is_terminal())
            .map(|e| e.task.id)
            .collect();
        entries.retain(|e| !e.task.status.is_terminal());
        if !removed.is_empty() {
            debug!("Cleared {} finished conversions", removed.len());
        }
        removed
    }

    /// Wait until the task reaches a terminal status
    pub async fn wait(&self, id: ConversionId) -> Result<ConversionTask> {
        loop {
            let notified = self.changed.notified();
            let task = self.get(id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            notified.await;
        }
    }

    /// Wait until no task is pending or converting
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            let busy = self
                .entries
                .lock()
                .await
                .iter()
                .any(|e| !e.task.status.is_terminal());
            if !busy {
                return;
            }
            notified.await;
        }
    }
}

/// Everything one spawned conversion needs
struct Runner {
    id: ConversionId,
    source: PathBuf,
    profile: ConversionProfile,
    keep_original: bool,
    converter: Arc<dyn Converter>,
    permits: Arc<Semaphore>,
    entries: Arc<Mutex<Vec<Entry>>>,
    changed: Arc<Notify>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(self) {
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish(ConversionStatus::Cancelled).await;
                return;
            }
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Conversion pool closed before task {} could start", self.id);
                    self.finish(ConversionStatus::Cancelled).await;
                    return;
                }
            }
        };

        if !self.update(|status| {
            if *status == ConversionStatus::Pending {
                *status = ConversionStatus::Converting { fraction: 0.0 };
                true
            } else {
                false
            }
        })
        .await
        {
            return;
        }
        debug!("Conversion {} acquired a slot", self.id);

        let (progress_tx, mut progress_rx) = mpsc::channel::<f64>(32);
        let reporter = {
            let entries = self.entries.clone();
            let changed = self.changed.clone();
            let id = self.id;
            tokio::spawn(async move {
                while let Some(fraction) = progress_rx.recv().await {
                    let mut entries = entries.lock().await;
                    if let Some(entry) = entries.iter_mut().find(|e| e.task.id == id) {
                        if let ConversionStatus::Converting { fraction: current } =
                            &mut entry.task.status
                        {
                            if fraction > *current {
                                *current = fraction;
                                changed.notify_waiters();
                            }
                        }
                    }
                }
            })
        };

        let result = self
            .converter
            .convert(
                &self.source,
                &self.profile,
                Some(progress_tx),
                self.cancel.clone(),
            )
            .await;
        drop(permit);
        let _ = reporter.await;

        let status = match result {
            Ok(output) => {
                if !self.keep_original && output != self.source {
                    match tokio::fs::remove_file(&self.source).await {
                        Ok(()) => debug!("Removed original {}", self.source.display()),
                        Err(e) => warn!("Failed to remove {}: {}", self.source.display(), e),
                    }
                }
                info!("Conversion {} completed: {}", self.id, output.display());
                ConversionStatus::Completed { output }
            }
            Err(e) if e.is_cancelled() => {
                info!("Conversion {} cancelled", self.id);
                ConversionStatus::Cancelled
            }
            Err(error) => {
                warn!("Conversion {} failed: {}", self.id, error);
                ConversionStatus::Failed { error }
            }
        };
        self.finish(status).await;
    }

    async fn update(&self, f: impl FnOnce(&mut ConversionStatus) -> bool) -> bool {
        let mut entries = self.entries.lock().await;
        let changed = entries
            .iter_mut()
            .find(|e| e.task.id == self.id)
            .map(|e| f(&mut e.task.status))
            .unwrap_or(false);
        if changed {
            self.changed.notify_waiters();
        }
        changed
    }

    async fn finish(&self, status: ConversionStatus) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.task.id == self.id) {
            if !entry.task.status.is_terminal() {
                entry.task.status = status;
                entry.task.finished_at = Some(Utc::now());
            }
        }
        self.changed.notify_waiters();
    }
}
