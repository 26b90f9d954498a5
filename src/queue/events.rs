use crate::converter::ConversionId;
use crate::extractor::ExtractionError;
use crate::queue::job::{JobId, JobRequest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Events that describe changes in the download queue state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// A new job was added to the queue
    JobQueued {
        job_id: JobId,
        request: JobRequest,
        timestamp: DateTime<Utc>,
    },
    /// A job took a slot and its extractor was started
    JobStarted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// Live transfer figures for a running job
    JobProgress {
        job_id: JobId,
        fraction: f64,
        rate: Option<f64>,
        eta: Option<Duration>,
    },
    /// A transient failure is being retried; the job keeps its slot
    JobRetrying {
        job_id: JobId,
        attempt: u32,
        error: ExtractionError,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully
    JobCompleted {
        job_id: JobId,
        output_path: PathBuf,
        timestamp: DateTime<Utc>,
    },
    /// A job failed
    JobFailed {
        job_id: JobId,
        error: ExtractionError,
        timestamp: DateTime<Utc>,
    },
    /// A job was cancelled (queued, or running and acknowledged by the extractor)
    JobCancelled {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A completed job's output was handed to the conversion pool
    ConversionQueued {
        job_id: JobId,
        conversion_id: ConversionId,
        timestamp: DateTime<Utc>,
    },
    /// Terminal jobs were removed from the store
    JobsCleared {
        job_ids: Vec<JobId>,
        timestamp: DateTime<Utc>,
    },
    ConcurrencyLimitChanged {
        limit: usize,
        timestamp: DateTime<Utc>,
    },
    DispatchPaused {
        timestamp: DateTime<Utc>,
    },
    DispatchResumed {
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Progress ticks are too chatty for the persistent log
    pub fn is_progress(&self) -> bool {
        matches!(self, QueueEvent::JobProgress { .. })
    }
}

/// Helper to manage the persistent event log
#[derive(Debug, Clone)]
pub struct EventLog {
    file_path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl EventLog {
    pub async fn new(base_dir: &Path) -> Result<Self> {
        let file_path = base_dir.join("events.jsonl");

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await
            .context("Failed to open event log")?;

        Ok(Self {
            file_path,
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append an event to the log
    pub async fn log(&self, event: &QueueEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Record every non-progress event from a scheduler subscription until the
    /// scheduler goes away.
    pub fn spawn_recorder(self, mut events: broadcast::Receiver<QueueEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_progress() => continue,
                    Ok(event) => {
                        if let Err(e) = self.log(&event).await {
                            tracing::warn!("Failed to write event log entry: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event log recorder lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Read all events back, skipping lines that fail to parse
    pub async fn read_events(&self) -> Result<Vec<QueueEvent>> {
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.file_path).await?;
        let mut events = Vec::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueueEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Failed to parse event log line: {}. Error: {}", line, e);
                }
            }
        }
        Ok(events)
    }
}
