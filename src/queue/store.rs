//! Ordered in-memory job store.
//!
//! The store is owned by the scheduler actor; every mutation goes through it so
//! the running-count invariant can be checked in one place.

use crate::converter::ConversionId;
use crate::extractor::{ExtractionError, ProgressEvent};
use crate::queue::job::{Job, JobId, JobStatus};
use crate::utils::error::{Result, YtdlError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Counts by status, as shown in a batch summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub concurrency_limit: usize,
    pub paused: bool,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed + self.cancelled
    }

    /// Nothing left to start or finish
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0
    }
}

/// Insertion-ordered job collection
#[derive(Debug, Default)]
pub struct QueueStore {
    jobs: Vec<Job>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Append a job. Duplicate ids are a programming error.
    pub fn insert(&mut self, job: Job) -> Result<JobId> {
        if self.jobs.iter().any(|j| j.id == job.id) {
            return Err(YtdlError::InvariantViolation(format!(
                "duplicate job id {}",
                job.id
            )));
        }
        let id = job.id;
        self.jobs.push(job);
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn get_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(YtdlError::JobNotFound(id))
    }

    /// Snapshot of every job in submission order
    pub fn list(&self) -> Vec<Job> {
        self.jobs.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn running_count(&self) -> usize {
        self.count(JobStatus::Running)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Earliest-submitted job still waiting for a slot
    pub fn next_queued(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|j| j.status == JobStatus::Queued)
            .map(|j| j.id)
    }

    /// Ids of all queued jobs, in submission order
    pub fn queued_ids(&self) -> Vec<JobId> {
        self.ids_with(JobStatus::Queued)
    }

    pub fn running_ids(&self) -> Vec<JobId> {
        self.ids_with(JobStatus::Running)
    }

    fn ids_with(&self, status: JobStatus) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|j| j.status == status)
            .map(|j| j.id)
            .collect()
    }

    fn transition(&mut self, id: JobId, to: JobStatus) -> Result<&mut Job> {
        let job = self.get_mut(id)?;
        if !job.status.can_transition_to(to) {
            return Err(YtdlError::InvalidTransition {
                id,
                from: job.status,
                to,
            });
        }
        job.status = to;
        if to.is_terminal() {
            job.finished_at = Some(Utc::now());
            job.retrying = false;
            job.rate = None;
            job.eta = None;
        }
        Ok(job)
    }

    pub fn mark_running(&mut self, id: JobId) -> Result<()> {
        let job = self.transition(id, JobStatus::Running)?;
        job.started_at = Some(Utc::now());
        job.attempt = 1;
        Ok(())
    }

    pub fn mark_completed(&mut self, id: JobId, output_path: PathBuf) -> Result<()> {
        let job = self.transition(id, JobStatus::Completed)?;
        job.progress = 1.0;
        job.output_path = Some(output_path);
        Ok(())
    }

    pub fn mark_failed(&mut self, id: JobId, error: ExtractionError) -> Result<()> {
        let job = self.transition(id, JobStatus::Failed)?;
        job.error = Some(error);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, id: JobId) -> Result<()> {
        self.transition(id, JobStatus::Cancelled)?;
        Ok(())
    }

    /// Flag a running job as having a pending cancellation. Returns false when
    /// the flag was already set.
    pub fn request_cancel(&mut self, id: JobId) -> Result<bool> {
        let job = self.get_mut(id)?;
        let first = !job.cancel_requested;
        job.cancel_requested = true;
        Ok(first)
    }

    pub fn apply_progress(&mut self, id: JobId, event: &ProgressEvent) -> Result<bool> {
        Ok(self.get_mut(id)?.apply_progress(event))
    }

    /// Record that a transient failure is being retried. The slot stays occupied.
    pub fn mark_retrying(&mut self, id: JobId, attempt: u32) -> Result<()> {
        let job = self.get_mut(id)?;
        if job.status != JobStatus::Running {
            return Err(YtdlError::InvariantViolation(format!(
                "retry reported for job {} in state {:?}",
                id, job.status
            )));
        }
        job.attempt = attempt;
        job.retrying = true;
        job.rate = None;
        job.eta = None;
        Ok(())
    }

    pub fn set_conversion(&mut self, id: JobId, conversion: ConversionId) -> Result<()> {
        self.get_mut(id)?.conversion = Some(conversion);
        Ok(())
    }

    /// Drop every terminal job, keeping the rest in their relative order
    pub fn clear_completed(&mut self) -> Vec<JobId> {
        let removed = self
            .jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .map(|j| j.id)
            .collect();
        self.jobs.retain(|j| !j.status.is_terminal());
        removed
    }

    pub fn stats(&self, concurrency_limit: usize, paused: bool) -> QueueStats {
        let mut stats = QueueStats {
            concurrency_limit,
            paused,
            ..Default::default()
        };
        for job in &self.jobs {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Structural checks run after every scheduler event
    pub fn check_invariants(&self, running_ceiling: usize) -> Result<()> {
        let running = self.running_count();
        if running > running_ceiling {
            return Err(YtdlError::InvariantViolation(format!(
                "{} jobs running, ceiling is {}",
                running, running_ceiling
            )));
        }

        let mut seen = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if !seen.insert(job.id) {
                return Err(YtdlError::InvariantViolation(format!(
                    "duplicate job id {}",
                    job.id
                )));
            }
            if job.error.is_some() && job.status != JobStatus::Failed {
                return Err(YtdlError::InvariantViolation(format!(
                    "job {} carries an error while {:?}",
                    job.id, job.status
                )));
            }
            if job.output_path.is_some() && job.status != JobStatus::Completed {
                return Err(YtdlError::InvariantViolation(format!(
                    "job {} carries an output path while {:?}",
                    job.id, job.status
                )));
            }
        }
        Ok(())
    }
}
