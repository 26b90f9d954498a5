//! Batch scheduler: bounded concurrent dispatch of queued jobs

mod actor;
pub mod handle;
mod messages;
pub mod policy;
mod worker;

pub use handle::SchedulerHandle;
pub use policy::{ConcurrencyLimit, RetryPolicy};

use crate::converter::{ConversionPool, ConversionProfile};
use crate::extractor::Extractor;
use crate::queue::QueueEvent;
use crate::utils::error::Result;
use actor::SchedulerActor;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const COMMAND_CHANNEL_CAPACITY: usize = 100;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub limit: ConcurrencyLimit,
    pub retry: RetryPolicy,
    /// Converted automatically after each completed download when a
    /// conversion pool is attached
    pub auto_convert: Option<ConversionProfile>,
}

pub struct Scheduler;

impl Scheduler {
    /// Start the scheduler task. The join handle resolves when it stops, with
    /// an error only if a queue invariant was broken.
    pub fn spawn(
        config: SchedulerConfig,
        extractor: Arc<dyn Extractor>,
        conversions: Option<Arc<ConversionPool>>,
    ) -> (SchedulerHandle, JoinHandle<Result<()>>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel::<QueueEvent>(EVENT_CHANNEL_CAPACITY);

        let actor = SchedulerActor::new(config, extractor, conversions, cmd_rx, event_tx.clone());
        let task = tokio::spawn(actor.run());

        (SchedulerHandle::new(cmd_tx, event_tx), task)
    }
}
