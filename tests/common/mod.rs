//! Scripted adapters and polling helpers shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use ytdl::converter::{ConversionError, ConversionProfile, Converter};
use ytdl::extractor::{
    ExtractionError, ExtractionErrorKind, ExtractionEvent, ExtractionHandle, Extractor,
    ProgressEvent,
};
use ytdl::queue::{Job, JobId, JobRequest, JobStatus};
use ytdl::scheduler::SchedulerHandle;

pub const WAIT: Duration = Duration::from_secs(5);

/// What one attempt for a URL does
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit the given fractions, then succeed
    Succeed(Vec<f64>),
    /// Fail straight away
    Fail(ExtractionErrorKind),
    /// Wait for the test to drive it through an [`AttemptControl`]
    Manual,
}

enum Control {
    Progress(f64),
    Finish(Result<(), ExtractionErrorKind>),
}

/// Remote control for one manual attempt
#[derive(Clone)]
pub struct AttemptControl {
    tx: mpsc::UnboundedSender<Control>,
}

impl AttemptControl {
    pub fn progress(&self, fraction: f64) {
        let _ = self.tx.send(Control::Progress(fraction));
    }

    pub fn succeed(&self) {
        let _ = self.tx.send(Control::Finish(Ok(())));
    }

    pub fn fail(&self, kind: ExtractionErrorKind) {
        let _ = self.tx.send(Control::Finish(Err(kind)));
    }
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Script>>,
    starts: Vec<String>,
    controls: HashMap<String, Vec<AttemptControl>>,
}

/// Extractor whose attempts follow per-URL scripts. URLs without a script
/// behave as [`Script::Manual`].
#[derive(Default)]
pub struct MockExtractor {
    state: Mutex<MockState>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
    outputs: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue scripts for successive attempts on `url`
    pub fn script(&self, url: &str, attempts: impl IntoIterator<Item = Script>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(url.to_string())
            .or_default()
            .extend(attempts);
    }

    /// URLs in the order their attempts were started
    pub fn starts(&self) -> Vec<String> {
        self.state.lock().unwrap().starts.clone()
    }

    pub fn start_count(&self, url: &str) -> usize {
        self.starts().iter().filter(|u| u.as_str() == url).count()
    }

    /// Control for the latest manual attempt on `url`
    pub fn control(&self, url: &str) -> Option<AttemptControl> {
        self.state
            .lock()
            .unwrap()
            .controls
            .get(url)
            .and_then(|c| c.last().cloned())
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Attempts torn down through cancellation
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, request: &JobRequest) -> Result<ExtractionHandle, ExtractionError> {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let script = {
            let mut state = self.state.lock().unwrap();
            state.starts.push(request.url.clone());
            let script = state
                .scripts
                .get_mut(&request.url)
                .and_then(|q| q.pop_front())
                .unwrap_or(Script::Manual);
            if matches!(script, Script::Manual) {
                state
                    .controls
                    .entry(request.url.clone())
                    .or_default()
                    .push(AttemptControl { tx: control_tx });
            }
            script
        };

        let n = self.outputs.fetch_add(1, Ordering::SeqCst);
        let output = request.destination.join(format!("output-{}.mp4", n));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let driver_token = token.clone();
        let active = self.active.clone();
        let cancels = self.cancels.clone();

        let driver = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = driver_token.cancelled() => None,
                outcome = run_script(script, &mut control_rx, &tx, &output) => Some(outcome),
            };
            match outcome {
                Some(outcome) => {
                    active.fetch_sub(1, Ordering::SeqCst);
                    let _ = tx.send(ExtractionEvent::Finished(outcome)).await;
                }
                None => {
                    // Simulated teardown
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    cancels.fetch_add(1, Ordering::SeqCst);
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            }
        });

        Ok(ExtractionHandle::new(rx, token, driver))
    }
}

fn progress(fraction: f64) -> ExtractionEvent {
    ExtractionEvent::Progress(ProgressEvent {
        fraction,
        rate: Some(1024.0 * 1024.0),
        eta: None,
    })
}

async fn write_output(output: &Path) -> Result<PathBuf, ExtractionError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output, b"media").await?;
    Ok(output.to_path_buf())
}

fn scripted_error(kind: ExtractionErrorKind) -> ExtractionError {
    ExtractionError::new(kind, format!("scripted {}", kind))
}

/// Play one attempt, returning its outcome without sending it
async fn run_script(
    script: Script,
    control: &mut mpsc::UnboundedReceiver<Control>,
    tx: &mpsc::Sender<ExtractionEvent>,
    output: &Path,
) -> Result<PathBuf, ExtractionError> {
    match script {
        Script::Succeed(fractions) => {
            for f in fractions {
                let _ = tx.send(progress(f)).await;
            }
            write_output(output).await
        }
        Script::Fail(kind) => Err(scripted_error(kind)),
        Script::Manual => {
            while let Some(msg) = control.recv().await {
                match msg {
                    Control::Progress(f) => {
                        let _ = tx.send(progress(f)).await;
                    }
                    Control::Finish(Ok(())) => return write_output(output).await,
                    Control::Finish(Err(kind)) => return Err(scripted_error(kind)),
                }
            }
            // Test dropped the control: hang until cancelled
            std::future::pending().await
        }
    }
}

/// Converter that writes a small file at the profile's output path
#[derive(Default)]
pub struct MockConverter {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

#[async_trait]
impl Converter for MockConverter {
    fn id(&self) -> &'static str {
        "mock-converter"
    }

    async fn convert(
        &self,
        source: &Path,
        profile: &ConversionProfile,
        progress: Option<mpsc::Sender<f64>>,
        cancel: CancellationToken,
    ) -> Result<PathBuf, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let output = profile.output_path_for(source);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ConversionError::cancelled()),
            _ = tokio::time::sleep(self.delay) => {}
        }
        if let Some(tx) = progress {
            let _ = tx.send(1.0).await;
        }
        tokio::fs::write(&output, b"converted").await?;
        Ok(output)
    }
}

pub fn url(n: usize) -> String {
    format!("https://media.example.com/watch?v={}", n)
}

pub fn request(n: usize, dest: &Path) -> JobRequest {
    JobRequest::video(url(n), dest)
}

/// Poll `check` until it holds, panicking after [`WAIT`]
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(WAIT, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if result.is_err() {
        panic!("timed out waiting for {}", what);
    }
}

pub async fn wait_for_status(handle: &SchedulerHandle, id: JobId, status: JobStatus) -> Job {
    wait_for(&format!("job {} to be {:?}", id, status), || async move {
        handle.get(id).await.map(|j| j.status == status).unwrap_or(false)
    })
    .await;
    handle.get(id).await.unwrap()
}

pub async fn wait_for_starts(mock: &MockExtractor, n: usize) {
    wait_for(&format!("{} extractor starts", n), || async move { mock.starts().len() >= n }).await;
}

/// Wait until a manual attempt for `url` has been started and return its control
pub async fn control_for(mock: &MockExtractor, url: &str) -> AttemptControl {
    wait_for(&format!("an attempt on {}", url), || async move {
        mock.control(url).is_some()
    })
    .await;
    mock.control(url).unwrap()
}
