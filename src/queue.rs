// src/queue.rs

use crate::artwork::ArtworkFetcher;
use crate::catalog::StreamSource;
use crate::config::Config;
use crate::downloader::{Fetcher, HttpFetcher};
use crate::limiter::DispatchLimiter;
use crate::models::{DownloadTask, TaskStatus};
use crate::negotiator::StreamNegotiator;
use crate::remux::Remuxer;
use crate::tagger::MetadataEmbedder;
use crate::worker::Worker;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Point-in-time counts over the queue's collections.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    /// Failed and cancelled tasks.
    pub failed: usize,
    pub total: usize,
}

/// Invoked with the final state of every task that terminates.
pub type TaskCallback = Arc<dyn Fn(&DownloadTask) + Send + Sync>;

/// The three task collections. Always accessed under one lock, never across an `.await`.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// Bumped by `clear`; completions from an older generation are dropped.
    generation: u64,
    pending: Vec<DownloadTask>,
    completed: Vec<DownloadTask>,
    failed: Vec<DownloadTask>,
}

impl QueueState {
    fn admit(&mut self, mut task: DownloadTask) -> bool {
        if self.pending.iter().any(|t| t.id == task.id) {
            debug!(task_id = %task.id, "already queued, ignoring");
            return false;
        }
        if let Some(pos) = self.completed.iter().position(|t| t.id == task.id) {
            if self.completed[pos].output_path.exists() {
                debug!(task_id = %task.id, "already downloaded, ignoring");
                return false;
            }
            debug!(task_id = %task.id, "file was deleted, allowing re-download");
            self.completed.remove(pos);
        }
        self.failed.retain(|t| t.id != task.id);

        task.reset();
        debug!(task_id = %task.id, "added task to queue");
        self.pending.push(task);
        true
    }

    fn next_task(&mut self) -> Option<(DownloadTask, u64)> {
        let task = self
            .pending
            .iter_mut()
            .find(|t| t.status == TaskStatus::Queued)?;
        task.advance(TaskStatus::Downloading);
        Some((task.clone(), self.generation))
    }

    fn pending_mut(&mut self, id: &str, generation: u64) -> Option<&mut DownloadTask> {
        if generation != self.generation {
            return None;
        }
        self.pending.iter_mut().find(|t| t.id == id)
    }

    /// Move a terminated task out of the pending list. False if it belongs to a cleared generation.
    fn finish(&mut self, task: DownloadTask, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.pending.retain(|t| t.id != task.id);
        match task.status {
            TaskStatus::Completed | TaskStatus::Skipped => self.completed.push(task),
            _ => self.failed.push(task),
        }
        true
    }

    /// Give up on everything still marked as downloading.
    fn abandon_in_flight(&mut self) -> Vec<DownloadTask> {
        let (in_flight, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|t| t.status == TaskStatus::Downloading);
        self.pending = rest;

        let mut abandoned = Vec::with_capacity(in_flight.len());
        for mut task in in_flight {
            task.advance(TaskStatus::Cancelled);
            task.error = Some("Download cancelled by user".to_string());
            abandoned.push(task.clone());
            self.failed.push(task);
        }
        abandoned
    }

    fn status(&self) -> QueueStatus {
        let queued = self.pending.iter().filter(|t| t.status == TaskStatus::Queued).count();
        let downloading = self
            .pending
            .iter()
            .filter(|t| t.status == TaskStatus::Downloading)
            .count();
        let completed = self.completed.len();
        let failed = self.failed.len();
        QueueStatus {
            queued,
            downloading,
            completed,
            failed,
            total: queued + downloading + completed + failed,
        }
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.pending.clear();
        self.completed.clear();
        self.failed.clear();
    }
}

/// Everything the workers share.
pub(crate) struct Shared {
    pub(crate) config: Arc<Config>,
    state: Mutex<QueueState>,
    pub(crate) limiter: DispatchLimiter,
    pub(crate) negotiator: StreamNegotiator,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) remuxer: Remuxer,
    pub(crate) embedder: MetadataEmbedder,
    pub(crate) artwork: ArtworkFetcher,
    callbacks: RwLock<Vec<TaskCallback>>,
}

impl Shared {
    pub(crate) fn next_task(&self) -> Option<(DownloadTask, u64)> {
        self.state.lock().next_task()
    }

    pub(crate) fn set_progress(&self, id: &str, generation: u64, progress: f32) {
        if let Some(task) = self.state.lock().pending_mut(id, generation) {
            task.progress = progress;
        }
    }

    /// Mirror a worker's copy of an in-flight task into the pending list.
    pub(crate) fn publish(&self, task: &DownloadTask, generation: u64) {
        if let Some(entry) = self.state.lock().pending_mut(&task.id, generation) {
            *entry = task.clone();
        }
    }

    pub(crate) fn finish(&self, task: DownloadTask, generation: u64) {
        let recorded = self.state.lock().finish(task.clone(), generation);
        if !recorded {
            debug!(task_id = %task.id, "queue was cleared while downloading, dropping result");
        }
        self.notify(&task);
    }

    fn notify(&self, task: &DownloadTask) {
        // Snapshot first so an observer may register further observers.
        let callbacks = self.callbacks.read().clone();
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(task))).is_err() {
                warn!(task_id = %task.id, "task callback panicked");
            }
        }
    }
}

struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Builder for a [`DownloadQueue`]; lets callers swap the byte fetcher or remuxer.
pub struct QueueBuilder {
    config: Config,
    source: Arc<dyn StreamSource>,
    fetcher: Option<Arc<dyn Fetcher>>,
    remuxer: Option<Remuxer>,
}

impl QueueBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn remuxer(mut self, remuxer: Remuxer) -> Self {
        self.remuxer = Some(remuxer);
        self
    }

    pub async fn build(self) -> Result<DownloadQueue, QueueError> {
        let config = self.config;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.request_timeout)
            .read_timeout(config.request_timeout)
            .build()?;

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(client.clone(), config.request_timeout)),
        };
        let remuxer = match self.remuxer {
            Some(remuxer) => remuxer,
            None => Remuxer::detect(config.remux_timeout).await,
        };

        let shared = Shared {
            limiter: DispatchLimiter::new(config.rate_limit_delay),
            negotiator: StreamNegotiator::new(self.source),
            fetcher,
            remuxer,
            embedder: MetadataEmbedder::new(),
            artwork: ArtworkFetcher::new(client, config.cover_timeout),
            state: Mutex::new(QueueState::default()),
            callbacks: RwLock::new(Vec::new()),
            config: Arc::new(config),
        };

        Ok(DownloadQueue {
            shared: Arc::new(shared),
            pool: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }
}

/// Thread-safe download queue with a pool of rate-limited workers.
pub struct DownloadQueue {
    shared: Arc<Shared>,
    pool: Mutex<Option<WorkerPool>>,
    running: AtomicBool,
}

impl DownloadQueue {
    pub fn builder(config: Config, source: Arc<dyn StreamSource>) -> QueueBuilder {
        QueueBuilder {
            config,
            source,
            fetcher: None,
            remuxer: None,
        }
    }

    /// A queue that fetches over HTTP and remuxes with the system ffmpeg, if present.
    pub async fn new(config: Config, source: Arc<dyn StreamSource>) -> Result<Self, QueueError> {
        Self::builder(config, source).build().await
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Register an observer for task termination. A panicking observer doesn't affect the others.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&DownloadTask) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().push(Arc::new(callback));
    }

    /// Enqueue a task unless it is already queued, downloading, or downloaded
    /// with its file still on disk. Returns whether the task was accepted.
    pub fn add_task(&self, task: DownloadTask) -> bool {
        self.shared.state.lock().admit(task)
    }

    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = DownloadTask>) -> usize {
        let mut state = self.shared.state.lock();
        let mut added = 0;
        for task in tasks {
            if state.admit(task) {
                added += 1;
            }
        }
        added
    }

    /// Claim the first queued task, flipping it to downloading.
    pub fn next_task(&self) -> Option<DownloadTask> {
        self.shared.next_task().map(|(task, _)| task)
    }

    pub fn get_status(&self) -> QueueStatus {
        self.shared.state.lock().status()
    }

    /// Queued and downloading tasks, in insertion order.
    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.shared.state.lock().pending.clone()
    }

    pub fn completed(&self) -> Vec<DownloadTask> {
        self.shared.state.lock().completed.clone()
    }

    /// Failed and cancelled tasks.
    pub fn failed(&self) -> Vec<DownloadTask> {
        self.shared.state.lock().failed.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn `count` workers. Does nothing while workers are already running.
    pub fn start_workers(&self, count: usize) {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = Worker::new(id, self.shared.clone(), shutdown.clone());
                tokio::spawn(worker.run())
            })
            .collect();
        *pool = Some(WorkerPool { shutdown, handles });
        self.running.store(true, Ordering::SeqCst);
        info!(count = count.max(1), "started workers");
    }

    /// Start as many workers as `max_concurrent_downloads` allows.
    pub fn start(&self) {
        self.start_workers(self.shared.config.max_concurrent_downloads);
    }

    /// Signal every worker to stop and wait (bounded) for them.
    ///
    /// Workers notice the signal between chunks, so this returns once each
    /// current chunk or segment is done. Safe to call when nothing is running.
    pub async fn stop_workers(&self) {
        let Some(pool) = self.pool.lock().take() else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };
        pool.shutdown.cancel();

        let mut aborted = false;
        for mut handle in pool.handles {
            match tokio::time::timeout(self.shared.config.stop_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "worker ended abnormally"),
                Err(_) => {
                    warn!("worker did not stop in time, aborting it");
                    handle.abort();
                    let _ = handle.await;
                    aborted = true;
                }
            }
        }

        if aborted {
            let abandoned = self.shared.state.lock().abandon_in_flight();
            for task in &abandoned {
                self.shared.notify(task);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("stopped all workers");
    }

    /// Resolves once nothing is queued or downloading, or once no workers are running.
    pub async fn wait_for_completion(&self) {
        loop {
            let status = self.get_status();
            if status.queued + status.downloading == 0 || !self.is_running() {
                return;
            }
            tokio::time::sleep(self.shared.config.idle_poll_interval).await;
        }
    }

    /// Drop every task from every collection. In-flight downloads keep going,
    /// but their results are not recorded.
    pub fn clear(&self) {
        self.shared.state.lock().clear();
        info!("cleared download queue");
    }
}
