use super::progress::{ProgressHandle, ProgressTracker, QUEUED};
use crate::modules::clip::model::Clip;
use crate::modules::clip::repository::{ClipStore, RepositoryError};
use async_channel::{Receiver, Sender, TrySendError};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Deserialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One unit of work per clip. Implementations report progress through the
/// handle and return errors instead of panicking; a panic is still contained
/// by the worker that called it.
#[async_trait]
pub trait ClipProcessor: Send + Sync {
    async fn process(&self, clip: &Clip, progress: ProgressHandle) -> Result<(), ProcessError>;
}

pub use super::transcoder::ProcessError;

/// What `queue` does when the backlog is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    Block,
    Reject,
}

impl FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown queue policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub backlog: usize,
    pub policy: QueuePolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error("transcoding backlog is full ({capacity} clips waiting)")]
    BacklogFull { capacity: usize },
    #[error("scheduler is shut down")]
    Closed,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// One-shot barrier: closed until `open`, then open forever.
#[derive(Clone)]
pub struct ReadyGate {
    state: Arc<watch::Sender<bool>>,
}

impl ReadyGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Returns `false` if the gate was already open.
    pub fn open(&self) -> bool {
        self.state.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct JobScheduler {
    sender: Sender<Clip>,
    progress: Arc<ProgressTracker>,
    gate: ReadyGate,
    config: SchedulerConfig,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Spawns the worker pool. Workers take clips off the backlog right away
    /// but hold them until [`JobScheduler::start`] opens the gate.
    pub fn new(
        config: SchedulerConfig,
        processor: Arc<dyn ClipProcessor>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        let (sender, receiver) = async_channel::bounded(config.backlog.max(1));
        let gate = ReadyGate::new();

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    gate.clone(),
                    Arc::clone(&processor),
                    Arc::clone(&progress),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            backlog = config.backlog,
            policy = ?config.policy,
            "🎥 Transcoder pool created"
        );

        Self {
            sender,
            progress,
            gate,
            config,
            workers: Mutex::new(workers),
        }
    }

    /// Lets workers begin launching subprocesses. Fails on a second call.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if !self.gate.open() {
            return Err(SchedulerError::AlreadyStarted);
        }
        info!("🎥 Transcoder started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.gate.is_open()
    }

    /// Enqueues a clip. Only enqueue-time failures are returned; the outcome of
    /// processing is never reported back to the caller.
    pub async fn queue(&self, clip: Clip) -> Result<(), SchedulerError> {
        self.enqueue(clip, self.config.policy).await
    }

    async fn enqueue(&self, clip: Clip, policy: QueuePolicy) -> Result<(), SchedulerError> {
        let clip_id = clip.id;
        self.progress.set(clip_id, QUEUED);

        let sent = match policy {
            QueuePolicy::Block => self
                .sender
                .send(clip)
                .await
                .map_err(|_| SchedulerError::Closed),
            QueuePolicy::Reject => self.sender.try_send(clip).map_err(|e| match e {
                TrySendError::Full(_) => SchedulerError::BacklogFull {
                    capacity: self.config.backlog,
                },
                TrySendError::Closed(_) => SchedulerError::Closed,
            }),
        };

        match &sent {
            Ok(()) => debug!(clip_id, "Clip queued for transcoding"),
            Err(e) => {
                self.progress.remove(clip_id);
                warn!(clip_id, error = %e, "Failed to queue clip");
            }
        }

        sent
    }

    pub fn progress(&self, clip_id: i64) -> Option<i32> {
        self.progress.get(clip_id)
    }

    /// Clips waiting in the backlog, excluding those a worker already holds.
    pub fn backlog_len(&self) -> usize {
        self.sender.len()
    }

    /// Re-queues every clip still marked as processing. Such clips were cut
    /// off by a previous shutdown or crash and restart from the thumbnail
    /// stage. Recovery always waits for backlog space instead of rejecting.
    pub async fn recover_orphans(&self, clips: &dyn ClipStore) -> Result<usize, SchedulerError> {
        let orphans = clips.find_processing().await?;
        let count = orphans.len();

        for clip in orphans {
            self.enqueue(clip, QueuePolicy::Block).await?;
        }

        if count > 0 {
            info!(count, "♻️ Re-queued orphaned clips");
        }
        Ok(count)
    }

    /// Closes the backlog and waits up to `grace` for workers to finish the
    /// clip they hold. Clips left in the backlog are picked up by recovery on
    /// the next start.
    pub async fn shutdown(&self, grace: Duration) {
        self.sender.close();

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let joined = tokio::time::timeout(grace, futures_util::future::join_all(workers)).await;
        if joined.is_err() {
            warn!("Transcode workers did not finish within the shutdown grace period");
        } else {
            info!("Transcode workers stopped");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

async fn run_worker(
    worker: usize,
    receiver: Receiver<Clip>,
    gate: ReadyGate,
    processor: Arc<dyn ClipProcessor>,
    progress: Arc<ProgressTracker>,
) {
    debug!(worker, "Transcode worker started");

    while let Ok(clip) = receiver.recv().await {
        if receiver.is_closed() {
            break;
        }

        gate.wait().await;

        let clip_id = clip.id;
        let handle = ProgressHandle::new(Arc::clone(&progress), clip_id);

        let outcome = AssertUnwindSafe(processor.process(&clip, handle.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => info!(worker, clip_id, "✅ Clip processed"),
            Ok(Err(e)) => error!(
                worker,
                clip_id,
                error = %e,
                "❌ Clip processing failed, leaving it for recovery"
            ),
            Err(payload) => error!(
                worker,
                clip_id,
                panic = panic_message(payload.as_ref()),
                "Panic while processing clip"
            ),
        }

        handle.clear();
    }

    debug!(worker, "Transcode worker stopped");
}
