use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    error::WorkerResult,
    messaging::{Heartbeat, SupervisorMessage},
    status::WorkerStatus,
    WorkerId,
};

/// A long-running unit of work kept alive by the supervisor.
///
/// `run` is called once per (re)start with a fresh [`WorkerContext`]. Returning,
/// with `Ok` or `Err`, or panicking ends the execution unit; unless the
/// supervisor asked the body to stop, that counts as a crash and the body is
/// started again after a back-off.
///
/// Bodies must report forward progress with [`WorkerContext::beat`] more often
/// than the staleness window, otherwise they are considered hung and replaced.
/// They should also watch [`WorkerContext::stopped`] and return promptly once it
/// resolves: bodies that ignore it are aborted when the shutdown grace period
/// runs out.
///
/// Blocking calls belong in `tokio::task::spawn_blocking`; an execution unit
/// that never yields cannot be superseded or aborted.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use worker_supervisor::{WorkerBody, WorkerContext, WorkerResult};
///
/// struct Ticker;
///
/// #[async_trait]
/// impl WorkerBody for Ticker {
///     async fn run(&self, ctx: WorkerContext) -> WorkerResult {
///         loop {
///             ctx.beat();
///             tokio::select! {
///                 _ = ctx.stopped() => return Ok(()),
///                 _ = tokio::time::sleep(Duration::from_secs(5)) => {}
///             }
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerBody: Send + Sync + 'static {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult;
}

/// Everything a worker body gets from its supervisor for one run.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker_id: WorkerId,
    generation: u64,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    stop: CancellationToken,
}

impl WorkerContext {
    pub(crate) fn new(
        worker_id: WorkerId,
        generation: u64,
        tx: mpsc::UnboundedSender<SupervisorMessage>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            worker_id,
            generation,
            tx,
            stop,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// How many times this worker has been started, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports forward progress to the supervisor.
    pub fn beat(&self) {
        let beat = Heartbeat::new(self.worker_id.clone(), self.generation);
        // A closed channel means the supervisor loop is gone; the body is about to be torn down.
        let _ = self.tx.send(SupervisorMessage::Heartbeat(beat));
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once the supervisor asks this body to stop.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// The stop signal as a token, for libraries that take one.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Body spawned, no heartbeat seen yet.
    Starting,
    Running,
    /// Waiting out the back-off before the next start.
    Restarting,
    Stopped,
}

impl WorkerState {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerState::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, WorkerState::Stopped)
    }

    /// Whether the health monitor looks at a worker in this state.
    pub(crate) fn is_monitored(&self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Supervisor-side bookkeeping for one registered worker.
pub(crate) struct WorkerHandle {
    pub(crate) id: WorkerId,
    pub(crate) body: Arc<dyn WorkerBody>,
    pub(crate) state: WorkerState,
    pub(crate) generation: u64,
    pub(crate) join_handle: Option<JoinHandle<()>>,
    pub(crate) stop_token: Option<CancellationToken>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) last_seen_alive: Option<Instant>,
    pub(crate) consecutive_failures: u32,
    pub(crate) total_restarts: u64,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId, body: Arc<dyn WorkerBody>) -> Self {
        Self {
            id,
            body,
            state: WorkerState::Starting,
            generation: 0,
            join_handle: None,
            stop_token: None,
            started_at: None,
            last_seen_alive: None,
            consecutive_failures: 0,
            total_restarts: 0,
        }
    }

    pub(crate) fn mark(&mut self, state: WorkerState) {
        self.state = state;
    }

    /// True once the execution unit has returned, failed or panicked. A handle
    /// with no execution unit counts as exited.
    pub(crate) fn has_exited(&self) -> bool {
        self.join_handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_token
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    /// Latest sign of life of the current instance: its last beat, or its start.
    pub(crate) fn last_progress(&self) -> Option<Instant> {
        match (self.started_at, self.last_seen_alive) {
            (Some(started), Some(seen)) => Some(started.max(seen)),
            (started, None) => started,
            (None, seen) => seen,
        }
    }

    /// Execution unit still running and progress seen within `window`.
    pub(crate) fn is_alive(&self, window: Duration, now: Instant) -> bool {
        !self.has_exited()
            && self
                .last_progress()
                .is_some_and(|seen| now.saturating_duration_since(seen) <= window)
    }

    /// Signals the current instance to stop, aborts it and hands back its join
    /// handle so the caller can wait for it to be gone.
    pub(crate) fn take_execution(&mut self) -> Option<JoinHandle<()>> {
        if let Some(token) = self.stop_token.take() {
            token.cancel();
        }
        let handle = self.join_handle.take();
        if let Some(handle) = &handle {
            handle.abort();
        }
        handle
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_restarts: self.total_restarts,
            last_seen_alive: self.last_seen_alive,
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.take_execution();
    }
}
