use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    error::SupervisorHandleError,
    status::{StatusReader, StatusSnapshot, WorkerStatus},
    supervisor::ShutdownReport,
};

/// Control and observation handle of a running [`Supervisor`](crate::Supervisor).
///
/// Cheap to clone; every clone talks to the same supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    shutdown: CancellationToken,
    // Shared by every clone; only the first request flips it.
    requested: Arc<AtomicBool>,
    status: StatusReader,
    outcome: watch::Receiver<Option<ShutdownReport>>,
}

impl SupervisorHandle {
    pub(crate) fn new(
        shutdown: CancellationToken,
        status: StatusReader,
        outcome: watch::Receiver<Option<ShutdownReport>>,
    ) -> Self {
        Self {
            shutdown,
            requested: Arc::new(AtomicBool::new(false)),
            status,
            outcome,
        }
    }

    /// Asks the supervisor to stop every worker. Returns `true` only if this
    /// call started the shutdown; further requests are no-ops.
    pub fn request_shutdown(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Requests shutdown and waits until every worker is stopped, at most the
    /// grace period plus the time to abort the stragglers.
    pub async fn shutdown(&self) -> Result<ShutdownReport, SupervisorHandleError> {
        self.request_shutdown();
        self.wait().await
    }

    /// Waits for the supervisor to finish its shutdown. Any number of callers
    /// may wait, concurrently or one after another.
    pub async fn wait(&self) -> Result<ShutdownReport, SupervisorHandleError> {
        let mut outcome = self.outcome.clone();
        let report = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SupervisorHandleError::SupervisorGone)?;
        (*report).clone().ok_or(SupervisorHandleError::SupervisorGone)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn worker_status(&self, id: &str) -> Option<WorkerStatus> {
        self.status.worker(id)
    }

    /// A reader that can be handed to reporting code, such as an HTTP route.
    pub fn status_reader(&self) -> StatusReader {
        self.status.clone()
    }
}
