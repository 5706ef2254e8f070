use tokio::{sync::watch, time::Instant};

use crate::{worker::WorkerState, WorkerId};

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub state: WorkerState,
    pub consecutive_failures: u32,
    /// Restarts scheduled for this worker since the process started.
    pub total_restarts: u64,
    pub last_seen_alive: Option<Instant>,
}

impl WorkerStatus {
    pub(crate) fn registered(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Starting,
            consecutive_failures: 0,
            total_restarts: 0,
            last_seen_alive: None,
        }
    }
}

/// Every registered worker, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub workers: Vec<WorkerStatus>,
}

impl StatusSnapshot {
    pub fn get(&self, id: &str) -> Option<&WorkerStatus> {
        self.workers.iter().find(|worker| worker.id == id)
    }

    pub fn all_running(&self) -> bool {
        !self.workers.is_empty() && self.workers.iter().all(|worker| worker.state.is_running())
    }

    pub fn all_stopped(&self) -> bool {
        self.workers.iter().all(|worker| worker.state.is_stopped())
    }
}

/// Read side of the status channel.
///
/// Reading never touches the supervisor's own state; it only clones the last
/// published snapshot.
#[derive(Debug, Clone)]
pub struct StatusReader {
    rx: watch::Receiver<StatusSnapshot>,
}

impl StatusReader {
    pub(crate) fn new(rx: watch::Receiver<StatusSnapshot>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    pub fn worker(&self, id: &str) -> Option<WorkerStatus> {
        self.rx.borrow().get(id).cloned()
    }
}
