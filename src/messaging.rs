use tokio::time::Instant;

use crate::WorkerId;

#[derive(Debug, Clone)]
pub(crate) enum SupervisorMessage {
    // Sent by worker bodies to report forward progress
    Heartbeat(Heartbeat),
    // Sent by a restart timer once the back-off elapsed and the previous instance is gone
    Restart(WorkerId),
}

#[derive(Debug, Clone)]
pub(crate) struct Heartbeat {
    pub(crate) worker_id: WorkerId,
    pub(crate) generation: u64,
    pub(crate) timestamp: Instant,
}

impl Heartbeat {
    pub fn new(worker_id: WorkerId, generation: u64) -> Self {
        Self {
            worker_id,
            generation,
            timestamp: Instant::now(),
        }
    }
}
