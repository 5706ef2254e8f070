use thiserror::Error;

use crate::WorkerId;

/// Error a worker body ends with. The supervisor logs it and treats the exit as a crash.
pub type WorkerError = anyhow::Error;

pub type WorkerResult = Result<(), WorkerError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("worker `{0}` is registered more than once")]
    DuplicateWorker(WorkerId),
    #[error("supervisor message channel closed")]
    ChannelClosed,
    #[error("invalid supervisor configuration: {0}")]
    InvalidConfig(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorHandleError {
    #[error("supervisor exited without reporting a shutdown outcome")]
    SupervisorGone,
}
