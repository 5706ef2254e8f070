use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    config::SupervisorConfig,
    error::SupervisorError,
    policy::RestartPolicy,
    status::{StatusReader, StatusSnapshot, WorkerStatus},
    supervisor::{Supervisor, WorkerDefinition},
    worker::WorkerBody,
    WorkerId,
};

/// Builds a `Supervisor` instance with configurable parameters.
///
/// Workers are registered once here; the set is fixed for the lifetime of the
/// supervisor.
pub struct SupervisorBuilder {
    workers: Vec<WorkerDefinition>,
    config: SupervisorConfig,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl SupervisorBuilder {
    /// Creates a new builder with default configuration values.
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            config: SupervisorConfig::default(),
            status_tx: watch::Sender::new(StatusSnapshot::default()),
        }
    }

    /// Registers a worker under `id`. Status is reported in registration order.
    pub fn with_worker(mut self, id: &str, body: impl WorkerBody) -> Self {
        self.workers.push(WorkerDefinition {
            id: id.into(),
            body: Arc::new(body),
        });
        self
    }

    /// Reader for the status of the supervisor about to be built, so workers
    /// that report status (an HTTP route, say) can be registered with it.
    pub fn status_reader(&self) -> StatusReader {
        StatusReader::new(self.status_tx.subscribe())
    }

    /// Sets the interval between health checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets how long a worker may go without a heartbeat before it is stale.
    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.config.staleness_window = window;
        self
    }

    /// Sets how long shutdown waits for workers before aborting them.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.config.restart_policy = policy;
        self
    }

    /// Sets the pause before a failed supervision loop is rebuilt.
    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.config.recovery_delay = delay;
        self
    }

    /// Replaces every timing at once.
    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Constructs the `Supervisor`, rejecting duplicate worker ids and timings
    /// the loop cannot run with (a zero poll interval or staleness window).
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        self.config.validate()?;
        if let Some(duplicate) = first_duplicate(&self.workers) {
            return Err(SupervisorError::DuplicateWorker(duplicate));
        }
        self.status_tx.send_replace(StatusSnapshot {
            workers: self
                .workers
                .iter()
                .map(|worker| WorkerStatus::registered(worker.id.clone()))
                .collect(),
        });
        Ok(Supervisor {
            definitions: self.workers,
            config: self.config,
            status_tx: self.status_tx,
        })
    }
}

fn first_duplicate(workers: &[WorkerDefinition]) -> Option<WorkerId> {
    let mut seen = HashSet::new();
    workers
        .iter()
        .find(|&worker| !seen.insert(worker.id.as_str()))
        .map(|worker| worker.id.clone())
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
