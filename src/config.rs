use std::time::Duration;

use crate::{error::SupervisorError, policy::RestartPolicy};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(1);

/// Timing knobs shared by every incarnation of the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// How often the health monitor evaluates every worker.
    pub poll_interval: Duration,
    /// A running worker with no heartbeat for longer than this is stale.
    pub staleness_window: Duration,
    /// How long shutdown waits for workers to stop on their own.
    pub grace_period: Duration,
    /// Pause before a failed supervisor loop is rebuilt.
    pub recovery_delay: Duration,
    pub restart_policy: RestartPolicy,
}

impl SupervisorConfig {
    /// Rejects timings the supervision loop cannot run with.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.poll_interval.is_zero() {
            return Err(SupervisorError::InvalidConfig("poll interval must be non-zero"));
        }
        if self.staleness_window.is_zero() {
            return Err(SupervisorError::InvalidConfig(
                "staleness window must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            staleness_window: DEFAULT_STALENESS_WINDOW,
            grace_period: DEFAULT_GRACE_PERIOD,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            restart_policy: RestartPolicy::default(),
        }
    }
}
