use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Linear restart back-off with a ceiling.
///
/// `delay = min(base + failures * step, max)`. There is no limit on the number of
/// attempts: a worker is restarted for as long as the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    base: Duration,
    step: Duration,
    max: Duration,
}

impl RestartPolicy {
    pub const fn new(base: Duration, step: Duration, max: Duration) -> Self {
        Self { base, step, max }
    }

    /// Wait before the next restart, given the failures counted so far.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        self.step
            .saturating_mul(consecutive_failures)
            .saturating_add(self.base)
            .min(self.max)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_STEP_DELAY, DEFAULT_MAX_DELAY)
    }
}
