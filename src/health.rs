//! Liveness evaluation of supervised workers.
//!
//! Workers are polled rather than trusted to report failures: the only thing a
//! body is required to do is beat, so the monitor looks at two facts per
//! worker, whether its execution unit is still running and when it last made
//! progress.

use std::time::Duration;

use tokio::time::Instant;

use crate::worker::WorkerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Still executing, but no heartbeat within the staleness window.
    Stale,
    /// The execution unit ended without being asked to stop.
    Crashed,
}

impl HealthVerdict {
    pub fn needs_restart(&self) -> bool {
        !matches!(self, HealthVerdict::Healthy)
    }
}

impl std::fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Stale => write!(f, "stale"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HealthMonitor {
    staleness_window: Duration,
}

impl HealthMonitor {
    pub(crate) fn new(staleness_window: Duration) -> Self {
        Self { staleness_window }
    }

    pub(crate) fn evaluate(&self, handle: &WorkerHandle, now: Instant) -> HealthVerdict {
        if handle.has_exited() && !handle.stop_requested() {
            return HealthVerdict::Crashed;
        }
        if !handle.is_alive(self.staleness_window, now) {
            return HealthVerdict::Stale;
        }
        HealthVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::time::{advance, pause};

    use super::*;
    use crate::{WorkerBody, WorkerContext, WorkerResult};

    struct Noop;

    #[async_trait]
    impl WorkerBody for Noop {
        async fn run(&self, _ctx: WorkerContext) -> WorkerResult {
            Ok(())
        }
    }

    fn running_handle(join: tokio::task::JoinHandle<()>) -> WorkerHandle {
        let mut handle = WorkerHandle::new("worker".into(), Arc::new(Noop));
        handle.join_handle = Some(join);
        handle.stop_token = Some(tokio_util::sync::CancellationToken::new());
        handle.started_at = Some(Instant::now());
        handle
    }

    #[tokio::test]
    async fn fresh_worker_is_healthy() {
        pause();
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let handle = running_handle(tokio::spawn(std::future::pending()));
        assert_eq!(monitor.evaluate(&handle, Instant::now()), HealthVerdict::Healthy);
    }

    #[tokio::test]
    async fn silent_worker_goes_stale_after_the_window() {
        pause();
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let mut handle = running_handle(tokio::spawn(std::future::pending()));

        advance(Duration::from_secs(20)).await;
        handle.last_seen_alive = Some(Instant::now());
        advance(Duration::from_secs(30)).await;
        assert_eq!(monitor.evaluate(&handle, Instant::now()), HealthVerdict::Healthy);

        advance(Duration::from_millis(1)).await;
        assert_eq!(monitor.evaluate(&handle, Instant::now()), HealthVerdict::Stale);
    }

    #[tokio::test]
    async fn finished_worker_has_crashed() {
        pause();
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let handle = running_handle(tokio::spawn(async {}));
        while !handle.has_exited() {
            tokio::task::yield_now().await;
        }
        let verdict = monitor.evaluate(&handle, Instant::now());
        assert_eq!(verdict, HealthVerdict::Crashed);
        assert!(verdict.needs_restart());
    }

    #[tokio::test]
    async fn finished_worker_that_was_asked_to_stop_has_not_crashed() {
        pause();
        let monitor = HealthMonitor::new(Duration::from_secs(30));
        let handle = running_handle(tokio::spawn(async {}));
        if let Some(token) = &handle.stop_token {
            token.cancel();
        }
        while !handle.has_exited() {
            tokio::task::yield_now().await;
        }
        assert_ne!(monitor.evaluate(&handle, Instant::now()), HealthVerdict::Crashed);
    }
}
