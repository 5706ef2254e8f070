pub(crate) mod builder;
pub(crate) mod handle;
pub(crate) mod recovery;

use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::{
    config::SupervisorConfig,
    error::{SupervisorError, SupervisorHandleError},
    health::{HealthMonitor, HealthVerdict},
    messaging::{Heartbeat, SupervisorMessage},
    signals::wait_for_shutdown_signal,
    status::{StatusReader, StatusSnapshot},
    supervisor::handle::SupervisorHandle,
    worker::{WorkerBody, WorkerContext, WorkerHandle, WorkerState},
    WorkerId,
};

/// Outcome of a completed shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every registered worker, all of them now stopped.
    pub stopped: Vec<WorkerId>,
    /// Workers that ignored the stop request and were aborted after the grace period.
    pub forced: Vec<WorkerId>,
}

impl ShutdownReport {
    pub fn is_degraded(&self) -> bool {
        !self.forced.is_empty()
    }
}

/// A registered worker, kept so a failed loop can be rebuilt from scratch.
#[derive(Clone)]
pub(crate) struct WorkerDefinition {
    pub(crate) id: WorkerId,
    pub(crate) body: Arc<dyn WorkerBody>,
}

/// Keeps a fixed set of workers alive until shutdown.
///
/// Built with [`SupervisorBuilder`](crate::SupervisorBuilder). Each worker runs as its own
/// Tokio task. The health monitor polls every worker on a fixed interval and
/// any crashed or stale worker is restarted after a back-off computed by the
/// [`RestartPolicy`](crate::RestartPolicy). Restarts never give up.
pub struct Supervisor {
    pub(crate) definitions: Vec<WorkerDefinition>,
    pub(crate) config: SupervisorConfig,
    pub(crate) status_tx: watch::Sender<StatusSnapshot>,
}

impl Supervisor {
    /// Starts every worker and the supervision loop, returning a handle for
    /// status queries and shutdown.
    pub fn run(self) -> SupervisorHandle {
        let shutdown = CancellationToken::new();
        let status = StatusReader::new(self.status_tx.subscribe());
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let status_tx = Arc::new(self.status_tx);
        let definitions = Arc::new(self.definitions);
        let config = self.config;
        let token = shutdown.clone();

        tokio::spawn(async move {
            let abandon = {
                let definitions = Arc::clone(&definitions);
                let status_tx = Arc::clone(&status_tx);
                move || abandoned_shutdown(&definitions, &status_tx)
            };
            let report = recovery::run_with_recovery(
                token.clone(),
                config.recovery_delay,
                move |incarnation| {
                    let supervision = SupervisionLoop::new(
                        &definitions,
                        config,
                        token.clone(),
                        Arc::clone(&status_tx),
                    );
                    async move { supervision.run(incarnation).await }
                },
                abandon,
            )
            .await;
            outcome_tx.send_replace(Some(report));
        });

        SupervisorHandle::new(shutdown, status, outcome_rx)
    }

    /// Runs until SIGINT, SIGTERM or SIGQUIT (ctrl-c off Unix), then shuts
    /// everything down. Signals received while the shutdown is in progress are
    /// ignored.
    pub async fn run_until_signal(self) -> Result<ShutdownReport, SupervisorHandleError> {
        let handle = self.run();
        let signals = handle.clone();
        let listener = tokio::spawn(async move {
            loop {
                if let Err(e) = wait_for_shutdown_signal().await {
                    error!(error = %e, "failed to install signal handlers");
                    return;
                }
                if signals.request_shutdown() {
                    info!("termination signal received, shutting down");
                } else {
                    debug!("termination signal received, shutdown already in progress");
                }
            }
        });

        let report = handle.wait().await;
        listener.abort();
        report
    }
}

/// Report for a shutdown whose supervision loop failed midway. Dropping the
/// failed loop already aborted every body it owned, so all of them count as
/// forced.
fn abandoned_shutdown(
    definitions: &[WorkerDefinition],
    status_tx: &watch::Sender<StatusSnapshot>,
) -> ShutdownReport {
    status_tx.send_modify(|snapshot| {
        for worker in snapshot.workers.iter_mut() {
            worker.state = WorkerState::Stopped;
        }
    });
    let stopped: Vec<WorkerId> = definitions.iter().map(|definition| definition.id.clone()).collect();
    warn!(workers = ?stopped, "supervisor loop lost during shutdown, workers were aborted");
    ShutdownReport {
        forced: stopped.clone(),
        stopped,
    }
}

/// One incarnation of the supervision loop: a registry built from scratch, the
/// health monitor and the restart machinery.
pub(crate) struct SupervisionLoop {
    registry: Vec<WorkerHandle>,
    config: SupervisorConfig,
    monitor: HealthMonitor,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    rx: mpsc::UnboundedReceiver<SupervisorMessage>,
    status_tx: Arc<watch::Sender<StatusSnapshot>>,
    shutdown: CancellationToken,
    // Parent of every worker stop token and restart timer of this incarnation.
    incarnation: CancellationToken,
    _incarnation_guard: DropGuard,
}

impl SupervisionLoop {
    pub(crate) fn new(
        definitions: &[WorkerDefinition],
        config: SupervisorConfig,
        shutdown: CancellationToken,
        status_tx: Arc<watch::Sender<StatusSnapshot>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let incarnation = shutdown.child_token();

        // Counters survive a rebuild so operators still see runaway restarts.
        let previous = status_tx.borrow().clone();
        let registry = definitions
            .iter()
            .map(|definition| {
                let mut handle = WorkerHandle::new(definition.id.clone(), Arc::clone(&definition.body));
                if let Some(status) = previous.get(&definition.id) {
                    handle.total_restarts = status.total_restarts;
                    handle.last_seen_alive = status.last_seen_alive;
                }
                handle
            })
            .collect();

        Self {
            registry,
            config,
            monitor: HealthMonitor::new(config.staleness_window),
            tx,
            rx,
            status_tx,
            shutdown,
            _incarnation_guard: incarnation.clone().drop_guard(),
            incarnation,
        }
    }

    /// Supervises until shutdown is requested, then stops every worker.
    pub(crate) async fn run(mut self, incarnation: u32) -> Result<ShutdownReport, SupervisorError> {
        if !self.shutdown.is_cancelled() {
            info!(workers = self.registry.len(), incarnation, "supervisor starting");
            self.start_all_workers();
        }

        let mut health_check = interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        health_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    return Ok(self.shutdown_all_workers().await);
                }
                msg = self.rx.recv() => match msg {
                    Some(SupervisorMessage::Heartbeat(heartbeat)) => self.register_heartbeat(heartbeat),
                    Some(SupervisorMessage::Restart(worker_id)) => self.restart_worker(&worker_id),
                    None => return Err(SupervisorError::ChannelClosed),
                },
                _ = health_check.tick() => {
                    self.check_all_health();
                }
            }
        }
    }

    fn start_all_workers(&mut self) {
        for handle in self.registry.iter_mut() {
            Self::start_worker(handle, self.tx.clone(), &self.incarnation);
        }
        self.publish();
    }

    /// Spawns a new instance of the worker's body. The previous instance, if
    /// any, must already be gone.
    fn start_worker(
        handle: &mut WorkerHandle,
        tx: mpsc::UnboundedSender<SupervisorMessage>,
        parent: &CancellationToken,
    ) {
        handle.generation += 1;
        let token = parent.child_token();
        let ctx = WorkerContext::new(handle.id.clone(), handle.generation, tx, token.clone());
        let body = Arc::clone(&handle.body);
        let worker_id = handle.id.clone();

        let join_handle = tokio::spawn(async move {
            match body.run(ctx).await {
                Ok(()) => debug!(worker = %worker_id, "worker body returned"),
                Err(e) => error!(worker = %worker_id, error = %e, "worker body failed"),
            }
        });

        handle.stop_token = Some(token);
        handle.join_handle = Some(join_handle);
        handle.started_at = Some(Instant::now());
        handle.mark(WorkerState::Starting);
        info!(worker = %handle.id, generation = handle.generation, "worker started");
    }

    fn register_heartbeat(&mut self, heartbeat: Heartbeat) {
        let Some(handle) = self
            .registry
            .iter_mut()
            .find(|handle| handle.id == heartbeat.worker_id)
        else {
            return;
        };
        if handle.generation != heartbeat.generation || !handle.state.is_monitored() {
            return;
        }

        handle.last_seen_alive = Some(
            handle
                .last_seen_alive
                .map_or(heartbeat.timestamp, |seen| seen.max(heartbeat.timestamp)),
        );
        if handle.state == WorkerState::Starting {
            handle.mark(WorkerState::Running);
            handle.consecutive_failures = 0;
            info!(worker = %handle.id, generation = handle.generation, "worker running");
        }
        self.publish();
    }

    /// Evaluates every monitored worker, in registration order, and schedules a
    /// restart for each one that crashed or went stale.
    fn check_all_health(&mut self) {
        let now = Instant::now();
        let mut changed = false;

        for index in 0..self.registry.len() {
            let handle = &self.registry[index];
            if !handle.state.is_monitored() {
                continue;
            }
            let verdict = self.monitor.evaluate(handle, now);
            if verdict.needs_restart() {
                self.schedule_restart(index, verdict);
                changed = true;
            }
        }

        debug!(status = %self.summary(), "health check");
        if changed {
            self.publish();
        }
    }

    /// Moves a worker to `Restarting` and spawns its restart timer. The timer
    /// waits for the back-off and for the previous instance to be gone, so a
    /// slow or hung worker never delays its siblings.
    fn schedule_restart(&mut self, index: usize, verdict: HealthVerdict) {
        let handle = &mut self.registry[index];
        let delay = self.config.restart_policy.next_delay(handle.consecutive_failures);
        handle.consecutive_failures = handle.consecutive_failures.saturating_add(1);
        handle.total_restarts = handle.total_restarts.saturating_add(1);
        handle.mark(WorkerState::Restarting);
        let previous = handle.take_execution();

        warn!(
            worker = %handle.id,
            %verdict,
            failures = handle.consecutive_failures,
            delay_secs = delay.as_secs_f64(),
            "worker unhealthy, scheduling restart"
        );

        let tx = self.tx.clone();
        let token = self.incarnation.clone();
        let worker_id = handle.id.clone();
        tokio::spawn(async move {
            let retire = async {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
            };
            tokio::select! {
                _ = token.cancelled() => {}
                _ = async { tokio::join!(tokio::time::sleep(delay), retire) } => {
                    let _ = tx.send(SupervisorMessage::Restart(worker_id));
                }
            }
        });
    }

    fn restart_worker(&mut self, worker_id: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let Some(handle) = self.registry.iter_mut().find(|handle| handle.id == worker_id) else {
            return;
        };
        if handle.state != WorkerState::Restarting {
            return;
        }
        info!(worker = %handle.id, failures = handle.consecutive_failures, "restarting worker");
        Self::start_worker(handle, self.tx.clone(), &self.incarnation);
        self.publish();
    }

    /// Asks every worker to stop, waits for them up to the grace period, aborts
    /// the rest and marks everything stopped.
    async fn shutdown_all_workers(&mut self) -> ShutdownReport {
        let grace = self.config.grace_period;
        info!(grace_secs = grace.as_secs_f64(), "shutting down workers");

        // Pending restart timers are children of the incarnation token.
        self.incarnation.cancel();
        for handle in self.registry.iter() {
            if let Some(token) = &handle.stop_token {
                token.cancel();
            }
        }

        let deadline = Instant::now() + grace;
        let mut forced = Vec::new();
        for handle in self.registry.iter_mut() {
            if let Some(mut join_handle) = handle.join_handle.take() {
                if tokio::time::timeout_at(deadline, &mut join_handle).await.is_err() {
                    join_handle.abort();
                    warn!(worker = %handle.id, "worker ignored stop request, aborting it");
                    forced.push(handle.id.clone());
                } else {
                    debug!(worker = %handle.id, "worker stopped");
                }
            }
            handle.stop_token = None;
            handle.mark(WorkerState::Stopped);
        }
        self.publish();

        let report = ShutdownReport {
            stopped: self.registry.iter().map(|handle| handle.id.clone()).collect(),
            forced,
        };
        if report.is_degraded() {
            warn!(forced = ?report.forced, "degraded shutdown, some workers had to be aborted");
        } else {
            info!("all workers stopped");
        }
        report
    }

    fn publish(&self) {
        self.status_tx.send_replace(StatusSnapshot {
            workers: self.registry.iter().map(WorkerHandle::status).collect(),
        });
    }

    fn summary(&self) -> String {
        self.registry
            .iter()
            .map(|handle| format!("{}: {}", handle.id, handle.state))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::{pause, sleep};

    use super::*;
    use crate::{policy::RestartPolicy, status::WorkerStatus, WorkerResult};

    #[derive(Default)]
    struct Instances {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    struct Active(Arc<Instances>);

    impl Drop for Active {
        fn drop(&mut self) {
            self.0.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Fails on its very first run, across incarnations; beats every second afterwards.
    struct FlakyWorker(Arc<Instances>);

    #[async_trait]
    impl WorkerBody for FlakyWorker {
        async fn run(&self, ctx: WorkerContext) -> WorkerResult {
            let run = self.0.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max_active.fetch_max(active, Ordering::SeqCst);
            let _active = Active(Arc::clone(&self.0));
            if run == 1 {
                anyhow::bail!("first run fails");
            }
            while !ctx.is_stopping() {
                ctx.beat();
                tokio::select! {
                    _ = ctx.stopped() => {}
                    _ = sleep(Duration::from_secs(1)) => {}
                }
            }
            Ok(())
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_secs(1),
            staleness_window: Duration::from_secs(5),
            grace_period: Duration::from_secs(2),
            recovery_delay: Duration::from_secs(1),
            restart_policy: RestartPolicy::default(),
        }
    }

    fn definitions(instances: &Arc<Instances>) -> Arc<Vec<WorkerDefinition>> {
        Arc::new(vec![WorkerDefinition {
            id: "flaky".into(),
            body: Arc::new(FlakyWorker(Arc::clone(instances))),
        }])
    }

    #[tokio::test]
    async fn rebuilt_loop_keeps_counters_and_replaces_the_old_instances() {
        pause();
        let instances = Arc::new(Instances::default());
        let definitions = definitions(&instances);
        let status_tx = Arc::new(watch::Sender::new(StatusSnapshot::default()));
        let status = StatusReader::new(status_tx.subscribe());
        let shutdown = CancellationToken::new();
        let config = config();

        let supervisor = tokio::spawn({
            let definitions = Arc::clone(&definitions);
            let status_tx = Arc::clone(&status_tx);
            let shutdown = shutdown.clone();
            async move {
                recovery::run_with_recovery(
                    shutdown.clone(),
                    config.recovery_delay,
                    move |attempt| {
                        let supervision = SupervisionLoop::new(
                            &definitions,
                            config,
                            shutdown.clone(),
                            Arc::clone(&status_tx),
                        );
                        async move {
                            if attempt > 0 {
                                return supervision.run(attempt).await;
                            }
                            // The first incarnation dies at 15s, with its worker running.
                            tokio::time::timeout(Duration::from_secs(15), supervision.run(attempt))
                                .await
                                .unwrap_or(Err(SupervisorError::ChannelClosed))
                        }
                    },
                    ShutdownReport::default,
                )
                .await
            }
        });

        // Crash at 0s, seen at the 1s poll, restarted 10s later.
        sleep(Duration::from_secs(14)).await;
        let before = status.worker("flaky").unwrap();
        assert_eq!(before.state, WorkerState::Running);
        assert_eq!(before.total_restarts, 1);
        assert_eq!(instances.runs.load(Ordering::SeqCst), 2);

        // The failed incarnation took its worker down with it.
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(instances.active.load(Ordering::SeqCst), 0);
        let survived = status.worker("flaky").unwrap();
        assert_eq!(survived.total_restarts, 1);
        let last_seen = survived.last_seen_alive;
        assert!(last_seen.is_some());

        let rebuilt = SupervisionLoop::new(
            &definitions,
            config,
            CancellationToken::new(),
            Arc::clone(&status_tx),
        );
        assert_eq!(rebuilt.registry[0].total_restarts, 1);
        assert_eq!(rebuilt.registry[0].last_seen_alive, last_seen);
        drop(rebuilt);

        // The next incarnation starts at 16s and picks up where the last one left off.
        sleep(Duration::from_secs(3)).await;
        let after = status.worker("flaky").unwrap();
        assert_eq!(after.state, WorkerState::Running);
        assert_eq!(after.total_restarts, 1);
        assert_eq!(after.consecutive_failures, 0);
        assert!(after.last_seen_alive > last_seen);
        assert_eq!(instances.runs.load(Ordering::SeqCst), 3);
        assert_eq!(instances.active.load(Ordering::SeqCst), 1);
        assert_eq!(instances.max_active.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        let report = supervisor.await.unwrap();
        assert_eq!(report.stopped, vec!["flaky".to_string()]);
        assert!(!report.is_degraded());
        assert_eq!(instances.active.load(Ordering::SeqCst), 0);
        assert!(status.snapshot().all_stopped());
    }

    #[tokio::test]
    async fn abandoned_shutdown_marks_everything_stopped() {
        let instances = Arc::new(Instances::default());
        let definitions = definitions(&instances);
        let status_tx = watch::Sender::new(StatusSnapshot {
            workers: vec![WorkerStatus {
                total_restarts: 4,
                ..WorkerStatus::registered("flaky".into())
            }],
        });

        let report = abandoned_shutdown(&definitions, &status_tx);

        assert_eq!(report.stopped, vec!["flaky".to_string()]);
        assert_eq!(report.forced, vec!["flaky".to_string()]);
        let snapshot = status_tx.borrow().clone();
        assert!(snapshot.all_stopped());
        assert_eq!(snapshot.workers[0].total_restarts, 4);
    }
}
