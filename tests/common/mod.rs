#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use worker_supervisor::{SupervisorBuilder, WorkerBody, WorkerContext, WorkerResult};

pub const POLL: Duration = Duration::from_secs(1);
pub const STALENESS: Duration = Duration::from_secs(5);
pub const GRACE: Duration = Duration::from_secs(2);

// Builder with short timings; the restart policy keeps its defaults (10s + 5s * n, max 120s).
pub fn builder() -> SupervisorBuilder {
    SupervisorBuilder::new()
        .with_poll_interval(POLL)
        .with_staleness_window(STALENESS)
        .with_grace_period(GRACE)
        .with_recovery_delay(Duration::from_millis(100))
}

/// Counts live instances of a body; decremented even when the instance is aborted.
#[derive(Clone, Default)]
pub struct Instances {
    pub runs: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub starts: Arc<Mutex<Vec<Instant>>>,
}

impl Instances {
    pub fn enter(&self) -> ActiveGuard {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().push(Instant::now());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        ActiveGuard {
            active: self.active.clone(),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }
}

pub struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn beat_until_stopped(ctx: &WorkerContext, every: Duration) {
    loop {
        ctx.beat();
        tokio::select! {
            _ = ctx.stopped() => return,
            _ = tokio::time::sleep(every) => {}
        }
    }
}

/// Beats every second and stops when asked.
#[derive(Clone, Default)]
pub struct BeatingWorker {
    pub instances: Instances,
}

#[async_trait]
impl WorkerBody for BeatingWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        beat_until_stopped(&ctx, Duration::from_secs(1)).await;
        Ok(())
    }
}

/// Fails right away on every run, without ever beating.
#[derive(Clone, Default)]
pub struct CrashingWorker {
    pub instances: Instances,
}

#[async_trait]
impl WorkerBody for CrashingWorker {
    async fn run(&self, _ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        Err(anyhow::anyhow!("connection refused"))
    }
}

/// Fails on its first run, beats normally afterwards.
#[derive(Clone, Default)]
pub struct CrashOnceWorker {
    pub instances: Instances,
}

#[async_trait]
impl WorkerBody for CrashOnceWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        if ctx.generation() == 1 {
            anyhow::bail!("first run fails");
        }
        beat_until_stopped(&ctx, Duration::from_secs(1)).await;
        Ok(())
    }
}

/// Panics on its first run, beats normally afterwards.
#[derive(Clone, Default)]
pub struct PanicOnceWorker {
    pub instances: Instances,
}

#[async_trait]
impl WorkerBody for PanicOnceWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        if ctx.generation() == 1 {
            panic!("first run panics");
        }
        beat_until_stopped(&ctx, Duration::from_secs(1)).await;
        Ok(())
    }
}

/// Keeps running but never beats; honours stop requests.
#[derive(Clone, Default)]
pub struct SilentWorker {
    pub instances: Instances,
}

#[async_trait]
impl WorkerBody for SilentWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        ctx.stopped().await;
        Ok(())
    }
}

/// First run beats `beats` times, one second apart, then hangs without
/// checking for stop requests. Later runs beat normally unless `always` is set.
#[derive(Clone, Default)]
pub struct StallingWorker {
    pub instances: Instances,
    pub beats: usize,
    pub always: bool,
}

#[async_trait]
impl WorkerBody for StallingWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        if ctx.generation() == 1 || self.always {
            for _ in 0..self.beats {
                ctx.beat();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            std::future::pending::<()>().await;
        }
        beat_until_stopped(&ctx, Duration::from_secs(1)).await;
        Ok(())
    }
}

/// Beats forever and ignores stop requests.
#[derive(Clone, Default)]
pub struct StubbornWorker {
    pub instances: Instances,
}

#[async_trait]
impl WorkerBody for StubbornWorker {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let _guard = self.instances.enter();
        loop {
            ctx.beat();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
