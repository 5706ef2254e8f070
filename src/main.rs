use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use tracing::{info, warn};
use worker_supervisor::{
    services::{KeepAlivePinger, StatusServer},
    SupervisorBuilder,
};

/// Runs the status web server and the keep-alive pinger under a self-healing supervisor.
#[derive(Parser, Debug)]
#[command(name = "worker-supervisor", version)]
struct Cli {
    /// Address the status web server listens on.
    #[arg(long, env = "SUPERVISOR_BIND", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// host:port the keep-alive pinger sends requests to.
    #[arg(long, env = "SUPERVISOR_PING_ADDR", default_value = "127.0.0.1:5000")]
    ping_addr: String,

    /// Path requested by the keep-alive pinger.
    #[arg(long, env = "SUPERVISOR_PING_PATH", default_value = "/api/status")]
    ping_path: String,

    /// Seconds between keep-alive pings.
    #[arg(long, env = "SUPERVISOR_PING_INTERVAL", default_value = "60")]
    ping_interval: u64,

    /// Seconds before a keep-alive ping is abandoned.
    #[arg(long, env = "SUPERVISOR_PING_TIMEOUT", default_value = "10")]
    ping_timeout: u64,

    /// Seconds between health checks.
    #[arg(long, env = "SUPERVISOR_POLL_INTERVAL", default_value = "30")]
    poll_interval: u64,

    /// Seconds without a heartbeat before a worker is restarted.
    #[arg(long, env = "SUPERVISOR_STALENESS_WINDOW", default_value = "30")]
    staleness_window: u64,

    /// Seconds workers get to stop on shutdown before they are aborted.
    #[arg(long, env = "SUPERVISOR_GRACE_PERIOD", default_value = "10")]
    grace_period: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let staleness_window = Duration::from_secs(cli.staleness_window.max(1));
    // Beat well inside the window so one slow tick never looks like a hang.
    let beat_interval = (staleness_window / 3).max(Duration::from_secs(1));

    let builder = SupervisorBuilder::new()
        .with_poll_interval(Duration::from_secs(cli.poll_interval.max(1)))
        .with_staleness_window(staleness_window)
        .with_grace_period(Duration::from_secs(cli.grace_period));
    let status = builder.status_reader();

    let supervisor = builder
        .with_worker("web", StatusServer::new(cli.bind, status, beat_interval))
        .with_worker(
            "keep-alive",
            KeepAlivePinger::new(cli.ping_addr, cli.ping_path)
                .with_interval(Duration::from_secs(cli.ping_interval.max(1)))
                .with_timeout(Duration::from_secs(cli.ping_timeout.max(1)))
                .with_beat_interval(beat_interval),
        )
        .build()?;

    info!(bind = %cli.bind, "worker supervisor starting");
    let report = supervisor.run_until_signal().await?;
    if report.is_degraded() {
        warn!(forced = ?report.forced, "stopped after aborting unresponsive workers");
    } else {
        info!(stopped = ?report.stopped, "all workers stopped");
    }
    Ok(())
}
