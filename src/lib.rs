//! # worker-supervisor
//!
//! `worker-supervisor` keeps a fixed set of long-running Tokio workers alive.
//! Every worker runs as its own task, is polled for liveness on a fixed
//! interval and is restarted with a linear back-off whenever it crashes or
//! stops sending heartbeats. Restarts never give up; the only way out is a
//! shutdown, which stops every worker within a bounded grace period.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use worker_supervisor::{SupervisorBuilder, WorkerBody, WorkerContext, WorkerResult};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl WorkerBody for Printer {
//!     async fn run(&self, ctx: WorkerContext) -> WorkerResult {
//!         loop {
//!             println!("hello");
//!             ctx.beat();
//!             tokio::select! {
//!                 _ = ctx.stopped() => return Ok(()),
//!                 _ = tokio::time::sleep(Duration::from_secs(1)) => {}
//!             }
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = SupervisorBuilder::default()
//!         .with_worker("printer", Printer)
//!         .build()?;
//!
//!     // Runs until SIGINT/SIGTERM, then stops every worker.
//!     let report = supervisor.run_until_signal().await?;
//!     println!("stopped: {:?}", report.stopped);
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle
//!
//! `Starting` → `Running` on the first heartbeat → `Restarting` when the
//! health monitor finds the worker crashed or stale → `Starting` again once
//! the back-off elapsed. `Stopped` is terminal and only reached through
//! shutdown.
//!
//! ## API overview
//!
//! | SupervisorHandle method | Purpose                                                  |
//! | ----------------------- | -------------------------------------------------------- |
//! | `status()`              | Snapshot of every worker, in registration order          |
//! | `worker_status(id)`     | Snapshot of one worker                                   |
//! | `request_shutdown()`    | Start the shutdown; later calls are no-ops               |
//! | `shutdown().await`      | Start the shutdown and wait for the `ShutdownReport`     |
//! | `wait().await`          | Wait for the shutdown to complete                        |

pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorHandleError, WorkerError, WorkerResult};
pub use health::HealthVerdict;
pub use policy::RestartPolicy;
pub use signals::wait_for_shutdown_signal;
pub use status::{StatusReader, StatusSnapshot, WorkerStatus};
pub use supervisor::{
    builder::SupervisorBuilder, handle::SupervisorHandle, ShutdownReport, Supervisor,
};
pub use worker::{WorkerBody, WorkerContext, WorkerState};

pub mod config;
mod error;
mod health;
mod messaging;
pub mod policy;
pub mod services;
mod signals;
mod status;
mod supervisor;
mod worker;

pub type WorkerId = String;
