use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{error::SupervisorError, supervisor::ShutdownReport};

/// Runs supervision incarnations until one of them completes a shutdown.
///
/// Each incarnation runs as its own task. When one fails, with an error or a
/// panic, its workers are torn down with it and a fresh incarnation is built
/// after `recovery_delay`. The loop only ends through shutdown: if an
/// incarnation fails once shutdown has been requested, nothing is rebuilt and
/// `abandon` produces the report.
pub(crate) async fn run_with_recovery<F, Fut, A>(
    shutdown: CancellationToken,
    recovery_delay: Duration,
    mut incarnation: F,
    abandon: A,
) -> ShutdownReport
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ShutdownReport, SupervisorError>> + Send + 'static,
    A: FnOnce() -> ShutdownReport,
{
    let mut attempt: u32 = 0;
    loop {
        match tokio::spawn(incarnation(attempt)).await {
            Ok(Ok(report)) => return report,
            Ok(Err(e)) => error!(error = %e, attempt, "supervisor loop failed"),
            Err(e) => error!(error = %e, attempt, "supervisor loop panicked"),
        }

        if shutdown.is_cancelled() {
            error!(attempt, "supervisor loop failed during shutdown, not rebuilding it");
            return abandon();
        }
        attempt = attempt.saturating_add(1);

        // A shutdown requested while waiting is served by the next incarnation,
        // which stops right away instead of starting workers.
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(recovery_delay) => {}
        }
        info!(attempt, "rebuilding supervisor loop");
    }
}
