//! Keep-alive pinger: a periodic HTTP GET against a fixed endpoint.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::Empty;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    worker::{WorkerBody, WorkerContext},
    WorkerResult,
};

#[derive(Debug, Error)]
pub enum PingError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[source] hyper::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),
    #[error("request failed: {0}")]
    Request(#[source] hyper::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one `GET http://{address}{path}` and returns the response status.
pub async fn ping(address: &str, path: &str, timeout: Duration) -> Result<StatusCode, PingError> {
    let uri = format!("http://{address}{path}");

    let probe = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(PingError::Connect)?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(PingError::Handshake)?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "keep-alive connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", concat!("worker-supervisor/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())?;

        let resp = sender.send_request(req).await.map_err(PingError::Request)?;
        Ok::<_, PingError>(resp.status())
    };

    tokio::time::timeout(timeout, probe)
        .await
        .map_err(|_| PingError::Timeout(timeout))?
}

/// Worker body pinging an HTTP endpoint every `interval` so the hosting
/// platform sees traffic. Failed pings are logged, never fatal.
pub struct KeepAlivePinger {
    address: String,
    path: String,
    interval: Duration,
    timeout: Duration,
    beat_interval: Duration,
}

impl KeepAlivePinger {
    pub fn new(address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            beat_interval: Duration::from_secs(10),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Heartbeats are sent at least this often, between pings too.
    pub fn with_beat_interval(mut self, beat_interval: Duration) -> Self {
        self.beat_interval = beat_interval;
        self
    }

    async fn ping_once(&self) {
        match ping(&self.address, &self.path, self.timeout).await {
            Ok(status) if status.is_success() => {
                info!(address = %self.address, path = %self.path, "keep-alive ping successful")
            }
            Ok(status) => {
                warn!(address = %self.address, path = %self.path, %status, "keep-alive ping returned non-success status")
            }
            Err(e) => {
                warn!(address = %self.address, path = %self.path, error = %e, "keep-alive ping failed")
            }
        }
    }
}

#[async_trait]
impl WorkerBody for KeepAlivePinger {
    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        info!(
            address = %self.address,
            interval_secs = self.interval.as_secs_f64(),
            "keep-alive pinger starting"
        );
        let mut ticker = tokio::time::interval(self.beat_interval);
        let mut next_ping = Instant::now();

        loop {
            tokio::select! {
                _ = ctx.stopped() => {
                    info!("keep-alive pinger stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            if Instant::now() >= next_ping {
                let ping = self.ping_once();
                tokio::pin!(ping);
                // A slow remote must not make the pinger itself look hung.
                loop {
                    tokio::select! {
                        _ = ctx.stopped() => {
                            info!("keep-alive pinger stopped");
                            return Ok(());
                        }
                        _ = &mut ping => break,
                        _ = ticker.tick() => ctx.beat(),
                    }
                }
                next_ping = Instant::now() + self.interval;
            }
            ctx.beat();
        }
    }
}
