//! Health endpoint and keep-alive pinger.
//!
//! Free hosting tiers put idle services to sleep; the pinger requests the
//! public `/health` URL on an interval so the polling loop keeps running.

use crate::transport::Transport;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait after a failed ping
pub const KEEP_ALIVE_RETRY_SECS: u64 = 300;
const PING_TIMEOUT_SECS: u64 = 30;

/// Shared state of the health routes
#[derive(Clone)]
pub struct HealthState {
    started: Instant,
    transport: Arc<dyn Transport>,
}

impl HealthState {
    /// State for a process that started now
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            started: Instant::now(),
            transport,
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    /// Always `ok` while the process serves requests
    pub status: &'static str,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Bot username, once known
    pub bot: Option<String>,
}

async fn health(State(state): State<HealthState>) -> Json<HealthReport> {
    let bot = match state.transport.bot_username().await {
        Ok(username) => Some(username),
        Err(e) => {
            debug!(error = %e, "Bot username unavailable for health report");
            None
        }
    };
    Json(HealthReport {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        bot,
    })
}

/// Routes served by the health server
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves the health routes on `0.0.0.0:port` until `token` is cancelled.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(port: u16, state: HealthState, token: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Health server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("Health server stopped");
    Ok(())
}

/// `<base>/health`, tolerating a trailing slash
#[must_use]
pub fn ping_url(base: &str) -> String {
    format!("{}/health", base.trim_end_matches('/'))
}

/// Requests `<base_url>/health` every `interval`; after a failure the next
/// attempt comes after [`KEEP_ALIVE_RETRY_SECS`].
pub async fn run_keep_alive(base_url: String, interval: Duration, token: CancellationToken) {
    let url = ping_url(&base_url);
    let client = HttpClient::builder()
        .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| HttpClient::new());
    info!(url = %url, interval_secs = interval.as_secs(), "Keep-alive pinger started");

    let mut wait = interval;
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        wait = match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(status = %resp.status(), "Keep-alive ping ok");
                interval
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Keep-alive ping rejected");
                Duration::from_secs(KEEP_ALIVE_RETRY_SECS)
            }
            Err(e) => {
                warn!(error = %e, "Keep-alive ping failed");
                Duration::from_secs(KEEP_ALIVE_RETRY_SECS)
            }
        };
    }
    info!("Keep-alive pinger stopped");
}
