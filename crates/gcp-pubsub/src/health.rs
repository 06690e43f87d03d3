//! `GET /status` endpoint reporting listener liveness.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;

use crate::liveness::{Liveness, LivenessStatus};

const SECOND_MS: u128 = 1_000;
const MINUTE_MS: u128 = 60 * SECOND_MS;
const HOUR_MS: u128 = 60 * MINUTE_MS;
const DAY_MS: u128 = 24 * HOUR_MS;
/// Elapsed times below this are still reported in hours.
const HOURS_LIMIT_MS: u128 = 60 * HOUR_MS;

/// Render an elapsed time in the largest whole unit below its threshold,
/// e.g. `"12 seconds"`, `"3 hours"`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    let (value, unit) = if ms < SECOND_MS {
        (ms, "milliseconds")
    } else if ms < MINUTE_MS {
        (ms / SECOND_MS, "seconds")
    } else if ms < HOUR_MS {
        (ms / MINUTE_MS, "minutes")
    } else if ms < HOURS_LIMIT_MS {
        (ms / HOUR_MS, "hours")
    } else {
        (ms / DAY_MS, "days")
    };
    format!("{value} {unit}")
}

/// Only `GET /status` is routed; any other method or path is a 404.
pub fn router(liveness: Arc<Liveness>) -> Router {
    Router::new()
        .route("/status", get(status).fallback(not_found))
        .fallback(not_found)
        .with_state(liveness)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn status(State(liveness): State<Arc<Liveness>>) -> (StatusCode, String) {
    match liveness.status() {
        LivenessStatus::Starting => (StatusCode::OK, "no message received yet".to_string()),
        LivenessStatus::Healthy { idle } => (
            StatusCode::OK,
            format!("last ping {} ago", format_elapsed(idle)),
        ),
        LivenessStatus::Stale { idle } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("last ping {} ago", format_elapsed(idle)),
        ),
    }
}

/// Serve the status endpoint on an already-bound listener until the task is
/// dropped.
pub async fn serve(listener: TcpListener, liveness: Arc<Liveness>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "health endpoint listening");
    }
    axum::serve(listener, router(liveness)).await
}
