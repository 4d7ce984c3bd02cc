use crate::ingest::recorder::{Beacon, RecordError, RecordOutcome, VisitRecorder};
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, Extensions, HeaderMap, HeaderName};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 1x1 transparent GIF returned for every beacon.
pub const PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

/// Query string sent by the tracking snippet.
#[derive(Debug, Default, Deserialize)]
pub struct CollectParams {
    pub id: Option<String>,
    #[serde(default)]
    pub referer: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub width: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub lang: String,
}

/// Beacon counters exported on `/metrics`.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub beacons_received: AtomicU64,
    pub beacons_rejected: AtomicU64,
    pub visits_created: AtomicU64,
    pub repeat_hits: AtomicU64,
}

impl IngestCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Upper bound on how long `/collect` waits for its storage write.
#[derive(Debug, Clone, Copy)]
pub struct BeaconTimeout(pub Duration);

/// Shared application state for the beacon and stats handlers.
pub struct AppState {
    pub recorder: VisitRecorder,
    pub counters: IngestCounters,
    /// Length of the trend included in the system overview.
    pub trend_days: u32,
}

impl AppState {
    pub fn new(recorder: VisitRecorder, trend_days: u32) -> Self {
        Self {
            recorder,
            counters: IngestCounters::default(),
            trend_days,
        }
    }
}

type PixelResponse = ([(HeaderName, &'static str); 2], &'static [u8]);

fn pixel() -> PixelResponse {
    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        PIXEL_GIF.as_slice(),
    )
}

/// GET /collect — Tracking pixel endpoint.
///
/// The response is the same pixel whatever happens to the beacon; failures
/// only show up in logs and counters.
pub async fn collect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
    params: Result<Query<CollectParams>, QueryRejection>,
) -> impl IntoResponse {
    IngestCounters::bump(&state.counters.beacons_received);

    let params = match params {
        Ok(Query(p)) => p,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed beacon query string");
            IngestCounters::bump(&state.counters.beacons_rejected);
            return pixel();
        }
    };

    let Some(website_id) = params.id.as_deref().and_then(|id| id.trim().parse::<i64>().ok())
    else {
        tracing::debug!(id = ?params.id, "Beacon with non-numeric website id");
        IngestCounters::bump(&state.counters.beacons_rejected);
        return pixel();
    };

    let socket = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let beacon = Beacon {
        website_id,
        ip: extract_ip(&headers, socket),
        referrer: params.referer,
        location: params.location,
        screen_color: params.color,
        screen_size: screen_size(&params.width, &params.height),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
        language: params.lang,
    };

    let state2 = Arc::clone(&state);
    let task = tokio::task::spawn_blocking(move || state2.recorder.record_visit(&beacon, Utc::now()));
    let result = match extensions.get::<BeaconTimeout>() {
        Some(BeaconTimeout(limit)) => {
            if let Ok(joined) = tokio::time::timeout(*limit, task).await {
                joined
            } else {
                // The write keeps running on the blocking pool
                tracing::warn!(website_id, timeout_ms = limit.as_millis(), "Beacon write timed out");
                IngestCounters::bump(&state.counters.beacons_rejected);
                return pixel();
            }
        }
        None => task.await,
    };

    let counters = &state.counters;
    match result {
        Ok(Ok(RecordOutcome::NewVisit { .. })) => IngestCounters::bump(&counters.visits_created),
        Ok(Ok(RecordOutcome::RepeatHit)) => IngestCounters::bump(&counters.repeat_hits),
        Ok(Err(e @ (RecordError::InvalidInput(_) | RecordError::NotFound(_)))) => {
            tracing::debug!(website_id, error = %e, "Beacon rejected");
            IngestCounters::bump(&counters.beacons_rejected);
        }
        Ok(Err(e)) => {
            tracing::error!(website_id, error = %e, "Failed to record visit");
            IngestCounters::bump(&counters.beacons_rejected);
        }
        Err(e) => {
            tracing::error!(website_id, error = %e, "Record task panicked");
            IngestCounters::bump(&counters.beacons_rejected);
        }
    }

    pixel()
}

/// Extract client IP, preferring proxy headers over the socket address.
fn extract_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .map(str::to_string)
        .or_else(|| socket.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

fn screen_size(width: &str, height: &str) -> String {
    let (width, height) = (width.trim(), height.trim());
    if width.is_empty() && height.is_empty() {
        String::new()
    } else {
        format!("{width}X{height}")
    }
}
