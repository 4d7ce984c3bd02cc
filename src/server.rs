use crate::api::stats;
use crate::ingest::handler::{collect, AppState, BeaconTimeout};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes.
///
/// `request_timeout` bounds each request, including the storage call behind it.
/// `/collect` is not cut off by the timeout layer: the handler bounds its own
/// write and still answers with the pixel.
pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    // The pixel is embedded on arbitrary third-party pages
    let beacon_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let beacon_routes = Router::new()
        .route("/collect", get(collect))
        .layer(Extension(BeaconTimeout(request_timeout)))
        .layer(beacon_cors);

    let api_routes = Router::new()
        .route("/websites/{id}/stats", get(stats::get_website_stats))
        .route(
            "/websites/{id}/breakdown/{dimension}",
            get(stats::get_breakdown),
        )
        .route("/system/stats", get(stats::get_system_stats))
        .route("/system/trend", get(stats::get_system_trend));

    let timed_routes = Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api", api_routes)
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ));

    Router::new()
        .merge(beacon_routes)
        .merge(timed_routes)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// GET /health — Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed — Reference data and storage status.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    let reference = state.recorder.reference();
    let geo = reference.geo();
    let offset_minutes = state.recorder.offset().local_minus_utc() / 60;

    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "geo_ranges": geo.len(),
        "geo_loaded": !geo.is_empty(),
        "referrer_rules": reference.rules().len(),
        "utc_offset_minutes": offset_minutes,
    }))
}

/// GET /metrics — Prometheus-compatible metrics endpoint.
async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    use std::fmt::Write;

    let counters = &state.counters;
    let received = counters.beacons_received.load(Ordering::Relaxed);
    let rejected = counters.beacons_rejected.load(Ordering::Relaxed);
    let created = counters.visits_created.load(Ordering::Relaxed);
    let repeats = counters.repeat_hits.load(Ordering::Relaxed);
    let geo_ranges = u64::try_from(state.recorder.reference().geo().len()).unwrap_or(u64::MAX);

    let mut out = String::with_capacity(1024);
    let mut metric = |name: &str, kind: &str, help: &str, value: u64| {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {kind}");
        let _ = writeln!(out, "{name} {value}");
    };
    metric(
        "visitstat_beacons_received_total",
        "counter",
        "Beacons received since startup",
        received,
    );
    metric(
        "visitstat_beacons_rejected_total",
        "counter",
        "Beacons that did not produce a write",
        rejected,
    );
    metric(
        "visitstat_visits_created_total",
        "counter",
        "New visit records created",
        created,
    );
    metric(
        "visitstat_repeat_hits_total",
        "counter",
        "Same-day repeat hits added to existing visit records",
        repeats,
    );
    metric(
        "visitstat_geo_ranges",
        "gauge",
        "Rows in the loaded geo range table",
        geo_ranges,
    );

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::recorder::VisitRecorder;
    use crate::ingest::reference::ReferenceData;
    use crate::storage::store::{VisitStore, Website};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn make_test_state() -> Arc<AppState> {
        let store = VisitStore::open(None).unwrap();
        store
            .register_website(&Website {
                id: 1,
                name: "Example".to_string(),
                url: "https://example.com".to_string(),
                owner_id: 1,
                is_public: true,
                start_time: (Utc::now() - ChronoDuration::days(10)).naive_utc(),
            })
            .unwrap();
        let recorder = VisitRecorder::new(
            store,
            Arc::new(ReferenceData::default()),
            FixedOffset::east_opt(0).unwrap(),
        );
        Arc::new(AppState::new(recorder, 7))
    }

    fn app(state: Arc<AppState>) -> Router {
        build_router(state, Duration::from_secs(30))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get_body(app(make_test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_detailed_health_check() {
        let (status, body) = get_body(app(make_test_state()), "/health/detailed").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["geo_loaded"], false);
        assert_eq!(json["referrer_rules"], 5);
    }

    #[tokio::test]
    async fn test_collect_always_returns_pixel() {
        let state = make_test_state();
        for uri in [
            "/collect?id=1",
            "/collect?id=abc",
            "/collect?id=999",
            "/collect",
        ] {
            let response = app(Arc::clone(&state))
                .oneshot(
                    Request::builder()
                        .uri(uri)
                        .header("x-forwarded-for", "1.2.3.4")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            assert_eq!(response.headers()["content-type"], "image/gif");
            assert_eq!(response.headers()["cache-control"], "no-store");
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(body.len(), 43);
        }
        assert_eq!(state.counters.beacons_received.load(Ordering::Relaxed), 4);
        assert_eq!(state.counters.beacons_rejected.load(Ordering::Relaxed), 3);
        assert_eq!(state.counters.visits_created.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_collect_then_stats() {
        let state = make_test_state();
        for _ in 0..3 {
            app(Arc::clone(&state))
                .oneshot(
                    Request::builder()
                        .uri("/collect?id=1&referer=https%3A%2F%2Fwww.bing.com%2Fsearch%3Fq%3Dduck&width=1280&height=720&color=24&lang=en-US")
                        .header("x-forwarded-for", "5.6.7.8")
                        .header("user-agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
        }
        assert_eq!(state.counters.repeat_hits.load(Ordering::Relaxed), 2);

        let (status, body) = get_body(app(Arc::clone(&state)), "/api/websites/1/stats").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["today"]["unique_visitors"], 1);
        assert_eq!(json["today"]["page_views"], 3);
        assert_eq!(json["online"]["last_15_min"], 1);
        assert_eq!(json["new_visitors"], 1);
        assert_eq!(json["days_since_start"], 10);

        let (status, body) = get_body(
            app(Arc::clone(&state)),
            "/api/websites/1/breakdown/search_engine?period=today",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["value"], "Bing");
        assert_eq!(json[0]["page_views"], 3);

        let (_, body) = get_body(app(state), "/api/websites/1/breakdown/os").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["value"], "Windows 10");
    }

    #[tokio::test]
    async fn test_stats_unknown_website() {
        let (status, _) = get_body(app(make_test_state()), "/api/websites/42/stats").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_non_numeric_id() {
        let (status, _) = get_body(app(make_test_state()), "/api/websites/abc/stats").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_breakdown_unknown_dimension() {
        let (status, _) =
            get_body(app(make_test_state()), "/api/websites/1/breakdown/pathname").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_system_trend() {
        let (status, body) = get_body(app(make_test_state()), "/api/system/trend?days=4").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 4);

        let (status, _) = get_body(app(make_test_state()), "/api/system/trend?days=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_system_stats_uses_configured_trend() {
        let (status, body) = get_body(app(make_test_state()), "/api/system/stats").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["trend"].as_array().unwrap().len(), 7);
        assert_eq!(json["total"]["unique_visitors"], 0);
    }

    #[tokio::test]
    async fn test_prometheus_metrics() {
        let (status, body) = get_body(app(make_test_state()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("visitstat_beacons_received_total 0"));
        assert!(text.contains("# TYPE visitstat_visits_created_total counter"));
        assert!(text.contains("visitstat_geo_ranges 0"));
    }

    #[tokio::test]
    async fn test_collect_answers_pixel_when_storage_is_slow() {
        let state = make_test_state();
        let conn = Arc::clone(state.recorder.store().conn());
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();

        let response = build_router(Arc::clone(&state), Duration::from_millis(100))
            .oneshot(
                Request::builder()
                    .uri("/collect?id=1")
                    .header("x-forwarded-for", "1.2.3.4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/gif");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), 43);
        assert_eq!(state.counters.beacons_rejected.load(Ordering::Relaxed), 1);
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_api_still_times_out_when_storage_is_slow() {
        let state = make_test_state();
        let conn = Arc::clone(state.recorder.store().conn());
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();

        let (status, _) = get_body(
            build_router(Arc::clone(&state), Duration::from_millis(100)),
            "/api/system/stats",
        )
        .await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, _) = get_body(app(make_test_state()), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_collect_cors() {
        let response = app(make_test_state())
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/collect")
                    .header("origin", "https://example.com")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
