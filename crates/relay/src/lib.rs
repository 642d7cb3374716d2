pub mod api;
pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod rooms;
pub mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::auth::jwt::JwtSessionService;
use crate::config::RelayConfig;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    REQUEST_ID_HEADER,
};
use crate::metrics::RelayMetrics;
use crate::rooms::{RoomChannel, RoomHub};

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Shared handles every router needs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub jwt: Arc<JwtSessionService>,
    pub rooms: Arc<dyn RoomChannel>,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> anyhow::Result<Self> {
        let rooms: Arc<dyn RoomChannel> = Arc::new(RoomHub::new(config.room_channel_capacity));
        Self::with_rooms(config, rooms)
    }

    pub fn with_rooms(config: RelayConfig, rooms: Arc<dyn RoomChannel>) -> anyhow::Result<Self> {
        let jwt = JwtSessionService::with_ttl(&config.jwt_secret, config.session_ttl_seconds)
            .context("invalid relay JWT configuration")?;
        Ok(Self {
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            rooms,
            metrics: Arc::new(RelayMetrics::default()),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors::cors_layer(state.config.cors_origins.as_deref());
    let metrics_state = Arc::clone(&state.metrics);

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(metrics_router(state.clone()))
            .merge(ws::router(state.clone()))
            .merge(api::router(state)),
        metrics_state,
    )
    .layer(cors)
}

fn metrics_router(state: AppState) -> Router {
    Router::new().route("/metrics", get(render_metrics)).with_state(state)
}

fn apply_middleware(router: Router, metrics: Arc<RelayMetrics>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(metrics, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::set_global_metrics(Arc::clone(&state.metrics));
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server exited unexpectedly")
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render_prometheus(state.rooms.rooms().len());
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(
    State(metrics): State<Arc<RelayMetrics>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    // Downstream handlers (the WebSocket upgrade) read the id from headers.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics.record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, AppState, MAX_REQUEST_BODY_BYTES};
    use crate::{config::RelayConfig, metrics::RelayMetrics};

    fn test_router() -> Router {
        build_router(AppState::new(RelayConfig::default()).expect("state should build"))
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn request_id_is_echoed_back() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-abc")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-abc");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let router = test_router();
        let _ = router
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("relay_request_rate_total{method=\"GET\",endpoint=\"/healthz\"} 1"));
        assert!(body.contains("relay_live_rooms 0"));
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(
            Router::new().route("/panic", get(panic_route)),
            Arc::new(RelayMetrics::default()),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(
            Router::new().route("/echo", post(echo)),
            Arc::new(RelayMetrics::default()),
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
