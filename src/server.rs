#![forbid(unsafe_code)]

// HTTP server - shared state and the axum router

use crate::analytics::AnalyticsAggregator;
use crate::config::AppConfig;
use crate::metrics::ServerMetrics;
use crate::recording::{self, RecordingController};
use crate::service::{webhook, LocalRoomService};
use crate::stage::{self, StageController};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Server state
#[derive(Clone)]
pub struct AppServer {
    config: Arc<AppConfig>,
    rooms: Arc<LocalRoomService>,
    stage: StageController,
    analytics: AnalyticsAggregator,
    recording: RecordingController,
    metrics: ServerMetrics,
}

impl AppServer {
    pub fn new(
        config: AppConfig,
        rooms: Arc<LocalRoomService>,
        analytics: AnalyticsAggregator,
        recording: RecordingController,
        metrics: ServerMetrics,
    ) -> Self {
        let stage = StageController::new(rooms.clone(), metrics.clone());
        Self {
            config: Arc::new(config),
            rooms,
            stage,
            analytics,
            recording,
            metrics,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn room_service(&self) -> &LocalRoomService {
        &self.rooms
    }

    pub fn stage(&self) -> &StageController {
        &self.stage
    }

    pub fn analytics(&self) -> &AnalyticsAggregator {
        &self.analytics
    }

    pub fn recording(&self) -> &RecordingController {
        &self.recording
    }

    pub fn router(self) -> Router {
        let api_routes = Router::new()
            .route("/raise_hand", post(stage::api::raise_hand))
            .route("/invite_to_stage", post(stage::api::invite_to_stage))
            .route("/remove_from_stage", post(stage::api::remove_from_stage))
            .route("/lower_hand", post(stage::api::lower_hand))
            .route("/record/start", get(recording::start_recording))
            .route("/record/stop", get(recording::stop_recording))
            .route("/analytics/{room}", get(crate::analytics::api::room_analytics))
            .route("/webhook", post(webhook::webhook_handler));

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .nest("/api", api_routes)
            .with_state(self)
            .layer(CorsLayer::permissive())
    }

    /// Starts the HTTP server on the specified port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        info!("Starting HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = self.router();

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Health check handler
async fn health_handler(State(server): State<AppServer>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": server.rooms.room_count(),
        "participants": server.rooms.total_participant_count(),
        "rooms_tracked": server.analytics.rooms_tracked(),
    }))
}

/// Metrics handler, Prometheus text exposition format.
/// Protected by optional METRICS_TOKEN (Bearer auth).
async fn metrics_handler(State(server): State<AppServer>, headers: HeaderMap) -> Response {
    if let Some(expected) = server.config.metrics_token.as_deref() {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {expected}") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let body = server
        .metrics
        .render_prometheus(server.analytics.rooms_tracked(), server.analytics.participants_present());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AggregatorSettings, MemoryStore, SystemClock};
    use crate::auth::jwt;
    use crate::metadata::{self, ParticipantMetadata, RoomMetadata};
    use crate::recording::LocalEgress;
    use crate::service::{RoomService, RosterEntry};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret-at-least-32-bytes-long!!";

    async fn test_server(metrics_token: Option<&str>) -> AppServer {
        let config = AppConfig {
            jwt_secret: Some(SECRET.to_string()),
            metrics_token: metrics_token.map(str::to_string),
            ..AppConfig::default()
        };
        let metrics = ServerMetrics::new();
        let rooms = Arc::new(LocalRoomService::new(64));
        rooms.create_room("demo", Some(metadata::encode_room(&RoomMetadata::new("h"))));
        let mut host = RosterEntry::new("h");
        host.metadata = Some(metadata::encode(&ParticipantMetadata::host()));
        rooms.join("demo", host).unwrap();
        rooms.join("demo", RosterEntry::new("v")).unwrap();
        rooms.join("demo", RosterEntry::new("w")).unwrap();

        let analytics = AnalyticsAggregator::load(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            AggregatorSettings::default(),
            metrics.clone(),
        )
        .await
        .unwrap();
        let recording = RecordingController::new(Arc::new(LocalEgress::new()), Arc::new(SystemClock), metrics.clone());
        AppServer::new(config, rooms, analytics, recording, metrics)
    }

    fn post_as(identity: &str, uri: &str, body: &str) -> Request<Body> {
        let token = jwt::create_token(identity, "demo", SECRET).unwrap();
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stage_flow_over_http() {
        let server = test_server(None).await;
        let app = server.clone().router();

        let resp = app.clone().oneshot(post_as("v", "/api/raise_hand", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let echo: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(echo["identity"], "v");

        let resp = app
            .clone()
            .oneshot(post_as("h", "/api/invite_to_stage", r#"{"identity":"v"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["participant"]["identity"], "v");

        let info = server.room_service().participant("demo", "v").await.unwrap();
        assert!(metadata::decode(info.metadata.as_deref()).unwrap().invited_to_stage());
    }

    #[tokio::test]
    async fn test_unauthorized_invite_is_500_and_leaves_metadata() {
        let server = test_server(None).await;
        let app = server.clone().router();
        app.clone().oneshot(post_as("v", "/api/raise_hand", "")).await.unwrap();
        let before = server.room_service().participant("demo", "v").await.unwrap().metadata;

        let resp = app
            .oneshot(post_as("w", "/api/invite_to_stage", r#"{"identity":"v"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(resp).await.contains("Only the host"));

        let after = server.room_service().participant("demo", "v").await.unwrap().metadata;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let app = test_server(None).await.router();
        let req = Request::builder()
            .method("POST")
            .uri("/api/raise_hand")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_recording_guards() {
        let app = test_server(None).await.router();
        let resp = app.clone().oneshot(get_req("/api/record/start")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app.clone().oneshot(get_req("/api/record/stop?roomName=demo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.clone().oneshot(get_req("/api/record/start?roomName=demo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.clone().oneshot(get_req("/api/record/start?roomName=demo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_text(resp).await, "Meeting is already being recorded");

        let resp = app.oneshot(get_req("/api/record/stop?roomName=demo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_analytics_endpoint() {
        let server = test_server(None).await;
        let app = server.clone().router();

        let resp = app.clone().oneshot(get_req("/api/analytics/demo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        server.analytics().observe_roster("demo", &[RosterEntry::new("v")]).await;
        let resp = app.oneshot(get_req("/api/analytics/demo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["peakConcurrentUsers"], 1);
    }

    #[tokio::test]
    async fn test_metrics_token() {
        let app = test_server(Some("scrape")).await.router();
        let resp = app.clone().oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/metrics")
            .header("authorization", "Bearer scrape")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("stagecast_stage_commands_total"));
    }
}
