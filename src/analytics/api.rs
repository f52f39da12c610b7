#![forbid(unsafe_code)]

use super::aggregator::AnalyticsSnapshot;
use crate::server::AppServer;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// GET /api/analytics/{room}
pub async fn room_analytics(
    State(server): State<AppServer>,
    Path(room): Path<String>,
) -> Result<Json<AnalyticsSnapshot>, Response> {
    server.analytics().snapshot(&room).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("No analytics recorded for room {room}") })),
        )
            .into_response()
    })
}
