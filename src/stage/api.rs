#![forbid(unsafe_code)]

use crate::auth::jwt;
use crate::server::AppServer;
use crate::service::ParticipantInfo;
use crate::stage::controller::StageError;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct TargetRequest {
    #[serde(default)]
    pub identity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub participant: ParticipantInfo,
}

impl CommandResponse {
    fn ok(participant: ParticipantInfo) -> Json<Self> {
        Json(Self { success: true, participant })
    }
}

// Every failure surfaces as a 500 carrying the error text; callers only distinguish success.
impl IntoResponse for StageError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

fn required(req: &TargetRequest) -> Result<&str, StageError> {
    req.identity
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(StageError::MissingIdentity)
}

fn parse_body(body: &str) -> Result<TargetRequest, StageError> {
    if body.trim().is_empty() {
        return Ok(TargetRequest::default());
    }
    serde_json::from_str(body).map_err(|e| StageError::InvalidRequest(format!("malformed body: {e}")))
}

/// POST /api/raise_hand
/// The body is optional; the caller always acts on itself.
pub async fn raise_hand(
    State(server): State<AppServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ParticipantInfo>, StageError> {
    let session = jwt::session_from_headers(&headers, server.config().jwt_secret.as_deref())?;
    let req = parse_body(&body)?;
    if let Some(identity) = req.identity.as_deref() {
        if identity != session.identity {
            return Err(StageError::Forbidden(
                "Participants can only raise their own hand".to_string(),
            ));
        }
    }
    let participant = server.stage().raise_hand(&session).await?;
    Ok(Json(participant))
}

/// POST /api/invite_to_stage
pub async fn invite_to_stage(
    State(server): State<AppServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<CommandResponse>, StageError> {
    let session = jwt::session_from_headers(&headers, server.config().jwt_secret.as_deref())?;
    let req = parse_body(&body)?;
    let participant = server.stage().invite_to_stage(&session, required(&req)?).await?;
    Ok(CommandResponse::ok(participant))
}

/// POST /api/remove_from_stage
/// Without an identity the caller leaves the stage.
pub async fn remove_from_stage(
    State(server): State<AppServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<CommandResponse>, StageError> {
    let session = jwt::session_from_headers(&headers, server.config().jwt_secret.as_deref())?;
    let req = parse_body(&body)?;
    let participant = server
        .stage()
        .remove_from_stage(&session, req.identity.as_deref().filter(|id| !id.is_empty()))
        .await?;
    Ok(CommandResponse::ok(participant))
}

/// POST /api/lower_hand
pub async fn lower_hand(
    State(server): State<AppServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<CommandResponse>, StageError> {
    let session = jwt::session_from_headers(&headers, server.config().jwt_secret.as_deref())?;
    let req = parse_body(&body)?;
    let participant = server.stage().lower_hand(&session, required(&req)?).await?;
    Ok(CommandResponse::ok(participant))
}
