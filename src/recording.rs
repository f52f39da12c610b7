#![forbid(unsafe_code)]

// Recording - room composite recordings started and stopped through the service's
// egress API, guarded so a room never records twice.

use crate::analytics::clock::Clock;
use crate::metrics::ServerMetrics;
use crate::server::AppServer;
use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock as StdRwLock};
use thiserror::Error;
use tracing::{error, info};

pub const RECORDING_LAYOUT: &str = "speaker";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("Missing roomName parameter")]
    MissingRoomName,

    #[error("Meeting is already being recorded")]
    AlreadyRecording,

    #[error("No active recording found")]
    NoActiveRecording,

    #[error("Egress not found: {0}")]
    EgressNotFound(String),

    #[error("Egress service error: {0}")]
    Service(String),
}

impl RecordingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RecordingError::MissingRoomName => StatusCode::BAD_REQUEST,
            RecordingError::AlreadyRecording => StatusCode::CONFLICT,
            RecordingError::NoActiveRecording => StatusCode::NOT_FOUND,
            RecordingError::EgressNotFound(_) | RecordingError::Service(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RecordingError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressStatus {
    Starting,
    Active,
    Ending,
    Complete,
    Failed,
    Aborted,
}

impl EgressStatus {
    /// Starting and active egresses count as a recording in progress.
    pub fn is_active(self) -> bool {
        matches!(self, EgressStatus::Starting | EgressStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressInfo {
    pub egress_id: String,
    pub room_name: String,
    pub status: EgressStatus,
    pub filepath: String,
    pub layout: String,
    pub started_at: DateTime<Utc>,
}

/// The service's recording API.
#[async_trait]
pub trait EgressService: Send + Sync {
    async fn list_egress(&self, room: &str) -> Result<Vec<EgressInfo>, RecordingError>;

    async fn start_room_composite(
        &self,
        room: &str,
        filepath: &str,
        layout: &str,
    ) -> Result<EgressInfo, RecordingError>;

    async fn stop_egress(&self, egress_id: &str) -> Result<EgressInfo, RecordingError>;
}

/// In-process egress that only tracks recording state.
#[derive(Default)]
pub struct LocalEgress {
    egresses: StdRwLock<Vec<EgressInfo>>,
}

impl LocalEgress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EgressService for LocalEgress {
    async fn list_egress(&self, room: &str) -> Result<Vec<EgressInfo>, RecordingError> {
        let egresses = self.egresses.read().unwrap_or_else(|e| e.into_inner());
        Ok(egresses.iter().filter(|e| e.room_name == room).cloned().collect())
    }

    async fn start_room_composite(
        &self,
        room: &str,
        filepath: &str,
        layout: &str,
    ) -> Result<EgressInfo, RecordingError> {
        let info = EgressInfo {
            egress_id: format!("EG_{}", uuid::Uuid::new_v4().simple()),
            room_name: room.to_string(),
            status: EgressStatus::Active,
            filepath: filepath.to_string(),
            layout: layout.to_string(),
            started_at: Utc::now(),
        };
        self.egresses.write().unwrap_or_else(|e| e.into_inner()).push(info.clone());
        Ok(info)
    }

    async fn stop_egress(&self, egress_id: &str) -> Result<EgressInfo, RecordingError> {
        let mut egresses = self.egresses.write().unwrap_or_else(|e| e.into_inner());
        let egress = egresses
            .iter_mut()
            .find(|e| e.egress_id == egress_id)
            .ok_or_else(|| RecordingError::EgressNotFound(egress_id.to_string()))?;
        egress.status = EgressStatus::Complete;
        Ok(egress.clone())
    }
}

#[derive(Clone)]
pub struct RecordingController {
    egress: Arc<dyn EgressService>,
    clock: Arc<dyn Clock>,
    metrics: ServerMetrics,
}

impl RecordingController {
    pub fn new(egress: Arc<dyn EgressService>, clock: Arc<dyn Clock>, metrics: ServerMetrics) -> Self {
        Self { egress, clock, metrics }
    }

    /// Starts recording `room` unless a recording is already in progress.
    pub async fn start(&self, room: &str) -> Result<EgressInfo, RecordingError> {
        let existing = self.egress.list_egress(room).await?;
        if existing.iter().any(|e| e.status.is_active()) {
            return Err(RecordingError::AlreadyRecording);
        }

        let filepath = recording_filepath(self.clock.now(), room);
        let info = self
            .egress
            .start_room_composite(room, &filepath, RECORDING_LAYOUT)
            .await?;
        self.metrics.inc_recordings_started();
        info!("Recording {} started for room {} -> {}", info.egress_id, room, filepath);
        Ok(info)
    }

    /// Stops every active recording of `room`.
    pub async fn stop(&self, room: &str) -> Result<Vec<EgressInfo>, RecordingError> {
        let active: Vec<EgressInfo> = self
            .egress
            .list_egress(room)
            .await?
            .into_iter()
            .filter(|e| e.status.is_active())
            .collect();
        if active.is_empty() {
            return Err(RecordingError::NoActiveRecording);
        }

        let mut stopped = Vec::with_capacity(active.len());
        for egress in &active {
            stopped.push(self.egress.stop_egress(&egress.egress_id).await?);
            self.metrics.inc_recordings_stopped();
        }
        info!("Stopped {} recording(s) for room {}", stopped.len(), room);
        Ok(stopped)
    }
}

/// `<RFC 3339 UTC timestamp>-<room>.mp4`
pub fn recording_filepath(now: DateTime<Utc>, room: &str) -> String {
    format!("{}-{}.mp4", now.to_rfc3339_opts(SecondsFormat::Millis, true), room)
}

#[derive(Debug, Deserialize)]
pub struct RecordParams {
    #[serde(rename = "roomName")]
    pub room_name: Option<String>,
}

fn room_name(params: &RecordParams) -> Result<&str, RecordingError> {
    params
        .room_name
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or(RecordingError::MissingRoomName)
}

fn log_failure(action: &str, e: &RecordingError) {
    if e.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Recording {} error: {}", action, e);
    }
}

/// GET /api/record/start?roomName=
pub async fn start_recording(
    State(server): State<AppServer>,
    Query(params): Query<RecordParams>,
) -> Result<StatusCode, RecordingError> {
    let room = room_name(&params)?;
    server.recording().start(room).await.inspect_err(|e| log_failure("start", e))?;
    Ok(StatusCode::OK)
}

/// GET /api/record/stop?roomName=
pub async fn stop_recording(
    State(server): State<AppServer>,
    Query(params): Query<RecordParams>,
) -> Result<StatusCode, RecordingError> {
    let room = room_name(&params)?;
    server.recording().stop(room).await.inspect_err(|e| log_failure("stop", e))?;
    Ok(StatusCode::OK)
}
