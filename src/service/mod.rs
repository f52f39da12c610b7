#![forbid(unsafe_code)]

// Service module - interface to the external real-time communication service

pub mod local;
pub mod webhook;

use crate::stage::roles::RosterMember;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalRoomService;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Metadata of {0} changed since it was read")]
    MetadataConflict(String),

    #[error("Metadata too large: {0} bytes")]
    MetadataTooLarge(usize),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A participant as the service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub identity: String,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub can_publish: bool,
}

impl RosterMember for ParticipantInfo {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn raw_metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
    #[default]
    Unknown,
}

/// One participant inside a roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub identity: String,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub microphone_enabled: bool,
    #[serde(default)]
    pub camera_enabled: bool,
    #[serde(default)]
    pub screen_share_enabled: bool,
    #[serde(default)]
    pub connection_quality: ConnectionQuality,
}

impl RosterEntry {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            metadata: None,
            microphone_enabled: false,
            camera_enabled: false,
            screen_share_enabled: false,
            connection_quality: ConnectionQuality::Unknown,
        }
    }
}

impl RosterMember for RosterEntry {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn raw_metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }
}

/// Push notifications from the service. Every roster change carries the full roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    RosterChanged {
        room: String,
        roster: Vec<RosterEntry>,
    },
    ParticipantMetadataChanged {
        room: String,
        identity: String,
        metadata: Option<String>,
    },
    ChatMessage {
        room: String,
        identity: String,
    },
}

impl RoomEvent {
    pub fn room(&self) -> &str {
        match self {
            RoomEvent::RosterChanged { room, .. }
            | RoomEvent::ParticipantMetadataChanged { room, .. }
            | RoomEvent::ChatMessage { room, .. } => room,
        }
    }
}

/// Room and participant operations the stage protocol needs from the service.
#[async_trait]
pub trait RoomService: Send + Sync {
    /// Raw room metadata, `None` when the room has none.
    async fn room_metadata(&self, room: &str) -> ServiceResult<Option<String>>;

    async fn participant(&self, room: &str, identity: &str) -> ServiceResult<ParticipantInfo>;

    async fn list_participants(&self, room: &str) -> ServiceResult<Vec<ParticipantInfo>>;

    /// Replaces a participant's metadata document and publish permission in one call.
    /// Fails with `MetadataConflict` unless the stored document still equals `expected`.
    async fn update_participant(
        &self,
        room: &str,
        identity: &str,
        expected: Option<&str>,
        metadata: String,
        can_publish: bool,
    ) -> ServiceResult<ParticipantInfo>;
}
