#![forbid(unsafe_code)]

// Webhook ingestion - lifecycle notifications from the hosted service are applied to
// the local room view, which in turn emits roster snapshots to subscribers.

use super::{ConnectionQuality, LocalRoomService, RosterEntry, ServiceError};
use crate::server::AppServer;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WebhookEvent {
    RoomStarted {
        room: String,
        #[serde(default)]
        metadata: Option<String>,
    },
    ParticipantJoined {
        room: String,
        identity: String,
        #[serde(default)]
        metadata: Option<String>,
    },
    ParticipantLeft {
        room: String,
        identity: String,
    },
    ParticipantUpdated {
        room: String,
        identity: String,
        #[serde(default)]
        microphone_enabled: Option<bool>,
        #[serde(default)]
        camera_enabled: Option<bool>,
        #[serde(default)]
        screen_share_enabled: Option<bool>,
        #[serde(default)]
        connection_quality: Option<ConnectionQuality>,
    },
    ChatMessage {
        room: String,
        identity: String,
    },
}

pub fn apply(service: &LocalRoomService, event: WebhookEvent) -> Result<(), ServiceError> {
    match event {
        WebhookEvent::RoomStarted { room, metadata } => {
            service.create_room(&room, metadata);
            Ok(())
        }
        WebhookEvent::ParticipantJoined { room, identity, metadata } => {
            let mut entry = RosterEntry::new(identity);
            entry.metadata = metadata;
            service.join(&room, entry)
        }
        WebhookEvent::ParticipantLeft { room, identity } => service.leave(&room, &identity),
        WebhookEvent::ParticipantUpdated {
            room,
            identity,
            microphone_enabled,
            camera_enabled,
            screen_share_enabled,
            connection_quality,
        } => service.update_media(&room, &identity, |entry| {
            if let Some(v) = microphone_enabled {
                entry.microphone_enabled = v;
            }
            if let Some(v) = camera_enabled {
                entry.camera_enabled = v;
            }
            if let Some(v) = screen_share_enabled {
                entry.screen_share_enabled = v;
            }
            if let Some(q) = connection_quality {
                entry.connection_quality = q;
            }
        }),
        WebhookEvent::ChatMessage { room, identity } => {
            service.chat_message(&room, &identity);
            Ok(())
        }
    }
}

/// POST /api/webhook
/// Protected by optional WEBHOOK_TOKEN (Bearer auth).
pub async fn webhook_handler(
    State(server): State<AppServer>,
    headers: HeaderMap,
    Json(event): Json<WebhookEvent>,
) -> Response {
    if let Some(expected) = server.config().webhook_token.as_deref() {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {expected}") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    debug!("Webhook event: {:?}", event);
    match apply(server.room_service(), event) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!("Webhook event rejected: {}", e);
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{RoomEvent, RoomService};

    fn parse(json: &str) -> WebhookEvent {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_join_update_leave() {
        let service = LocalRoomService::new(16);
        apply(&service, parse(r#"{"event":"room_started","room":"demo","metadata":"{\"creator_identity\":\"h\"}"}"#)).unwrap();
        apply(&service, parse(r#"{"event":"participant_joined","room":"demo","identity":"v"}"#)).unwrap();

        let mut events = service.subscribe();
        apply(&service, parse(r#"{"event":"participant_updated","room":"demo","identity":"v","camera_enabled":true,"connection_quality":"good"}"#)).unwrap();
        match events.recv().await.unwrap() {
            RoomEvent::RosterChanged { roster, .. } => {
                assert!(roster[0].camera_enabled);
                assert!(!roster[0].microphone_enabled);
                assert_eq!(roster[0].connection_quality, ConnectionQuality::Good);
            }
            other => panic!("unexpected event {other:?}"),
        }

        apply(&service, parse(r#"{"event":"participant_left","room":"demo","identity":"v"}"#)).unwrap();
        assert!(service.list_participants("demo").await.unwrap().is_empty());
        assert_eq!(
            service.room_metadata("demo").await.unwrap().as_deref(),
            Some(r#"{"creator_identity":"h"}"#)
        );
    }

    #[test]
    fn test_leave_unknown_room_fails() {
        let service = LocalRoomService::new(4);
        let err = apply(&service, parse(r#"{"event":"participant_left","room":"x","identity":"v"}"#));
        assert_eq!(err, Err(ServiceError::RoomNotFound("x".to_string())));
    }
}
