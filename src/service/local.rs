#![forbid(unsafe_code)]

// In-process room service - holds rooms and participants in memory and echoes
// every change on a broadcast channel, the way the hosted service pushes them.

use super::{ParticipantInfo, RoomEvent, RoomService, RosterEntry, ServiceError, ServiceResult};
use crate::metadata;
use crate::stage::{machine, roles};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Metadata documents larger than this are refused.
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

struct LocalParticipant {
    entry: RosterEntry,
    can_publish: bool,
}

impl LocalParticipant {
    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            identity: self.entry.identity.clone(),
            metadata: self.entry.metadata.clone(),
            can_publish: self.can_publish,
        }
    }
}

#[derive(Default)]
struct LocalRoom {
    metadata: Option<String>,
    /// Join order
    participants: Vec<LocalParticipant>,
}

impl LocalRoom {
    fn find_mut(&mut self, identity: &str) -> Option<&mut LocalParticipant> {
        self.participants.iter_mut().find(|p| p.entry.identity == identity)
    }

    fn roster(&self) -> Vec<RosterEntry> {
        self.participants.iter().map(|p| p.entry.clone()).collect()
    }

    /// Publish permission implied by a participant's metadata in this room.
    fn publish_allowed(&self, entry: &RosterEntry) -> bool {
        let room_meta = metadata::decode_room(self.metadata.as_deref());
        let stage = metadata::decode(entry.metadata.as_deref()).unwrap_or_default().stage;
        machine::can_publish(roles::resolve_member(entry, room_meta.as_ref()), stage)
    }
}

pub struct LocalRoomService {
    rooms: StdRwLock<HashMap<String, LocalRoom>>,
    events: broadcast::Sender<RoomEvent>,
}

impl LocalRoomService {
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            rooms: StdRwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Callers that change room state send while still holding the write lock,
    /// so subscribers see snapshots in the order the changes were made.
    fn publish(&self, event: RoomEvent) {
        // No subscribers is fine; nobody is watching yet.
        if self.events.send(event).is_err() {
            debug!("No subscribers for room event");
        }
    }

    /// Creates a room, or replaces its metadata if it already exists.
    pub fn create_room(&self, room: &str, metadata: Option<String>) {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let entry = rooms.entry(room.to_string()).or_default();
        if entry.metadata.is_none() {
            entry.metadata = metadata;
        }
        info!("Room {} started", room);
    }

    /// Adds a participant, creating the room on first join. Rejoining replaces the entry
    /// but keeps the stored metadata document when the new entry carries none. Publish
    /// permission always follows the resulting metadata.
    pub fn join(&self, room: &str, mut entry: RosterEntry) -> ServiceResult<()> {
        check_metadata_size(entry.metadata.as_deref())?;
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let local_room = rooms.entry(room.to_string()).or_default();

        let existing_metadata = local_room
            .find_mut(&entry.identity)
            .and_then(|existing| existing.entry.metadata.take());
        if entry.metadata.is_none() {
            entry.metadata = existing_metadata;
        }
        let can_publish = local_room.publish_allowed(&entry);

        match local_room.find_mut(&entry.identity) {
            Some(existing) => {
                debug!("Participant {} rejoined room {}", entry.identity, room);
                existing.entry = entry;
                existing.can_publish = can_publish;
            }
            None => {
                info!("Participant {} joined room {}", entry.identity, room);
                local_room.participants.push(LocalParticipant { entry, can_publish });
            }
        }
        let roster = local_room.roster();
        self.publish(RoomEvent::RosterChanged { room: room.to_string(), roster });
        Ok(())
    }

    pub fn leave(&self, room: &str, identity: &str) -> ServiceResult<()> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let local_room = rooms
            .get_mut(room)
            .ok_or_else(|| ServiceError::RoomNotFound(room.to_string()))?;
        let before = local_room.participants.len();
        local_room.participants.retain(|p| p.entry.identity != identity);
        if local_room.participants.len() == before {
            return Err(ServiceError::ParticipantNotFound(identity.to_string()));
        }
        info!("Participant {} left room {}", identity, room);
        let roster = local_room.roster();
        self.publish(RoomEvent::RosterChanged { room: room.to_string(), roster });
        Ok(())
    }

    /// Updates the media flags of a present participant and pushes a fresh roster.
    pub fn update_media(
        &self,
        room: &str,
        identity: &str,
        apply: impl FnOnce(&mut RosterEntry),
    ) -> ServiceResult<()> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let local_room = rooms
            .get_mut(room)
            .ok_or_else(|| ServiceError::RoomNotFound(room.to_string()))?;
        let participant = local_room
            .find_mut(identity)
            .ok_or_else(|| ServiceError::ParticipantNotFound(identity.to_string()))?;
        apply(&mut participant.entry);
        let roster = local_room.roster();
        self.publish(RoomEvent::RosterChanged { room: room.to_string(), roster });
        Ok(())
    }

    pub fn chat_message(&self, room: &str, identity: &str) {
        self.publish(RoomEvent::ChatMessage {
            room: room.to_string(),
            identity: identity.to_string(),
        });
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn total_participant_count(&self) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.values().map(|r| r.participants.len()).sum()
    }
}

fn check_metadata_size(metadata: Option<&str>) -> ServiceResult<()> {
    match metadata {
        Some(m) if m.len() > MAX_METADATA_BYTES => Err(ServiceError::MetadataTooLarge(m.len())),
        _ => Ok(()),
    }
}

#[async_trait]
impl RoomService for LocalRoomService {
    async fn room_metadata(&self, room: &str) -> ServiceResult<Option<String>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms
            .get(room)
            .map(|r| r.metadata.clone())
            .ok_or_else(|| ServiceError::RoomNotFound(room.to_string()))
    }

    async fn participant(&self, room: &str, identity: &str) -> ServiceResult<ParticipantInfo> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        let local_room = rooms
            .get(room)
            .ok_or_else(|| ServiceError::RoomNotFound(room.to_string()))?;
        local_room
            .participants
            .iter()
            .find(|p| p.entry.identity == identity)
            .map(LocalParticipant::info)
            .ok_or_else(|| ServiceError::ParticipantNotFound(identity.to_string()))
    }

    async fn list_participants(&self, room: &str) -> ServiceResult<Vec<ParticipantInfo>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        let local_room = rooms
            .get(room)
            .ok_or_else(|| ServiceError::RoomNotFound(room.to_string()))?;
        Ok(local_room.participants.iter().map(LocalParticipant::info).collect())
    }

    async fn update_participant(
        &self,
        room: &str,
        identity: &str,
        expected: Option<&str>,
        metadata: String,
        can_publish: bool,
    ) -> ServiceResult<ParticipantInfo> {
        check_metadata_size(Some(&metadata))?;
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let local_room = rooms
            .get_mut(room)
            .ok_or_else(|| ServiceError::RoomNotFound(room.to_string()))?;
        let participant = local_room
            .find_mut(identity)
            .ok_or_else(|| ServiceError::ParticipantNotFound(identity.to_string()))?;
        if participant.entry.metadata.as_deref() != expected {
            return Err(ServiceError::MetadataConflict(identity.to_string()));
        }
        participant.entry.metadata = Some(metadata);
        participant.can_publish = can_publish;
        let info = participant.info();
        self.publish(RoomEvent::ParticipantMetadataChanged {
            room: room.to_string(),
            identity: identity.to_string(),
            metadata: info.metadata.clone(),
        });
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_publishes_full_roster() {
        let service = LocalRoomService::new(16);
        let mut events = service.subscribe();

        service.join("demo", RosterEntry::new("alice")).unwrap();
        service.join("demo", RosterEntry::new("bob")).unwrap();

        let _first = events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            RoomEvent::RosterChanged { room, roster } => {
                assert_eq!(room, "demo");
                let ids: Vec<_> = roster.iter().map(|e| e.identity.as_str()).collect();
                assert_eq!(ids, vec!["alice", "bob"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_participant_echoes_metadata() {
        let service = LocalRoomService::new(16);
        service.join("demo", RosterEntry::new("v")).unwrap();
        let mut events = service.subscribe();

        let info = service
            .update_participant("demo", "v", None, r#"{"hand_raised":true}"#.to_string(), false)
            .await
            .unwrap();
        assert_eq!(info.metadata.as_deref(), Some(r#"{"hand_raised":true}"#));

        assert_eq!(
            events.recv().await.unwrap(),
            RoomEvent::ParticipantMetadataChanged {
                room: "demo".to_string(),
                identity: "v".to_string(),
                metadata: Some(r#"{"hand_raised":true}"#.to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_room_and_participant() {
        let service = LocalRoomService::new(4);
        assert_eq!(
            service.participant("nope", "x").await,
            Err(ServiceError::RoomNotFound("nope".to_string()))
        );
        service.create_room("demo", None);
        assert_eq!(
            service.participant("demo", "x").await,
            Err(ServiceError::ParticipantNotFound("x".to_string()))
        );
        assert!(service.leave("demo", "x").is_err());
    }

    #[tokio::test]
    async fn test_oversized_metadata_rejected() {
        let service = LocalRoomService::new(4);
        service.join("demo", RosterEntry::new("v")).unwrap();
        let huge = "x".repeat(MAX_METADATA_BYTES + 1);
        let result = service.update_participant("demo", "v", None, huge, false).await;
        assert!(matches!(result, Err(ServiceError::MetadataTooLarge(_))));
    }

    #[tokio::test]
    async fn test_rejoin_keeps_publish_permission_in_line_with_metadata() {
        let service = LocalRoomService::new(16);
        service.create_room("demo", Some(r#"{"creator_identity":"h"}"#.to_string()));
        service.join("demo", RosterEntry::new("v")).unwrap();
        let on_stage = r#"{"hand_raised":true,"invited_to_stage":true}"#;
        service
            .update_participant("demo", "v", None, on_stage.to_string(), true)
            .await
            .unwrap();

        // Reconnecting without a document keeps the stored one and its permission.
        service.join("demo", RosterEntry::new("v")).unwrap();
        let info = service.participant("demo", "v").await.unwrap();
        assert_eq!(info.metadata.as_deref(), Some(on_stage));
        assert!(info.can_publish);

        let mut idle = RosterEntry::new("v");
        idle.metadata = Some(r#"{"hand_raised":false,"invited_to_stage":false}"#.to_string());
        service.join("demo", idle).unwrap();
        let info = service.participant("demo", "v").await.unwrap();
        assert!(!info.can_publish);

        service.join("demo", RosterEntry::new("h")).unwrap();
        assert!(service.participant("demo", "h").await.unwrap().can_publish);
        service.join("demo", RosterEntry::new("w")).unwrap();
        assert!(!service.participant("demo", "w").await.unwrap().can_publish);
    }

    #[tokio::test]
    async fn test_update_with_stale_metadata_conflicts() {
        let service = LocalRoomService::new(16);
        service.join("demo", RosterEntry::new("v")).unwrap();
        let raised = r#"{"hand_raised":true}"#;
        service
            .update_participant("demo", "v", None, raised.to_string(), false)
            .await
            .unwrap();

        let result = service
            .update_participant("demo", "v", None, r#"{"invited_to_stage":true}"#.to_string(), false)
            .await;
        assert_eq!(result, Err(ServiceError::MetadataConflict("v".to_string())));
        let info = service.participant("demo", "v").await.unwrap();
        assert_eq!(info.metadata.as_deref(), Some(raised));
    }

    #[test]
    fn test_concurrent_changes_publish_in_order() {
        let service = LocalRoomService::new(4096);
        let mut events = service.subscribe();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let service = &service;
                scope.spawn(move || {
                    for round in 0..50 {
                        let identity = format!("p{worker}-{round}");
                        service.join("demo", RosterEntry::new(identity.clone())).unwrap();
                        if round % 2 == 0 {
                            service.leave("demo", &identity).unwrap();
                        }
                    }
                });
            }
        });

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            if let RoomEvent::RosterChanged { roster, .. } = event {
                last = Some(roster);
            }
        }
        let delivered: Vec<String> = last.unwrap().into_iter().map(|e| e.identity).collect();
        let rooms = service.rooms.read().unwrap();
        let current: Vec<String> = rooms["demo"].roster().into_iter().map(|e| e.identity).collect();
        assert_eq!(delivered, current);
        assert_eq!(current.len(), 8 * 25);
    }

    #[test]
    fn test_room_metadata_set_once() {
        let service = LocalRoomService::new(4);
        service.create_room("demo", Some("first".to_string()));
        service.create_room("demo", Some("second".to_string()));
        let rooms = service.rooms.read().unwrap();
        assert_eq!(rooms["demo"].metadata.as_deref(), Some("first"));
    }
}
