#![forbid(unsafe_code)]

// Stage command handler - the request boundary where callers are authorized before
// any participant document is replaced.

use crate::auth::{AuthError, Session};
use crate::metadata::{self, ParticipantMetadata, RoomMetadata};
use crate::metrics::ServerMetrics;
use crate::service::{ParticipantInfo, RoomService, ServiceError};
use crate::stage::machine::{self, Actor, IllegalTransition, StageEvent};
use crate::stage::roles::{self, Role};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    #[error("{0}")]
    Forbidden(String),

    #[error("Illegal stage transition: {0}")]
    IllegalTransition(#[from] IllegalTransition),

    #[error("Participation is disabled in room {0}")]
    ParticipationDisabled(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Request must name a participant identity")]
    MissingIdentity,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stage state of {0} changed concurrently, retry the request")]
    Conflict(String),

    #[error("Room service error: {0}")]
    Service(String),
}

impl From<ServiceError> for StageError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::RoomNotFound(room) => StageError::RoomNotFound(room),
            ServiceError::ParticipantNotFound(identity) => StageError::ParticipantNotFound(identity),
            ServiceError::MetadataConflict(identity) => StageError::Conflict(identity),
            other => StageError::Service(other.to_string()),
        }
    }
}

/// The four commands exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCommand {
    RaiseHand,
    InviteToStage,
    RemoveFromStage,
    LowerHand,
}

impl StageCommand {
    pub fn name(self) -> &'static str {
        match self {
            StageCommand::RaiseHand => "raise_hand",
            StageCommand::InviteToStage => "invite_to_stage",
            StageCommand::RemoveFromStage => "remove_from_stage",
            StageCommand::LowerHand => "lower_hand",
        }
    }
}

#[derive(Clone)]
pub struct StageController {
    service: Arc<dyn RoomService>,
    metrics: ServerMetrics,
}

impl StageController {
    pub fn new(service: Arc<dyn RoomService>, metrics: ServerMetrics) -> Self {
        Self { service, metrics }
    }

    /// Raises the caller's hand, or accepts a pending invitation.
    pub async fn raise_hand(&self, session: &Session) -> Result<ParticipantInfo, StageError> {
        self.execute(session, StageCommand::RaiseHand, &session.identity).await
    }

    pub async fn invite_to_stage(&self, session: &Session, identity: &str) -> Result<ParticipantInfo, StageError> {
        self.execute(session, StageCommand::InviteToStage, identity).await
    }

    /// Takes `identity` off the stage. Without an identity the caller leaves.
    pub async fn remove_from_stage(
        &self,
        session: &Session,
        identity: Option<&str>,
    ) -> Result<ParticipantInfo, StageError> {
        let target = identity.unwrap_or(&session.identity);
        self.execute(session, StageCommand::RemoveFromStage, target).await
    }

    pub async fn lower_hand(&self, session: &Session, identity: &str) -> Result<ParticipantInfo, StageError> {
        self.execute(session, StageCommand::LowerHand, identity).await
    }

    async fn execute(
        &self,
        session: &Session,
        command: StageCommand,
        target: &str,
    ) -> Result<ParticipantInfo, StageError> {
        let start = Instant::now();
        self.metrics.inc_stage_commands();

        let result = self.apply(session, command, target).await;
        self.metrics.observe_stage_command(start.elapsed());

        if let Err(e) = &result {
            self.metrics.inc_stage_command_failures();
            if matches!(e, StageError::Forbidden(_) | StageError::ParticipationDisabled(_)) {
                self.metrics.inc_authorization_rejections();
            }
            warn!(
                "{} by {} on {} in room {} rejected: {}",
                command.name(), session.identity, target, session.room, e
            );
        }
        result
    }

    async fn apply(
        &self,
        session: &Session,
        command: StageCommand,
        target: &str,
    ) -> Result<ParticipantInfo, StageError> {
        let room_name = session.room.as_str();
        let room_meta = metadata::decode_room(self.service.room_metadata(room_name).await?.as_deref());

        let caller = self.service.participant(room_name, &session.identity).await?;
        let caller_role = roles::resolve_member(&caller, room_meta.as_ref());
        let is_self = target == session.identity;

        let target_info = if is_self {
            caller.clone()
        } else {
            self.service.participant(room_name, target).await?
        };
        // Unreadable metadata is treated as a plain viewer who has asked for nothing.
        let target_meta = metadata::decode(target_info.metadata.as_deref()).unwrap_or_default();
        let from = target_meta.stage;

        let event = match command {
            StageCommand::RaiseHand => {
                if !is_self {
                    return Err(StageError::Forbidden(
                        "Participants can only raise their own hand".to_string(),
                    ));
                }
                if caller_role != Role::Host && !participation_allowed(room_meta.as_ref()) {
                    return Err(StageError::ParticipationDisabled(room_name.to_string()));
                }
                StageEvent::raise_hand(from)
            }
            StageCommand::InviteToStage => StageEvent::Invite,
            StageCommand::RemoveFromStage | StageCommand::LowerHand => {
                if is_self {
                    StageEvent::self_clearing(from)
                } else {
                    StageEvent::host_clearing(from)
                }
            }
        };

        if event.actor() == Actor::Host && !caller_role.can_manage_stage() {
            return Err(StageError::Forbidden(format!(
                "Only the host can {} another participant",
                event.name()
            )));
        }

        let to = machine::transition(from, event)?;
        let updated = ParticipantMetadata { stage: to, ..target_meta };
        let target_role = roles::resolve_role(target, Some(&updated), room_meta.as_ref());
        let can_publish = machine::can_publish(target_role, to);

        // The write only lands if the document is still the one the transition was checked against.
        let info = self
            .service
            .update_participant(
                room_name,
                target,
                target_info.metadata.as_deref(),
                metadata::encode(&updated),
                can_publish,
            )
            .await?;

        info!(
            "{}: {} moved {} from {} to {} in room {}",
            command.name(), session.identity, target, from, to, room_name
        );
        Ok(info)
    }
}

fn participation_allowed(room: Option<&RoomMetadata>) -> bool {
    room.map_or(true, |r| r.allow_participation)
}
