#![forbid(unsafe_code)]

// Local stage session - what the local participant may do next, and keeping
// media capture in line with the stage state pushed by the service.

use crate::metadata::{self, ParticipantMetadata, RoomMetadata, StageState};
use crate::service::RoomEvent;
use crate::stage::controller::StageCommand;
use crate::stage::roles::{self, Role, RosterMember};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Local microphone/camera capture and publishing.
pub trait MediaCapture: Send {
    fn acquire(&mut self) -> Result<(), CaptureError>;
    fn release(&mut self);
}

/// What happened to local capture after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Unchanged,
    Started,
    Stopped,
    /// The stage change stands; only local media failed.
    Failed(CaptureError),
}

/// A stage action offered to the local participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    RaiseHand,
    CancelRequest,
    AcceptInvitation,
    DeclineInvitation,
    LeaveStage,
    Invite(String),
    LowerHand(String),
    Remove(String),
}

impl StageAction {
    /// Endpoint and target identity that carry out this action.
    /// `None` means the caller acts on itself.
    pub fn command(&self) -> (StageCommand, Option<&str>) {
        match self {
            StageAction::RaiseHand | StageAction::AcceptInvitation => (StageCommand::RaiseHand, None),
            StageAction::CancelRequest => (StageCommand::LowerHand, None),
            StageAction::DeclineInvitation | StageAction::LeaveStage => (StageCommand::RemoveFromStage, None),
            StageAction::Invite(id) => (StageCommand::InviteToStage, Some(id)),
            StageAction::LowerHand(id) => (StageCommand::LowerHand, Some(id)),
            StageAction::Remove(id) => (StageCommand::RemoveFromStage, Some(id)),
        }
    }
}

pub struct StageSession<C: MediaCapture> {
    identity: String,
    room: String,
    room_metadata: Option<RoomMetadata>,
    metadata: Option<ParticipantMetadata>,
    capture: C,
    wants_publish: bool,
    publishing: bool,
}

impl<C: MediaCapture> StageSession<C> {
    pub fn new(identity: impl Into<String>, room: impl Into<String>, capture: C) -> Self {
        Self {
            identity: identity.into(),
            room: room.into(),
            room_metadata: None,
            metadata: None,
            capture,
            wants_publish: false,
            publishing: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn state(&self) -> StageState {
        self.metadata.map(|m| m.stage).unwrap_or_default()
    }

    pub fn role(&self) -> Role {
        roles::resolve_role(&self.identity, self.metadata.as_ref(), self.room_metadata.as_ref())
    }

    pub fn set_room_metadata(&mut self, raw: Option<&str>) -> CaptureOutcome {
        self.room_metadata = metadata::decode_room(raw);
        self.sync_capture()
    }

    /// Applies a pushed event. Events for other rooms or participants are ignored.
    pub fn apply_event(&mut self, event: &RoomEvent) -> CaptureOutcome {
        if event.room() != self.room {
            return CaptureOutcome::Unchanged;
        }
        match event {
            RoomEvent::ParticipantMetadataChanged { identity, metadata: raw, .. } if *identity == self.identity => {
                self.metadata = metadata::decode(raw.as_deref());
                self.sync_capture()
            }
            RoomEvent::RosterChanged { roster, .. } => {
                match roster.iter().find(|e| e.identity == self.identity) {
                    Some(entry) => {
                        self.metadata = metadata::decode(entry.raw_metadata());
                        self.sync_capture()
                    }
                    None => CaptureOutcome::Unchanged,
                }
            }
            _ => CaptureOutcome::Unchanged,
        }
    }

    /// Tries capture again after an earlier failure.
    pub fn retry_capture(&mut self) -> CaptureOutcome {
        if self.wants_publish && !self.publishing {
            self.start_capture()
        } else {
            CaptureOutcome::Unchanged
        }
    }

    fn sync_capture(&mut self) -> CaptureOutcome {
        let wants = self.role().can_publish();
        if wants == self.wants_publish {
            return CaptureOutcome::Unchanged;
        }
        self.wants_publish = wants;

        if wants {
            self.start_capture()
        } else if self.publishing {
            self.capture.release();
            self.publishing = false;
            info!("{} left the stage, capture released", self.identity);
            CaptureOutcome::Stopped
        } else {
            CaptureOutcome::Unchanged
        }
    }

    fn start_capture(&mut self) -> CaptureOutcome {
        match self.capture.acquire() {
            Ok(()) => {
                self.publishing = true;
                info!("{} is on stage, publishing started", self.identity);
                CaptureOutcome::Started
            }
            Err(e) => {
                warn!("{} could not start capture: {}", self.identity, e);
                CaptureOutcome::Failed(e)
            }
        }
    }

    /// Actions the local participant can take about its own stage state.
    pub fn allowed_actions(&self) -> Vec<StageAction> {
        if self.role() == Role::Host {
            return Vec::new();
        }
        match self.state() {
            StageState::Idle => {
                if self.room_metadata.as_ref().map_or(true, |r| r.allow_participation) {
                    vec![StageAction::RaiseHand]
                } else {
                    Vec::new()
                }
            }
            StageState::HandRaised => vec![StageAction::CancelRequest],
            StageState::Invited => vec![StageAction::AcceptInvitation, StageAction::DeclineInvitation],
            StageState::OnStage => vec![StageAction::LeaveStage],
        }
    }

    /// Host controls offered next to another roster member.
    pub fn actions_for<M: RosterMember>(&self, member: &M) -> Vec<StageAction> {
        if self.role() != Role::Host || member.identity() == self.identity {
            return Vec::new();
        }
        let identity = member.identity().to_string();
        match metadata::decode(member.raw_metadata()).map(|m| m.stage).unwrap_or_default() {
            StageState::Idle => Vec::new(),
            StageState::HandRaised => vec![StageAction::Invite(identity.clone()), StageAction::LowerHand(identity)],
            StageState::Invited => vec![StageAction::Remove(identity)],
            StageState::OnStage => vec![StageAction::LowerHand(identity.clone()), StageAction::Remove(identity)],
        }
    }

    /// Host: someone is waiting for a decision. Others: an invitation awaits an answer.
    pub fn needs_attention<M: RosterMember>(&self, roster: &[M]) -> bool {
        if self.role() == Role::Host {
            roles::pending_requests(roster) > 0
        } else {
            self.state() == StageState::Invited
        }
    }
}
