#![forbid(unsafe_code)]

// Stage request protocol - legal transitions between stage states

use crate::metadata::StageState;
use crate::stage::roles::Role;
use serde::Serialize;
use thiserror::Error;

/// Who is allowed to trigger an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The participant whose stage state changes
    Participant,
    /// A host acting on another participant
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageEvent {
    RaiseHand,
    Cancel,
    LowerHand,
    Invite,
    Accept,
    Decline,
    Leave,
    Remove,
}

impl StageEvent {
    pub fn actor(self) -> Actor {
        match self {
            StageEvent::RaiseHand
            | StageEvent::Cancel
            | StageEvent::Accept
            | StageEvent::Decline
            | StageEvent::Leave => Actor::Participant,
            StageEvent::LowerHand | StageEvent::Invite | StageEvent::Remove => Actor::Host,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageEvent::RaiseHand => "raise_hand",
            StageEvent::Cancel => "cancel",
            StageEvent::LowerHand => "lower_hand",
            StageEvent::Invite => "invite",
            StageEvent::Accept => "accept",
            StageEvent::Decline => "decline",
            StageEvent::Leave => "leave",
            StageEvent::Remove => "remove",
        }
    }

    /// Event a participant issues to step off the stage path from `state`.
    pub fn self_clearing(state: StageState) -> Self {
        match state {
            StageState::Invited => StageEvent::Decline,
            StageState::OnStage => StageEvent::Leave,
            StageState::Idle | StageState::HandRaised => StageEvent::Cancel,
        }
    }

    /// Event a host issues to take another participant off the stage path.
    pub fn host_clearing(state: StageState) -> Self {
        match state {
            StageState::Idle | StageState::HandRaised => StageEvent::LowerHand,
            StageState::Invited | StageState::OnStage => StageEvent::Remove,
        }
    }

    /// Event a participant's raise-hand request means in `state`.
    pub fn raise_hand(state: StageState) -> Self {
        match state {
            StageState::Invited | StageState::OnStage => StageEvent::Accept,
            StageState::Idle | StageState::HandRaised => StageEvent::RaiseHand,
        }
    }
}

impl std::fmt::Display for StageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {event} while {from}")]
pub struct IllegalTransition {
    pub from: StageState,
    pub event: StageEvent,
}

/// Applies `event` to `from`. Repeated requests and clearing an idle participant
/// are accepted as no-ops.
pub fn transition(from: StageState, event: StageEvent) -> Result<StageState, IllegalTransition> {
    use StageEvent::*;
    use StageState::*;

    let to = match (from, event) {
        (Idle, RaiseHand) | (HandRaised, RaiseHand) => HandRaised,
        (HandRaised, Cancel) | (HandRaised, LowerHand) => Idle,
        (HandRaised, Invite) | (Invited, Invite) => Invited,
        (Invited, Accept) | (OnStage, Accept) => OnStage,
        (Invited, Decline) => Idle,
        (Invited, Remove) => Idle,
        (OnStage, Leave) | (OnStage, Remove) | (OnStage, LowerHand) => Idle,
        (Idle, Cancel | LowerHand | Decline | Leave | Remove) => Idle,
        _ => return Err(IllegalTransition { from, event }),
    };
    Ok(to)
}

/// Whether a participant in `state` with `role` may publish media.
pub fn can_publish(role: Role, state: StageState) -> bool {
    role == Role::Host || state.is_on_stage()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [StageState; 4] = [
        StageState::Idle,
        StageState::HandRaised,
        StageState::Invited,
        StageState::OnStage,
    ];

    #[test]
    fn test_happy_path() {
        let s = transition(StageState::Idle, StageEvent::RaiseHand).unwrap();
        assert_eq!(s, StageState::HandRaised);
        let s = transition(s, StageEvent::Invite).unwrap();
        assert_eq!(s, StageState::Invited);
        let s = transition(s, StageEvent::Accept).unwrap();
        assert_eq!(s, StageState::OnStage);
        let s = transition(s, StageEvent::Remove).unwrap();
        assert_eq!(s, StageState::Idle);
    }

    #[test]
    fn test_cannot_invite_without_raised_hand() {
        let err = transition(StageState::Idle, StageEvent::Invite).unwrap_err();
        assert_eq!(err.from, StageState::Idle);
        assert_eq!(err.event, StageEvent::Invite);
        assert_eq!(err.to_string(), "cannot invite while idle");
    }

    #[test]
    fn test_cannot_accept_without_invitation() {
        assert!(transition(StageState::Idle, StageEvent::Accept).is_err());
        assert!(transition(StageState::HandRaised, StageEvent::Accept).is_err());
    }

    #[test]
    fn test_raise_hand_while_invited_is_not_a_plain_raise() {
        assert!(transition(StageState::Invited, StageEvent::RaiseHand).is_err());
        assert_eq!(StageEvent::raise_hand(StageState::Invited), StageEvent::Accept);
        assert_eq!(StageEvent::raise_hand(StageState::Idle), StageEvent::RaiseHand);
    }

    #[test]
    fn test_decline_and_leave() {
        assert_eq!(transition(StageState::Invited, StageEvent::Decline), Ok(StageState::Idle));
        assert_eq!(transition(StageState::OnStage, StageEvent::Leave), Ok(StageState::Idle));
        assert!(transition(StageState::HandRaised, StageEvent::Leave).is_err());
    }

    #[test]
    fn test_clearing_always_ends_idle() {
        for state in ALL_STATES {
            let by_self = transition(state, StageEvent::self_clearing(state)).unwrap();
            let by_host = transition(state, StageEvent::host_clearing(state)).unwrap();
            assert_eq!(by_self, StageState::Idle);
            assert_eq!(by_host, StageState::Idle);
        }
    }

    #[test]
    fn test_lower_hand_is_idempotent() {
        let once = transition(StageState::HandRaised, StageEvent::LowerHand).unwrap();
        let twice = transition(once, StageEvent::LowerHand).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.to_flags(), (false, false));
    }

    #[test]
    fn test_actors() {
        assert_eq!(StageEvent::RaiseHand.actor(), Actor::Participant);
        assert_eq!(StageEvent::Accept.actor(), Actor::Participant);
        assert_eq!(StageEvent::Invite.actor(), Actor::Host);
        assert_eq!(StageEvent::Remove.actor(), Actor::Host);
        assert_eq!(StageEvent::LowerHand.actor(), Actor::Host);
    }

    #[test]
    fn test_can_publish() {
        assert!(can_publish(Role::Host, StageState::Idle));
        assert!(can_publish(Role::StageGuest, StageState::OnStage));
        assert!(!can_publish(Role::Viewer, StageState::Invited));
        assert!(!can_publish(Role::Viewer, StageState::HandRaised));
    }
}
