#![forbid(unsafe_code)]

// Metadata codec - room and participant documents carried on the service's metadata channel

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Room-level document, written once by the creating host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub creator_identity: String,
    #[serde(default = "default_true")]
    pub enable_chat: bool,
    #[serde(default = "default_true")]
    pub allow_participation: bool,
}

fn default_true() -> bool {
    true
}

impl RoomMetadata {
    pub fn new(creator_identity: impl Into<String>) -> Self {
        Self {
            creator_identity: creator_identity.into(),
            enable_chat: true,
            allow_participation: true,
        }
    }
}

/// Explicit role marker stored in participant metadata. Only hosts carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataRole {
    Host,
}

impl MetadataRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataRole::Host => "host",
        }
    }
}

/// Where a participant stands in the stage request protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Idle,
    HandRaised,
    Invited,
    OnStage,
}

impl StageState {
    /// Decodes the legacy `(hand_raised, invited_to_stage)` pair.
    pub fn from_flags(hand_raised: bool, invited_to_stage: bool) -> Self {
        match (hand_raised, invited_to_stage) {
            (false, false) => StageState::Idle,
            (true, false) => StageState::HandRaised,
            (false, true) => StageState::Invited,
            (true, true) => StageState::OnStage,
        }
    }

    /// Encodes back to `(hand_raised, invited_to_stage)`.
    pub fn to_flags(self) -> (bool, bool) {
        match self {
            StageState::Idle => (false, false),
            StageState::HandRaised => (true, false),
            StageState::Invited => (false, true),
            StageState::OnStage => (true, true),
        }
    }

    pub fn is_on_stage(self) -> bool {
        self == StageState::OnStage
    }

    pub fn name(self) -> &'static str {
        match self {
            StageState::Idle => "idle",
            StageState::HandRaised => "hand_raised",
            StageState::Invited => "invited",
            StageState::OnStage => "on_stage",
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-participant document. The two legacy booleans only exist on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireParticipantMetadata", into = "WireParticipantMetadata")]
pub struct ParticipantMetadata {
    pub role: Option<MetadataRole>,
    pub stage: StageState,
}

impl ParticipantMetadata {
    pub fn host() -> Self {
        Self {
            role: Some(MetadataRole::Host),
            stage: StageState::Idle,
        }
    }

    pub fn with_stage(self, stage: StageState) -> Self {
        Self { stage, ..self }
    }

    pub fn is_host(&self) -> bool {
        self.role == Some(MetadataRole::Host)
    }

    pub fn hand_raised(&self) -> bool {
        self.stage.to_flags().0
    }

    pub fn invited_to_stage(&self) -> bool {
        self.stage.to_flags().1
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireParticipantMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    hand_raised: bool,
    #[serde(default)]
    invited_to_stage: bool,
}

impl From<WireParticipantMetadata> for ParticipantMetadata {
    fn from(wire: WireParticipantMetadata) -> Self {
        let role = match wire.role.as_deref() {
            Some("host") => Some(MetadataRole::Host),
            _ => None,
        };
        Self {
            role,
            stage: StageState::from_flags(wire.hand_raised, wire.invited_to_stage),
        }
    }
}

impl From<ParticipantMetadata> for WireParticipantMetadata {
    fn from(meta: ParticipantMetadata) -> Self {
        let (hand_raised, invited_to_stage) = meta.stage.to_flags();
        Self {
            role: meta.role.map(|r| r.as_str().to_string()),
            hand_raised,
            invited_to_stage,
        }
    }
}

/// Decodes participant metadata. Missing or malformed input yields `None`.
pub fn decode(raw: Option<&str>) -> Option<ParticipantMetadata> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    match serde_json::from_str(raw) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!("Ignoring malformed participant metadata: {}", e);
            None
        }
    }
}

/// Decodes room metadata with the same contract as [`decode`].
pub fn decode_room(raw: Option<&str>) -> Option<RoomMetadata> {
    let raw = raw.filter(|s| !s.trim().is_empty())?;
    match serde_json::from_str(raw) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!("Ignoring malformed room metadata: {}", e);
            None
        }
    }
}

/// Encodes participant metadata in the wire form the service accepts.
pub fn encode(meta: &ParticipantMetadata) -> String {
    let wire = WireParticipantMetadata::from(*meta);
    // A struct of a string and two booleans always serializes.
    serde_json::to_string(&wire).unwrap_or_default()
}

pub fn encode_room(meta: &RoomMetadata) -> String {
    serde_json::to_string(meta).unwrap_or_default()
}
