#![forbid(unsafe_code)]

use crate::metadata::{self, ParticipantMetadata, RoomMetadata, StageState};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer = 0,
    StageGuest = 1,
    Host = 2,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::StageGuest => "stage_guest",
            Role::Viewer => "viewer",
        }
    }

    pub fn can_publish(&self) -> bool {
        *self >= Role::StageGuest
    }

    pub fn can_manage_stage(&self) -> bool {
        *self == Role::Host
    }
}

/// Anything in a roster that carries an identity and a raw metadata document.
pub trait RosterMember {
    fn identity(&self) -> &str;
    fn raw_metadata(&self) -> Option<&str>;
}

/// Derives a participant's role. Explicit host marker wins, then room creator,
/// then the stage state. Missing metadata resolves to the least privilege.
pub fn resolve_role(
    identity: &str,
    meta: Option<&ParticipantMetadata>,
    room: Option<&RoomMetadata>,
) -> Role {
    if meta.is_some_and(|m| m.is_host()) {
        return Role::Host;
    }
    if room.is_some_and(|r| r.creator_identity == identity) {
        return Role::Host;
    }
    match meta.map(|m| m.stage) {
        Some(StageState::OnStage) => Role::StageGuest,
        _ => Role::Viewer,
    }
}

/// Resolves a roster member straight from its raw metadata.
pub fn resolve_member<M: RosterMember>(member: &M, room: Option<&RoomMetadata>) -> Role {
    let meta = metadata::decode(member.raw_metadata());
    resolve_role(member.identity(), meta.as_ref(), room)
}

/// Display buckets for a roster.
#[derive(Debug)]
pub struct RosterPartition<'a, M> {
    pub hosts: Vec<&'a M>,
    pub viewers: Vec<&'a M>,
}

/// Splits the local participant followed by the remote participants into hosts and
/// everyone else in a single pass. Order is preserved and repeated identities are skipped.
pub fn partition_roster<'a, M: RosterMember>(
    local: &'a M,
    remotes: &'a [M],
    room: Option<&RoomMetadata>,
) -> RosterPartition<'a, M> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();
    let mut viewers = Vec::new();

    for member in std::iter::once(local).chain(remotes.iter()) {
        if !seen.insert(member.identity()) {
            continue;
        }
        match resolve_member(member, room) {
            Role::Host => hosts.push(member),
            Role::StageGuest | Role::Viewer => viewers.push(member),
        }
    }

    RosterPartition { hosts, viewers }
}

/// Number of participants waiting for a host decision.
pub fn pending_requests<M: RosterMember>(roster: &[M]) -> usize {
    roster
        .iter()
        .filter(|m| {
            metadata::decode(m.raw_metadata()).is_some_and(|meta| meta.stage == StageState::HandRaised)
        })
        .count()
}
