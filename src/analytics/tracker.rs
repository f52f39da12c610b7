#![forbid(unsafe_code)]

// Session tracker - turns successive roster snapshots into per-identity join/leave
// sessions and media activity.

use crate::service::{ConnectionQuality, RosterEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSession {
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub left_at: Option<DateTime<Utc>>,
}

impl ParticipantSession {
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }

    /// Length in minutes; an open session runs until `now`.
    pub fn minutes(&self, now: DateTime<Utc>) -> f64 {
        let end = self.left_at.unwrap_or(now);
        let ms = (end - self.joined_at).num_milliseconds().max(0);
        ms as f64 / 60_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantActivity {
    pub identity: String,
    pub join_time: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub sessions: Vec<ParticipantSession>,
    #[serde(default)]
    pub audio_enabled: bool,
    #[serde(default)]
    pub video_enabled: bool,
    #[serde(default)]
    pub has_screen_shared: bool,
    #[serde(default)]
    pub minutes_watched: f64,
    #[serde(default)]
    pub connection_quality: ConnectionQuality,
}

impl ParticipantActivity {
    pub fn new(identity: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            join_time: now,
            last_seen_at: now,
            sessions: Vec::new(),
            audio_enabled: false,
            video_enabled: false,
            has_screen_shared: false,
            minutes_watched: 0.0,
            connection_quality: ConnectionQuality::Unknown,
        }
    }

    pub fn has_open_session(&self) -> bool {
        self.sessions.last().is_some_and(ParticipantSession::is_open)
    }

    /// Records presence in a snapshot. Returns true when a new session was opened.
    fn observe(&mut self, entry: &RosterEntry, now: DateTime<Utc>) -> bool {
        let opened = !self.has_open_session();
        if opened {
            self.sessions.push(ParticipantSession { joined_at: now, left_at: None });
        }
        self.last_seen_at = now;
        self.audio_enabled = entry.microphone_enabled;
        self.video_enabled = entry.camera_enabled;
        if entry.screen_share_enabled {
            self.has_screen_shared = true;
        }
        self.connection_quality = entry.connection_quality;
        opened
    }

    /// Closes the open session, if any, at `now`.
    fn close(&mut self, now: DateTime<Utc>) -> bool {
        match self.sessions.last_mut() {
            Some(session) if session.is_open() => {
                session.left_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn recompute_minutes(&mut self, now: DateTime<Utc>) {
        self.minutes_watched = self.sessions.iter().map(|s| s.minutes(now)).sum();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotChanges {
    pub opened: Vec<String>,
    pub closed: Vec<String>,
}

/// Applies one roster snapshot. Present identities get a session opened if none is
/// open; identities with an open session that are absent get it closed at `now`.
pub fn apply_snapshot(
    participants: &mut BTreeMap<String, ParticipantActivity>,
    roster: &[RosterEntry],
    now: DateTime<Utc>,
) -> SnapshotChanges {
    let mut changes = SnapshotChanges::default();
    let mut present = HashSet::with_capacity(roster.len());

    for entry in roster {
        if !present.insert(entry.identity.as_str()) {
            continue;
        }
        let activity = participants
            .entry(entry.identity.clone())
            .or_insert_with(|| ParticipantActivity::new(&entry.identity, now));
        if activity.observe(entry, now) {
            changes.opened.push(entry.identity.clone());
        }
    }

    for (identity, activity) in participants.iter_mut() {
        if !present.contains(identity.as_str()) && activity.close(now) {
            changes.closed.push(identity.clone());
        }
        activity.recompute_minutes(now);
    }

    if !changes.opened.is_empty() || !changes.closed.is_empty() {
        debug!("Sessions opened {:?}, closed {:?}", changes.opened, changes.closed);
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn roster(ids: &[&str]) -> Vec<RosterEntry> {
        ids.iter().map(|id| RosterEntry::new(*id)).collect()
    }

    #[test]
    fn test_session_reconstruction() {
        let mut participants = BTreeMap::new();
        apply_snapshot(&mut participants, &roster(&["a", "b"]), t(0));
        let changes = apply_snapshot(&mut participants, &roster(&["a"]), t(10));
        assert_eq!(changes.closed, vec!["b".to_string()]);
        let changes = apply_snapshot(&mut participants, &roster(&["a", "b"]), t(20));
        assert_eq!(changes.opened, vec!["b".to_string()]);

        let b = &participants["b"];
        assert_eq!(b.sessions.len(), 2);
        assert_eq!(b.sessions[0].left_at, Some(t(10)));
        assert!(b.sessions[0].left_at.unwrap() <= t(10));
        assert!(b.sessions[1].is_open());
        assert_eq!(b.sessions[1].joined_at, t(20));
        assert_eq!(b.join_time, t(0));
        assert_eq!(b.minutes_watched, 10.0);

        let a = &participants["a"];
        assert_eq!(a.sessions.len(), 1);
        assert_eq!(a.minutes_watched, 20.0);
    }

    #[test]
    fn test_open_session_counts_until_read() {
        let mut participants = BTreeMap::new();
        apply_snapshot(&mut participants, &roster(&["a"]), t(0));
        let a = participants.get_mut("a").unwrap();
        a.recompute_minutes(t(7));
        assert_eq!(a.minutes_watched, 7.0);
    }

    #[test]
    fn test_screen_share_is_sticky() {
        let mut participants = BTreeMap::new();
        let mut sharing = RosterEntry::new("a");
        sharing.screen_share_enabled = true;
        sharing.camera_enabled = true;
        sharing.connection_quality = ConnectionQuality::Poor;
        apply_snapshot(&mut participants, &[sharing], t(0));
        apply_snapshot(&mut participants, &roster(&["a"]), t(1));

        let a = &participants["a"];
        assert!(a.has_screen_shared);
        assert!(!a.video_enabled);
        assert_eq!(a.connection_quality, ConnectionQuality::Unknown);
        assert_eq!(a.last_seen_at, t(1));
    }

    #[test]
    fn test_duplicate_roster_entries_open_one_session() {
        let mut participants = BTreeMap::new();
        let changes = apply_snapshot(&mut participants, &roster(&["a", "a"]), t(0));
        assert_eq!(changes.opened.len(), 1);
        assert_eq!(participants["a"].sessions.len(), 1);
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut participants = BTreeMap::new();
        apply_snapshot(&mut participants, &roster(&["a"]), t(0));
        let json = serde_json::to_value(&participants["a"]).unwrap();
        assert!(json.get("joinTime").is_some());
        assert!(json.get("hasScreenShared").is_some());
        assert_eq!(json["sessions"][0]["leftAt"], serde_json::Value::Null);
        assert_eq!(json["connectionQuality"], "unknown");
    }
}
