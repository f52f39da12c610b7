#![forbid(unsafe_code)]

// Analytics aggregator - per-room stream analytics built from roster snapshots,
// chat counts, and periodic concurrency samples.

use super::clock::Clock;
use super::store::{AnalyticsRecord, AnalyticsStore, StoreError};
use super::tracker::{self, ParticipantActivity};
use crate::config::{DEFAULT_TIMELINE_INTERVAL, DEFAULT_TIMELINE_MAX_SAMPLES};
use crate::metrics::ServerMetrics;
use crate::service::RosterEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSample {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamAnalytics {
    #[serde(default)]
    pub participants: BTreeMap<String, ParticipantActivity>,
    #[serde(default)]
    pub peak_concurrent_users: usize,
    #[serde(default)]
    pub total_messages: u64,
    pub stream_start_time: DateTime<Utc>,
    #[serde(default)]
    pub user_count_timeline: Vec<TimelineSample>,
}

impl StreamAnalytics {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            participants: BTreeMap::new(),
            peak_concurrent_users: 0,
            total_messages: 0,
            stream_start_time: start,
            user_count_timeline: Vec::new(),
        }
    }

    /// Participants with an open session.
    pub fn present(&self) -> usize {
        self.participants.values().filter(|p| p.has_open_session()).count()
    }

    fn sample_due(&self, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
        self.user_count_timeline
            .last()
            .map_or(true, |last| now - last.timestamp >= interval)
    }

    fn push_sample(&mut self, sample: TimelineSample, max_samples: usize) {
        self.user_count_timeline.push(sample);
        let excess = self.user_count_timeline.len().saturating_sub(max_samples);
        if excess > 0 {
            self.user_count_timeline.drain(..excess);
        }
    }
}

/// Read view of one room, with figures derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    #[serde(flatten)]
    pub analytics: StreamAnalytics,
    pub stream_duration_minutes: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub timeline_interval: Duration,
    pub timeline_max_samples: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            timeline_interval: DEFAULT_TIMELINE_INTERVAL,
            timeline_max_samples: DEFAULT_TIMELINE_MAX_SAMPLES,
        }
    }
}

#[derive(Clone)]
pub struct AnalyticsAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    record: StdRwLock<AnalyticsRecord>,
    store: Arc<dyn AnalyticsStore>,
    clock: Arc<dyn Clock>,
    interval: chrono::Duration,
    max_samples: usize,
    metrics: ServerMetrics,
}

impl AnalyticsAggregator {
    /// Loads the stored record and starts aggregating on top of it.
    pub async fn load(
        store: Arc<dyn AnalyticsStore>,
        clock: Arc<dyn Clock>,
        settings: AggregatorSettings,
        metrics: ServerMetrics,
    ) -> Result<Self, StoreError> {
        let record = store.load().await?;
        info!("Analytics loaded for {} room(s)", record.len());

        let interval = chrono::Duration::from_std(settings.timeline_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        Ok(Self {
            inner: Arc::new(Inner {
                record: StdRwLock::new(record),
                store,
                clock,
                interval,
                max_samples: settings.timeline_max_samples.max(1),
                metrics,
            }),
        })
    }

    pub fn timeline_interval(&self) -> Duration {
        self.inner.interval.to_std().unwrap_or(DEFAULT_TIMELINE_INTERVAL)
    }

    /// Applies a full roster snapshot for `room`.
    pub async fn observe_roster(&self, room: &str, roster: &[RosterEntry]) {
        let now = self.inner.clock.now();
        let saved = {
            let mut record = self.inner.record.write().unwrap_or_else(|e| e.into_inner());
            let analytics = record.entry(room.to_string()).or_insert_with(|| {
                info!("Analytics started for room {}", room);
                StreamAnalytics::new(now)
            });

            tracker::apply_snapshot(&mut analytics.participants, roster, now);
            let count = analytics.present();
            analytics.peak_concurrent_users = analytics.peak_concurrent_users.max(count);
            if analytics.sample_due(now, self.inner.interval) {
                analytics.push_sample(TimelineSample { timestamp: now, count }, self.inner.max_samples);
            }
            record.clone()
        };

        self.inner.metrics.inc_roster_snapshots();
        self.persist(&saved).await;
    }

    pub async fn record_message(&self, room: &str) {
        let now = self.inner.clock.now();
        let saved = {
            let mut record = self.inner.record.write().unwrap_or_else(|e| e.into_inner());
            let analytics = record
                .entry(room.to_string())
                .or_insert_with(|| StreamAnalytics::new(now));
            analytics.total_messages += 1;
            record.clone()
        };

        self.inner.metrics.inc_chat_messages();
        self.persist(&saved).await;
    }

    /// Accounts for push events the observer never received. Chat messages among them
    /// are lost to `total_messages`; rosters recover with the next snapshot.
    pub fn record_lag(&self, skipped: u64) {
        warn!("Analytics observer lagged, {} event(s) skipped", skipped);
        self.inner.metrics.inc_room_events_skipped(skipped);
    }

    /// Timer hook: samples every room with someone present whose last sample is due.
    pub async fn tick(&self) {
        let now = self.inner.clock.now();
        let saved = {
            let mut record = self.inner.record.write().unwrap_or_else(|e| e.into_inner());
            let mut sampled = 0;
            for analytics in record.values_mut() {
                let count = analytics.present();
                if count == 0 || !analytics.sample_due(now, self.inner.interval) {
                    continue;
                }
                for activity in analytics.participants.values_mut() {
                    activity.recompute_minutes(now);
                }
                analytics.push_sample(TimelineSample { timestamp: now, count }, self.inner.max_samples);
                sampled += 1;
            }
            if sampled == 0 {
                return;
            }
            debug!("Timeline sampled for {} room(s)", sampled);
            record.clone()
        };

        self.persist(&saved).await;
    }

    /// `None` when nothing was ever recorded for `room`.
    pub fn snapshot(&self, room: &str) -> Option<AnalyticsSnapshot> {
        let now = self.inner.clock.now();
        let mut analytics = {
            let record = self.inner.record.read().unwrap_or_else(|e| e.into_inner());
            record.get(room)?.clone()
        };
        for activity in analytics.participants.values_mut() {
            activity.recompute_minutes(now);
        }
        let stream_duration_minutes = (now - analytics.stream_start_time).num_minutes().max(0);
        Some(AnalyticsSnapshot { analytics, stream_duration_minutes })
    }

    pub fn rooms_tracked(&self) -> usize {
        self.inner.record.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn participants_present(&self) -> usize {
        self.inner
            .record
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(StreamAnalytics::present)
            .sum()
    }

    async fn persist(&self, record: &AnalyticsRecord) {
        match self.inner.store.save(record).await {
            Ok(()) => self.inner.metrics.inc_analytics_saves(),
            Err(e) => {
                warn!("Failed to save analytics: {}", e);
                self.inner.metrics.inc_analytics_save_failures();
            }
        }
    }
}
