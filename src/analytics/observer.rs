#![forbid(unsafe_code)]

use super::aggregator::AnalyticsAggregator;
use crate::service::RoomEvent;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawns the task that feeds push events and the timeline timer into the aggregator.
/// One task handles both, so mutations never interleave.
pub fn spawn_observer(
    aggregator: AnalyticsAggregator,
    events: broadcast::Receiver<RoomEvent>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_observer(aggregator, events, interval))
}

pub async fn run_observer(
    aggregator: AnalyticsAggregator,
    mut events: broadcast::Receiver<RoomEvent>,
    interval: Duration,
) {
    let mut timeline = tokio::time::interval(interval);
    timeline.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timeline.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => handle_event(&aggregator, event).await,
                    Err(RecvError::Lagged(skipped)) => aggregator.record_lag(skipped),
                    Err(RecvError::Closed) => {
                        info!("Room event stream closed, analytics observer stopping");
                        break;
                    }
                }
            }

            _ = timeline.tick() => aggregator.tick().await,
        }
    }
}

async fn handle_event(aggregator: &AnalyticsAggregator, event: RoomEvent) {
    match event {
        RoomEvent::RosterChanged { room, roster } => {
            debug!("Roster snapshot for {}: {} participant(s)", room, roster.len());
            aggregator.observe_roster(&room, &roster).await;
        }
        RoomEvent::ChatMessage { room, .. } => aggregator.record_message(&room).await,
        RoomEvent::ParticipantMetadataChanged { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::aggregator::AggregatorSettings;
    use crate::analytics::clock::SystemClock;
    use crate::analytics::store::MemoryStore;
    use crate::metrics::ServerMetrics;
    use crate::service::{LocalRoomService, RosterEntry};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_events_reach_aggregator_in_order() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = AnalyticsAggregator::load(
            store.clone(),
            Arc::new(SystemClock),
            AggregatorSettings::default(),
            ServerMetrics::new(),
        )
        .await
        .unwrap();

        let service = LocalRoomService::new(64);
        let handle = spawn_observer(aggregator.clone(), service.subscribe(), Duration::from_secs(300));

        service.join("demo", RosterEntry::new("alice")).unwrap();
        service.join("demo", RosterEntry::new("bob")).unwrap();
        service.chat_message("demo", "alice");
        service.leave("demo", "bob").unwrap();
        drop(service);

        handle.await.unwrap();

        let snap = aggregator.snapshot("demo").unwrap();
        assert_eq!(snap.analytics.peak_concurrent_users, 2);
        assert_eq!(snap.analytics.total_messages, 1);
        assert!(!snap.analytics.participants["bob"].has_open_session());
        assert!(snap.analytics.participants["alice"].has_open_session());
        assert_eq!(store.record().len(), 1);
    }

    #[tokio::test]
    async fn test_lagged_events_are_counted() {
        let metrics = ServerMetrics::new();
        let aggregator = AnalyticsAggregator::load(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            AggregatorSettings::default(),
            metrics.clone(),
        )
        .await
        .unwrap();

        // Room for one event: the first two messages are overwritten before the observer runs
        let service = LocalRoomService::new(1);
        let handle = spawn_observer(aggregator.clone(), service.subscribe(), Duration::from_secs(300));

        service.chat_message("demo", "alice");
        service.chat_message("demo", "alice");
        service.chat_message("demo", "bob");
        drop(service);

        handle.await.unwrap();

        assert_eq!(aggregator.snapshot("demo").unwrap().analytics.total_messages, 1);
        assert_eq!(metrics.room_events_skipped(), 2);
        assert!(metrics.render_prometheus(1, 0).contains("stagecast_room_events_skipped_total 2"));
    }
}
