#![forbid(unsafe_code)]

// Server metrics - lock-free AtomicU64 counters and Prometheus-compatible histogram.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

/// Fixed histogram bucket boundaries (in microseconds for internal storage).
const BUCKET_BOUNDS_US: [u64; 10] = [
    1_000,      // 1ms
    5_000,      // 5ms
    10_000,     // 10ms
    25_000,     // 25ms
    50_000,     // 50ms
    100_000,    // 100ms
    250_000,    // 250ms
    500_000,    // 500ms
    1_000_000,  // 1s
    5_000_000,  // 5s
];

const BUCKET_LABELS: [&str; 10] = [
    "0.001", "0.005", "0.01", "0.025", "0.05",
    "0.1", "0.25", "0.5", "1", "5",
];

/// Prometheus-compatible cumulative histogram with fixed buckets.
pub struct Histogram {
    /// bucket[i] counts observations <= BUCKET_BOUNDS_US[i]
    buckets: [AtomicU64; 10],
    /// +Inf bucket (total count)
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.sum_us.fetch_add(us, Relaxed);
        self.count.fetch_add(1, Relaxed);
        for (i, &bound) in BUCKET_BOUNDS_US.iter().enumerate() {
            if us <= bound {
                self.buckets[i].fetch_add(1, Relaxed);
            }
        }
    }

    fn render(&self, name: &str, help: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");

        for (i, label) in BUCKET_LABELS.iter().enumerate() {
            let val = self.buckets[i].load(Relaxed);
            let _ = writeln!(out, "{name}_bucket{{le=\"{label}\"}} {val}");
        }
        let count = self.count.load(Relaxed);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let sum_us = self.sum_us.load(Relaxed);
        let _ = writeln!(out, "{name}_sum {}.{:06}", sum_us / 1_000_000, sum_us % 1_000_000);
        let _ = writeln!(out, "{name}_count {count}");
    }
}

/// Server-wide metrics using lock-free atomics.
#[derive(Clone)]
pub struct ServerMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    stage_commands_total: AtomicU64,
    stage_command_failures_total: AtomicU64,
    authorization_rejections_total: AtomicU64,
    roster_snapshots_total: AtomicU64,
    chat_messages_total: AtomicU64,
    analytics_saves_total: AtomicU64,
    analytics_save_failures_total: AtomicU64,
    recordings_started_total: AtomicU64,
    recordings_stopped_total: AtomicU64,
    room_events_skipped_total: AtomicU64,

    stage_command_handling: Histogram,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stage_commands_total: AtomicU64::new(0),
                stage_command_failures_total: AtomicU64::new(0),
                authorization_rejections_total: AtomicU64::new(0),
                roster_snapshots_total: AtomicU64::new(0),
                chat_messages_total: AtomicU64::new(0),
                analytics_saves_total: AtomicU64::new(0),
                analytics_save_failures_total: AtomicU64::new(0),
                recordings_started_total: AtomicU64::new(0),
                recordings_stopped_total: AtomicU64::new(0),
                room_events_skipped_total: AtomicU64::new(0),
                stage_command_handling: Histogram::new(),
            }),
        }
    }

    // --- Counter increments ---

    pub fn inc_stage_commands(&self) {
        self.inner.stage_commands_total.fetch_add(1, Relaxed);
    }

    pub fn inc_stage_command_failures(&self) {
        self.inner.stage_command_failures_total.fetch_add(1, Relaxed);
    }

    pub fn inc_authorization_rejections(&self) {
        self.inner.authorization_rejections_total.fetch_add(1, Relaxed);
    }

    pub fn inc_roster_snapshots(&self) {
        self.inner.roster_snapshots_total.fetch_add(1, Relaxed);
    }

    pub fn inc_chat_messages(&self) {
        self.inner.chat_messages_total.fetch_add(1, Relaxed);
    }

    pub fn inc_analytics_saves(&self) {
        self.inner.analytics_saves_total.fetch_add(1, Relaxed);
    }

    pub fn inc_analytics_save_failures(&self) {
        self.inner.analytics_save_failures_total.fetch_add(1, Relaxed);
    }

    pub fn inc_recordings_started(&self) {
        self.inner.recordings_started_total.fetch_add(1, Relaxed);
    }

    pub fn inc_recordings_stopped(&self) {
        self.inner.recordings_stopped_total.fetch_add(1, Relaxed);
    }

    pub fn inc_room_events_skipped(&self, n: u64) {
        self.inner.room_events_skipped_total.fetch_add(n, Relaxed);
    }

    pub fn stage_commands(&self) -> u64 {
        self.inner.stage_commands_total.load(Relaxed)
    }

    pub fn authorization_rejections(&self) -> u64 {
        self.inner.authorization_rejections_total.load(Relaxed)
    }

    pub fn room_events_skipped(&self) -> u64 {
        self.inner.room_events_skipped_total.load(Relaxed)
    }

    // --- Histogram ---

    pub fn observe_stage_command(&self, duration: Duration) {
        self.inner.stage_command_handling.observe(duration);
    }

    // --- Prometheus rendering ---

    /// Render all metrics in Prometheus text exposition format.
    /// `rooms_tracked` and `participants_present` are on-demand gauges from the caller.
    pub fn render_prometheus(&self, rooms_tracked: usize, participants_present: usize) -> String {
        let mut out = String::with_capacity(4096);

        let i = &self.inner;

        render_counter(&mut out, "stagecast_stage_commands_total", "Total stage commands received", i.stage_commands_total.load(Relaxed));
        render_counter(&mut out, "stagecast_stage_command_failures_total", "Stage commands that failed", i.stage_command_failures_total.load(Relaxed));
        render_counter(&mut out, "stagecast_authorization_rejections_total", "Stage commands rejected for missing privileges", i.authorization_rejections_total.load(Relaxed));
        render_counter(&mut out, "stagecast_roster_snapshots_total", "Roster snapshots applied to analytics", i.roster_snapshots_total.load(Relaxed));
        render_counter(&mut out, "stagecast_chat_messages_total", "Chat messages counted", i.chat_messages_total.load(Relaxed));
        render_counter(&mut out, "stagecast_analytics_saves_total", "Analytics record writes", i.analytics_saves_total.load(Relaxed));
        render_counter(&mut out, "stagecast_analytics_save_failures_total", "Analytics record writes that failed", i.analytics_save_failures_total.load(Relaxed));
        render_counter(&mut out, "stagecast_recordings_started_total", "Recordings started", i.recordings_started_total.load(Relaxed));
        render_counter(&mut out, "stagecast_recordings_stopped_total", "Recordings stopped", i.recordings_stopped_total.load(Relaxed));
        render_counter(&mut out, "stagecast_room_events_skipped_total", "Room events dropped before analytics saw them", i.room_events_skipped_total.load(Relaxed));

        render_gauge(&mut out, "stagecast_rooms_tracked", "Rooms with recorded analytics", rooms_tracked as u64);
        render_gauge(&mut out, "stagecast_participants_present", "Participants present in the latest snapshots", participants_present as u64);

        i.stage_command_handling.render(
            "stagecast_stage_command_seconds",
            "Stage command handling latency in seconds",
            &mut out,
        );

        out
    }
}

fn render_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn render_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let metrics = ServerMetrics::new();
        metrics.observe_stage_command(Duration::from_millis(3));
        metrics.observe_stage_command(Duration::from_millis(30));

        let out = metrics.render_prometheus(0, 0);
        assert!(out.contains("stagecast_stage_command_seconds_bucket{le=\"0.001\"} 0"));
        assert!(out.contains("stagecast_stage_command_seconds_bucket{le=\"0.005\"} 1"));
        assert!(out.contains("stagecast_stage_command_seconds_bucket{le=\"0.05\"} 2"));
        assert!(out.contains("stagecast_stage_command_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(out.contains("stagecast_stage_command_seconds_sum 0.033000"));
    }

    #[test]
    fn test_counters_and_gauges_render() {
        let metrics = ServerMetrics::new();
        metrics.inc_stage_commands();
        metrics.inc_stage_commands();
        metrics.inc_authorization_rejections();

        let out = metrics.render_prometheus(3, 7);
        assert!(out.contains("stagecast_stage_commands_total 2"));
        assert!(out.contains("stagecast_authorization_rejections_total 1"));
        assert!(out.contains("stagecast_rooms_tracked 3"));
        assert!(out.contains("stagecast_participants_present 7"));
    }
}
