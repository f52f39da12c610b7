#![forbid(unsafe_code)]

// Analytics module - viewer sessions, concurrency, and chat counts per room,
// persisted as one keyed record

pub mod aggregator;
pub mod api;
pub mod clock;
pub mod observer;
pub mod store;
pub mod tracker;

pub use aggregator::{AggregatorSettings, AnalyticsAggregator, AnalyticsSnapshot, StreamAnalytics};
pub use clock::{Clock, ManualClock, SystemClock};
pub use observer::spawn_observer;
pub use store::{AnalyticsStore, FileStore, MemoryStore, PgStore, StoreError};
