#![forbid(unsafe_code)]

// Stagecast library - stage request coordination and viewer analytics for live-event rooms

pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod metadata;
pub mod metrics;
pub mod recording;
pub mod server;
pub mod service;
pub mod stage;
