#![forbid(unsafe_code)]

// Stage module - roles, the stage request state machine, and the guarded commands
// that move participants on and off the stage

pub mod api;
pub mod controller;
pub mod machine;
pub mod roles;
pub mod session;

pub use controller::{StageCommand, StageController, StageError};
pub use roles::Role;
