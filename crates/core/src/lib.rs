//! Shared types, configuration, and errors for the micro:bit link
//! crates. Has no internal dependencies.

pub mod config;
pub mod error;
pub mod types;
