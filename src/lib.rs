//! Stagehand - Source staging for package builds
//!
//! Fetches package sources into managed stage directories, verifies and
//! expands them, and cleans up afterwards. Stages are safe to share between
//! cooperating processes on one filesystem.

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod mirror;
pub mod stage;
pub mod ui;

pub use error::{StagehandError, StagehandResult};
