//! # promptq
//!
//! SQLite-backed batch generation runner.
//!
//! Fans each source prompt out across a variant alphabet and a fixed number
//! of trials, persists every unit as a work item, then drains the backlog
//! through a bounded-concurrency worker pool (rig-core) with retry on
//! transient failure. One text artifact is written per completed unit;
//! progress is observable through a JSON-lines run log and OpenTelemetry.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod llm;
pub mod model;
pub mod planner;
pub mod sink;
pub mod source;
pub mod telemetry;
