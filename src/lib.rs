//! PSP Metrics Library
//!
//! Phase time tracking, defect recording and line provenance for the
//! Personal Software Process. The binary in `main.rs` is a thin CLI over
//! [`session::SqliteSession`].

pub mod activity;
pub mod cli;
pub mod config;
pub mod db;
pub mod defects;
pub mod error;
pub mod events;
pub mod export;
pub mod format;
pub mod provenance;
pub mod session;
pub mod stopwatch;
pub mod store;
pub mod tracker;
pub mod types;
