//! fleetguard library
//!
//! Core modules for syncing, restarting and validating remote deployments,
//! with per-operation deadlock detection and recovery.

pub mod app;
pub mod audit;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod guardian;
pub mod logs;
pub mod models;
pub mod registry;
pub mod remote;
pub mod storage;
pub mod utils;
