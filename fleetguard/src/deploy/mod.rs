//! Deployment module

pub mod fsm;
pub mod git;
pub mod health;
pub mod lock;
pub mod orchestrator;
pub mod process;
