//! Application wiring and command entry points

pub mod options;
pub mod run;
pub mod state;
