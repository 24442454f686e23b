//! On-disk configuration

pub mod layout;
pub mod settings;
