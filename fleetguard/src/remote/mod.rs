//! Remote execution module

pub mod executor;
