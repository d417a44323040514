//! Ambient configuration and logging shared by the records client crates.

pub mod config;
pub mod logging;
