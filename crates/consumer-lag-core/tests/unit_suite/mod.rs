//! Unit tests for consumer-lag-core.

pub mod discovery;
pub mod helpers;
pub mod wire;
