//! Shared infrastructure: errors, their RPC encoding, metrics.

pub mod error;
pub mod metrics;
pub mod transport;
