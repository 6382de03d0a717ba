//! Concurrent session-establishment benchmark for TLS-secured CQL services.

pub mod config;
pub mod credentials;
pub mod driver;
pub mod harness;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod report;
