//! Client resilience layer for StackClash.
//!
//! Wraps one server connection and keeps it usable across drops:
//!
//! - redials with exponential backoff ([`Backoff`])
//! - queues outbound messages while offline ([`OfflineQueue`])
//! - resumes the session with the cached token before anything else
//! - detects a silent server through heartbeats
//! - drops out-of-order room messages and asks for a resync
//!
//! The transport is whatever [`Connector`](stackclash_transport::Connector)
//! the caller supplies, so tests run entirely in memory.

mod backoff;
mod client;
mod config;
mod error;
mod queue;

pub use backoff::Backoff;
pub use client::{ClientEvent, ClientState, ResilientClient};
pub use config::{BackoffConfig, ClientConfig, RetryPolicy};
pub use error::ClientError;
pub use queue::OfflineQueue;
