//! Realtime stream modules.
//!
//! - `client`: SSE transport establishment and endpoint construction.
//! - `proto`: fixed named-event table and payload decoding.
//! - `session`: self-healing session state machine with bounded reconnect.
//! - `probe`: standalone connection diagnostic.

/// SSE transport and endpoint construction.
pub mod client;
/// Standalone connection probe.
pub mod probe;
/// Named-event table and payload decoding.
pub mod proto;
/// Stream session state machine.
pub mod session;
