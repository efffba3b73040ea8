//! Client SDK for the SessionSync realtime event stream.
//!
//! The crate is organized by concern:
//! - `registry`: listener registry and connection-status broadcasting.
//! - `retry`: bounded reconnect scheduling policy.
//! - `stream`: SSE transport, session state machine, and connection probe.

/// Listener registry and connection-status broadcast primitives.
pub mod registry;
/// Reconnect policy shared by the stream session.
pub mod retry;
/// Realtime stream transport, session, and diagnostics.
pub mod stream;
