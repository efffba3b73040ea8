//! Stream protocol surface: the fixed named-event table, transport readiness,
//! and payload decoding.

use serde_json::Value;

/// Event name used for unnamed/generic stream messages.
pub const MESSAGE_EVENT: &str = "message";
/// Event name emitted by the server on a successful open, and locally by the
/// session when the transport reports open.
pub const CONNECTED_EVENT: &str = "connected";
/// Event name emitted locally once per episode when the retry budget is
/// exhausted.
pub const CONNECTION_FAILED_EVENT: &str = "connection_failed";

/// Named event types the stream service delivers.
///
/// Each arrives with a JSON payload and is re-emitted to listeners under the
/// identical name. `heartbeat` carries no application data; it only keeps
/// the stream alive.
pub const NAMED_EVENTS: &[&str] = &[
    "connected",
    "heartbeat",
    "session_update",
    "session_invitation",
    "session_invitation_accepted",
    "session_invitation_rejected",
    "relationship_invitation",
    "notification",
    "session_deleted",
    "sessions_update",
    "objective_advancement",
    "session_status_change",
    "vote_update",
    "objective_transition",
    "session_completion",
    "end_session_vote_update",
    "session_summary_generated",
    "session_summary_generating",
    "session_summary_error",
    "objective_completion",
];

/// Returns true when `name` is part of the fixed named-event table.
pub fn is_named_event(name: &str) -> bool {
    NAMED_EVENTS.contains(&name)
}

/// Decodes an event payload into structured JSON.
///
/// Returns `None` for malformed payloads; the caller drops the message
/// silently.
pub fn decode_payload(data: &str) -> Option<Value> {
    serde_json::from_str(data).ok()
}

/// Coarse readiness of the underlying transport handle.
///
/// Mirrors the readiness model of browser `EventSource` handles: an attempt
/// in flight, an open stream, or a released/terminal handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportReadiness {
    /// A transport handle is being established.
    Connecting,
    /// The stream is open and delivering events.
    Open,
    /// No live transport handle.
    Closed,
}
