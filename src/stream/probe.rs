//! Standalone connection probe.
//!
//! Opens a throwaway transport against the same endpoint construction rules
//! as the live session, races open against error and a fixed timeout, and
//! reports a single verdict. Intended for health checks, not production
//! traffic; the probe never touches primary session state.

use secrecy::SecretString;
use tracing::debug;

use crate::stream::client::{self, StreamClientError};
use crate::stream::proto::TransportReadiness;
use crate::stream::session::SessionConfig;

/// Single-shot verdict produced by a connection probe.
#[derive(Clone, Debug)]
pub struct ProbeReport {
    /// Whether the endpoint accepted the stream within the timeout.
    pub success: bool,
    /// Human-readable summary of the outcome.
    pub message: String,
    /// Readiness the throwaway transport reached before it was closed.
    pub readiness: TransportReadiness,
    /// Underlying error detail for failed probes.
    pub error_detail: Option<String>,
}

/// Opens a throwaway transport and resolves exactly once with a verdict.
///
/// The transport handle is always released before the verdict is returned,
/// regardless of which outcome won the race.
pub(crate) async fn probe_connection(config: &SessionConfig, token: SecretString) -> ProbeReport {
    let url = match client::build_stream_url(config.base_url(), &token) {
        Ok(url) => url,
        Err(err) => return failure_report("stream URL construction failed", &err),
    };

    let http = match client::build_http_client(config.connect_timeout()) {
        Ok(http) => http,
        Err(err) => return failure_report("http client construction failed", &err),
    };

    debug!(event = "probe_started", url = %client::redact_credentials(&url));
    let attempt = client::open_event_stream(&http, &url);
    match tokio::time::timeout(config.probe_timeout(), attempt).await {
        Ok(Ok(stream)) => {
            // Release the throwaway handle before reporting.
            drop(stream);
            ProbeReport {
                success: true,
                message: "stream endpoint reachable".to_string(),
                readiness: TransportReadiness::Open,
                error_detail: None,
            }
        }
        Ok(Err(err)) => failure_report("stream open failed", &err),
        Err(_) => ProbeReport {
            success: false,
            message: format!(
                "stream open timed out after {}ms",
                config.probe_timeout().as_millis()
            ),
            readiness: TransportReadiness::Connecting,
            error_detail: None,
        },
    }
}

fn failure_report(message: &str, err: &StreamClientError) -> ProbeReport {
    debug!(event = "probe_failed", error = %err);
    ProbeReport {
        success: false,
        message: message.to_string(),
        readiness: TransportReadiness::Closed,
        error_detail: Some(err.to_string()),
    }
}
