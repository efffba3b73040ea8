//! SSE transport establishment and endpoint construction.
//!
//! One call opens one transport handle: a streaming GET request whose body is
//! parsed into named events by `eventsource-stream`. Reconnect orchestration
//! lives in [`session`](crate::stream::session); this module performs a
//! single attempt.

use std::time::Duration;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::Stream;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

/// Path of the stream endpoint relative to the configured base URL.
pub const STREAM_PATH: &str = "/api/sse-simple/";

/// Query flag that tells tunneling proxies to skip their interstitial page.
const TUNNEL_BYPASS_PARAM: (&str, &str) = ("ngrok-skip-browser-warning", "true");

/// Item yielded by an open transport handle.
pub(crate) type SseItem = Result<Event, EventStreamError<reqwest::Error>>;

/// Errors produced while establishing the stream transport.
#[derive(Debug, Error)]
pub enum StreamClientError {
    /// Connect was invoked without a token.
    #[error("connect requires a non-empty token")]
    MissingToken,

    /// The configured base URL does not form a valid endpoint.
    #[error("invalid stream endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    /// Request-level transport failure.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),

    /// The endpoint answered with a body that is not an event stream.
    #[error("unexpected content-type {0:?}")]
    ContentType(Option<String>),
}

/// Builds the stream URL for `token` against `base_url`.
///
/// The token is appended as a URL-encoded query credential. When the target
/// host matches a known tunneling-proxy pattern the bypass-warning flag is
/// appended as well.
pub fn build_stream_url(base_url: &str, token: &SecretString) -> Result<Url, StreamClientError> {
    if token.expose_secret().is_empty() {
        return Err(StreamClientError::MissingToken);
    }

    let endpoint = format!("{}{}", base_url.trim_end_matches('/'), STREAM_PATH);
    let mut url = Url::parse(&endpoint)?;
    url.query_pairs_mut()
        .append_pair("token", token.expose_secret());
    if is_tunneling_proxy_host(&url) {
        url.query_pairs_mut()
            .append_pair(TUNNEL_BYPASS_PARAM.0, TUNNEL_BYPASS_PARAM.1);
    }
    Ok(url)
}

fn is_tunneling_proxy_host(url: &Url) -> bool {
    url.host_str().is_some_and(|host| host.contains("ngrok"))
}

/// Copy of `url` with the token credential masked, for log records.
pub(crate) fn redact_credentials(url: &Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" {
                "REDACTED".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}

/// Builds the HTTP client shared by the session and its transports.
///
/// The cookie store renders the original "send credentials with the stream
/// request" contract.
pub(crate) fn build_http_client(connect_timeout: Duration) -> Result<Client, StreamClientError> {
    Client::builder()
        .cookie_store(true)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(StreamClientError::Transport)
}

/// Opens one SSE transport handle and returns the parsed event stream.
///
/// Validates the response status and Content-Type before handing the body to
/// the event-stream parser.
pub(crate) async fn open_event_stream(
    http: &Client,
    url: &Url,
) -> Result<impl Stream<Item = SseItem>, StreamClientError> {
    let response = http
        .get(url.clone())
        .header(header::ACCEPT, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(StreamClientError::HttpStatus(status));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    if !content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("text/event-stream"))
    {
        return Err(StreamClientError::ContentType(content_type));
    }

    Ok(response.bytes_stream().eventsource())
}
