//! Stream session state machine.
//!
//! [`StreamSession`] owns at most one live transport handle, wires transport
//! callbacks into the listener registry and status broadcaster, and drives
//! bounded reconnection with an optional token-refresh short circuit.
//!
//! Transport failures are never surfaced to callers of
//! [`connect`](StreamSession::connect); they are converted into status
//! notifications and the reconnection pathway.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::registry::{ConnectionListenerSet, ConnectionStatus, ListenerId, ListenerRegistry};
use crate::retry::{ReconnectPolicy, RetryDecision};
use crate::stream::client::{self, StreamClientError};
use crate::stream::probe::{self, ProbeReport};
use crate::stream::proto::{
    decode_payload, is_named_event, TransportReadiness, CONNECTED_EVENT, CONNECTION_FAILED_EVENT,
    MESSAGE_EVENT,
};

/// Default timeout for the standalone connection probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default TCP connect timeout for stream requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error produced by a caller-supplied token refresh hook.
pub type TokenRefreshError = Box<dyn std::error::Error + Send + Sync>;
/// Future returned by a token refresh hook.
pub type TokenRefreshFuture = BoxFuture<'static, Result<SecretString, TokenRefreshError>>;
type TokenRefreshFn = Arc<dyn Fn() -> TokenRefreshFuture + Send + Sync>;

/// Session construction parameters.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_url: String,
    policy: ReconnectPolicy,
    probe_timeout: Duration,
    connect_timeout: Duration,
}

impl SessionConfig {
    /// Creates a config for the given stream service base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end().to_string(),
            policy: ReconnectPolicy::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the reconnect delay base.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.policy.base_delay = base_delay;
        self
    }

    /// Overrides the reconnect attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Overrides the probe verdict timeout.
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Overrides the TCP connect timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Configured stream service base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Read-only snapshot of session state.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    /// Whether the transport currently reports an open stream.
    pub connected: bool,
    /// Retries scheduled since the last successful open.
    pub reconnect_attempts: u32,
    /// Whether transport failures trigger the reconnection pathway.
    pub auto_reconnect: bool,
    /// Readiness of the transport handle.
    pub readiness: TransportReadiness,
    /// URL of the current transport handle, if any.
    pub url: Option<String>,
}

struct TransportHandle {
    task: JoinHandle<()>,
}

struct SessionState {
    handle: Option<TransportHandle>,
    connected: bool,
    auto_reconnect: bool,
    attempt_count: u32,
    had_failure_since_open: bool,
    exhausted_notified: bool,
    readiness: TransportReadiness,
    url: Option<String>,
    generation: u64,
}

struct SessionInner {
    config: SessionConfig,
    http: reqwest::Client,
    registry: ListenerRegistry,
    status_listeners: ConnectionListenerSet,
    refresh_hook: Mutex<Option<TokenRefreshFn>>,
    state: Mutex<SessionState>,
}

/// Self-healing client connection to the stream service.
///
/// One session owns at most one live transport handle at a time. Instances
/// are independent; construct one per stream endpoint and share it across
/// the application.
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

impl StreamSession {
    /// Creates a disconnected session.
    pub fn new(config: SessionConfig) -> Result<Self, StreamClientError> {
        let http = client::build_http_client(config.connect_timeout)?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                http,
                registry: ListenerRegistry::new(),
                status_listeners: ConnectionListenerSet::new(),
                refresh_hook: Mutex::new(None),
                state: Mutex::new(SessionState {
                    handle: None,
                    connected: false,
                    auto_reconnect: false,
                    attempt_count: 0,
                    had_failure_since_open: false,
                    exhausted_notified: false,
                    readiness: TransportReadiness::Closed,
                    url: None,
                    generation: 0,
                }),
            }),
        })
    }

    /// Opens the stream with `token`, releasing any prior transport handle
    /// first.
    ///
    /// An empty token is an input error: it is logged and the call aborts
    /// with no side effects. Transport failures are never returned to the
    /// caller; they feed the status broadcaster and the reconnection
    /// pathway.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, token: SecretString) {
        self.inner.connect(token);
    }

    /// Stops the session: disables auto-reconnect, releases the transport
    /// handle, and broadcasts `Disconnected`.
    ///
    /// Idempotent; calling it with no live handle is a no-op beyond the
    /// status notification.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Returns a read-only snapshot of the session state.
    pub fn status(&self) -> SessionStatus {
        self.inner.snapshot()
    }

    /// Registers a payload listener for `event_name`.
    pub fn on<F>(&self, event_name: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.on(event_name, callback)
    }

    /// Removes a payload listener previously registered with
    /// [`on`](Self::on).
    pub fn off(&self, event_name: &str, id: ListenerId) -> bool {
        self.inner.registry.off(event_name, id)
    }

    /// Subscribes to coarse connection state transitions.
    pub fn on_connection_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.status_listeners.subscribe(callback)
    }

    /// Removes a status subscriber.
    pub fn off_connection_change(&self, id: ListenerId) -> bool {
        self.inner.status_listeners.unsubscribe(id)
    }

    /// Installs the externally-owned token refresh hook.
    ///
    /// The hook is invoked at most once per connection episode, on the first
    /// transport failure after a successful open. A hook that yields a token
    /// different from the one in use short-circuits backoff and reconnects
    /// immediately.
    pub fn set_token_refresh_callback<F>(&self, hook: F)
    where
        F: Fn() -> TokenRefreshFuture + Send + Sync + 'static,
    {
        let mut guard = self
            .inner
            .refresh_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(hook));
    }

    /// Opens an independent throwaway transport and reports a single
    /// verdict.
    ///
    /// Diagnostic only: the probe never touches this session's state or its
    /// transport handle.
    pub async fn test_connection(&self, token: SecretString) -> ProbeReport {
        probe::probe_connection(&self.inner.config, token).await
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.inner.release_handle();
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(self: &Arc<Self>, token: SecretString) {
        if token.expose_secret().is_empty() {
            error!(event = "connect_rejected", reason = "empty token");
            return;
        }

        let url = match client::build_stream_url(&self.config.base_url, &token) {
            Ok(url) => url,
            Err(err) => {
                error!(event = "connect_rejected", error = %err);
                return;
            }
        };

        let generation = {
            let mut state = self.lock_state();
            state.generation += 1;
            // Tear down the previous handle before the new one exists so no
            // two transports are ever live at once.
            if let Some(handle) = state.handle.take() {
                handle.task.abort();
            }
            state.auto_reconnect = true;
            state.exhausted_notified = false;
            state.readiness = TransportReadiness::Connecting;
            state.url = Some(url.to_string());
            state.generation
        };

        info!(
            event = "stream_connecting",
            url = %client::redact_credentials(&url),
            generation
        );

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            inner.run_transport(generation, url, token).await;
        });

        let mut state = self.lock_state();
        if state.generation == generation {
            state.handle = Some(TransportHandle { task });
        } else {
            // A competing connect superseded this one between the spawn and
            // the handle insert.
            task.abort();
        }
    }

    fn disconnect(&self) {
        {
            let mut state = self.lock_state();
            state.auto_reconnect = false;
            if let Some(handle) = state.handle.take() {
                handle.task.abort();
            }
            state.connected = false;
            state.readiness = TransportReadiness::Closed;
            state.url = None;
        }
        info!(event = "stream_disconnected");
        self.status_listeners.notify(ConnectionStatus::Disconnected);
    }

    fn release_handle(&self) {
        let mut state = self.lock_state();
        state.auto_reconnect = false;
        if let Some(handle) = state.handle.take() {
            handle.task.abort();
        }
    }

    fn snapshot(&self) -> SessionStatus {
        let state = self.lock_state();
        SessionStatus {
            connected: state.connected,
            reconnect_attempts: state.attempt_count,
            auto_reconnect: state.auto_reconnect,
            readiness: state.readiness,
            url: state.url.clone(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    async fn run_transport(self: Arc<Self>, generation: u64, url: Url, token: SecretString) {
        let events = match client::open_event_stream(&self.http, &url).await {
            Ok(events) => events,
            Err(err) => {
                warn!(event = "stream_open_failed", error = %err);
                self.handle_transport_failure(generation, token).await;
                return;
            }
        };

        if !self.mark_open(generation) {
            return;
        }

        futures_util::pin_mut!(events);
        while let Some(item) = events.next().await {
            if !self.is_current(generation) {
                return;
            }
            match item {
                Ok(event) => self.dispatch(&event.event, &event.data),
                Err(eventsource_stream::EventStreamError::Transport(err)) => {
                    warn!(event = "stream_transport_error", error = %err);
                    self.handle_transport_failure(generation, token).await;
                    return;
                }
                Err(err) => {
                    // Framing hiccup on one chunk; the stream itself is
                    // still up.
                    debug!(event = "stream_frame_error", error = %err);
                }
            }
        }

        if !self.is_current(generation) {
            return;
        }
        warn!(event = "stream_ended");
        self.handle_transport_failure(generation, token).await;
    }

    /// Marks the transport open and notifies both listener surfaces.
    ///
    /// Returns `false` when the handle was superseded in the meantime.
    fn mark_open(&self, generation: u64) -> bool {
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                return false;
            }
            state.connected = true;
            state.readiness = TransportReadiness::Open;
            state.attempt_count = 0;
            state.had_failure_since_open = false;
            state.exhausted_notified = false;
        }
        info!(event = "stream_connected");
        self.registry.emit(CONNECTED_EVENT, &Value::Null);
        self.status_listeners.notify(ConnectionStatus::Connected);
        true
    }

    /// Routes one transport event through the dispatch table.
    ///
    /// Generic messages and the fixed named-event set are JSON-decoded and
    /// fanned out under the same name; malformed payloads are dropped
    /// silently per-message.
    fn dispatch(&self, name: &str, data: &str) {
        let event_name = if name.is_empty() { MESSAGE_EVENT } else { name };
        if event_name != MESSAGE_EVENT && !is_named_event(event_name) {
            debug!(event = "stream_event_ignored", name = event_name);
            return;
        }
        let Some(payload) = decode_payload(data) else {
            debug!(event = "stream_payload_dropped", name = event_name);
            return;
        };
        self.registry.emit(event_name, &payload);
    }

    /// Terminal-failure pathway: status notification, one-shot token
    /// refresh, then the reconnect policy.
    async fn handle_transport_failure(self: &Arc<Self>, generation: u64, token: SecretString) {
        let (first_failure, auto_reconnect) = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            // This task is the handle being torn down; forget it here so a
            // retry connect does not abort itself.
            state.handle = None;
            state.connected = false;
            state.readiness = TransportReadiness::Closed;
            let first_failure = !state.had_failure_since_open;
            state.had_failure_since_open = true;
            (first_failure, state.auto_reconnect)
        };

        self.status_listeners.notify(ConnectionStatus::Disconnected);

        if !auto_reconnect {
            return;
        }

        if first_failure {
            if let Some(refreshed) = self.try_refresh_token(&token).await {
                if !self.is_current(generation) {
                    return;
                }
                info!(event = "token_refreshed_reconnect");
                self.connect(refreshed);
                return;
            }
        }

        let decision = {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            match self.config.policy.decide(state.attempt_count) {
                RetryDecision::Retry { attempt, delay } => {
                    state.attempt_count = attempt;
                    Some((attempt, delay))
                }
                RetryDecision::Exhausted => {
                    if state.exhausted_notified {
                        return;
                    }
                    state.exhausted_notified = true;
                    None
                }
            }
        };

        match decision {
            Some((attempt, delay)) => {
                warn!(
                    event = "stream_retry_scheduled",
                    attempt,
                    delay_ms = delay.as_millis() as u64
                );
                tokio::time::sleep(delay).await;

                let proceed = {
                    let state = self.lock_state();
                    state.generation == generation && state.auto_reconnect
                };
                if proceed {
                    self.connect(token);
                } else {
                    debug!(event = "stream_retry_suppressed", attempt);
                }
            }
            None => {
                error!(
                    event = "stream_retry_exhausted",
                    max_attempts = self.config.policy.max_attempts
                );
                self.registry.emit(
                    CONNECTION_FAILED_EVENT,
                    &json!({ "attempts": self.config.policy.max_attempts }),
                );
            }
        }
    }

    /// Runs the refresh hook once; returns a token only when it differs from
    /// the one the failed transport was using.
    async fn try_refresh_token(&self, current: &SecretString) -> Option<SecretString> {
        let hook = {
            let guard = self
                .refresh_hook
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.clone()?
        };

        match hook().await {
            Ok(refreshed) => {
                if refreshed.expose_secret() == current.expose_secret() {
                    debug!(event = "token_refresh_unchanged");
                    None
                } else {
                    Some(refreshed)
                }
            }
            Err(err) => {
                warn!(event = "token_refresh_failed", error = %err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::{SessionConfig, StreamSession, DEFAULT_PROBE_TIMEOUT};
    use crate::stream::proto::TransportReadiness;

    #[test]
    fn config_defaults_match_documented_bounds() {
        let config = SessionConfig::new("https://api.example.com");
        assert_eq!(config.base_url(), "https://api.example.com");
        assert_eq!(config.policy.max_attempts, 5);
        assert_eq!(config.policy.base_delay, Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), DEFAULT_PROBE_TIMEOUT);
    }

    #[test]
    fn config_builders_override_defaults() {
        let config = SessionConfig::new("https://api.example.com  \n")
            .with_base_delay(Duration::from_millis(10))
            .with_max_attempts(2)
            .with_probe_timeout(Duration::from_millis(250));
        assert_eq!(config.base_url(), "https://api.example.com");
        assert_eq!(config.policy.base_delay, Duration::from_millis(10));
        assert_eq!(config.policy.max_attempts, 2);
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn new_session_starts_disconnected() {
        let session =
            StreamSession::new(SessionConfig::new("https://api.example.com")).expect("session");
        let status = session.status();
        assert!(!status.connected);
        assert!(!status.auto_reconnect);
        assert_eq!(status.reconnect_attempts, 0);
        assert_eq!(status.readiness, TransportReadiness::Closed);
        assert!(status.url.is_none());
    }

    #[test]
    fn connect_with_empty_token_has_no_side_effects() {
        let session =
            StreamSession::new(SessionConfig::new("https://api.example.com")).expect("session");
        session.connect(SecretString::new(String::new()));

        let status = session.status();
        assert!(!status.connected);
        assert!(!status.auto_reconnect);
        assert!(status.url.is_none());
        assert_eq!(status.readiness, TransportReadiness::Closed);
    }
}
