//! Push-connection management for the OpenEVSE websocket channel.
//!
//! This module owns the single persistent websocket connection to the
//! charger: the connection state machine, the reconnect/backoff policy,
//! the application-level keepalive and the inbound frame dispatcher.
//! Decoded payloads and state transitions are delivered to the owner
//! through an event channel in the order they occur.

use std::fmt::{Debug, Formatter};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

use super::options::PushOptions;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Reason reported when the charger rejects the handshake credentials.
pub const ERROR_AUTH_FAILURE: &str = "Authorization failure";
/// Reason reported when the consecutive-failure ceiling is reached.
pub const ERROR_TOO_MANY_RETRIES: &str = "Too many retries";
/// Reason reported when a keepalive ping went unanswered.
pub const ERROR_PING_TIMEOUT: &str = "No pong reply";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Lifecycle states of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection attempt has been made yet.
    #[default]
    Idle,
    /// A handshake is in progress.
    Starting,
    /// The socket is open and frames are flowing.
    Connected,
    /// The connection dropped; a retry is pending.
    Disconnected,
    /// Terminal state. No further automatic transition occurs.
    Stopped,
}

impl ConnectionState {
    /// Lowercase rendering used for logs and the `ws_state` accessor.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Starting => "starting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Stopped => "stopped",
        }
    }
}

/// Messages delivered to the owner of the push connection.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A state transition, carrying the error reason when one was recorded.
    ConnectionState {
        /// The state just entered.
        state: ConnectionState,
        /// Failure description, delivered once and then cleared.
        reason: Option<String>,
    },
    /// The decoded payload of an inbound text frame.
    Data(Map<String, Value>),
}

/// Computes retry delays after connection failures and decides when to
/// give up permanently.
#[derive(Debug)]
pub(crate) struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_failed_attempts: u32,
    failed_attempts: u32,
}

impl BackoffPolicy {
    fn new(options: &PushOptions) -> Self {
        Self {
            base_delay: options.base_delay,
            max_delay: options.max_delay,
            max_failed_attempts: options.max_failed_attempts,
            failed_attempts: 0,
        }
    }

    fn reset(&mut self) {
        self.failed_attempts = 0;
    }

    #[cfg(test)]
    fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Registers one more consecutive failure. Returns the delay to wait
    /// before the next attempt, or `None` once the ceiling is reached and
    /// no further retry should be scheduled.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.failed_attempts >= self.max_failed_attempts {
            return None;
        }
        self.failed_attempts += 1;
        Some(self.delay_for(self.failed_attempts))
    }

    /// Delay for the n-th consecutive failure: `min(base * 2^(n-1), max)`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(exponent).min(self.max_delay)
    }
}

/// Mutable connection fields shared between the receive loop and the
/// keepalive ticker. Kept in one struct behind a non-async mutex so every
/// access is a short scope with no suspension point inside.
#[derive(Debug, Default)]
struct Shared {
    state: ConnectionState,
    error_reason: Option<String>,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

/// The pong predating the most recent ping means the charger never
/// answered it.
fn pong_is_stale(last_ping: Option<Instant>, last_pong: Option<Instant>) -> bool {
    match (last_ping, last_pong) {
        (Some(ping), Some(pong)) => pong < ping,
        _ => false,
    }
}

/// A persistent, auto-reconnecting websocket session with an OpenEVSE
/// charger.
///
/// [`listen`](PushSocket::listen) drives the connection until
/// [`close`](PushSocket::close) is called or the failure ceiling is hit;
/// [`keepalive`](PushSocket::keepalive) is meant to be ticked periodically
/// by the owner while listening. The socket never panics or returns errors
/// from its driving task; every failure ends in a well-defined state
/// reported through the event channel.
pub struct PushSocket {
    uri: Url,
    credentials: Option<(String, String)>,
    events: mpsc::UnboundedSender<PushEvent>,
    options: PushOptions,
    shared: Mutex<Shared>,
    backoff: Mutex<BackoffPolicy>,
    writer: tokio::sync::Mutex<Option<WsSink>>,
}

impl Debug for PushSocket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSocket")
            .field("uri", &self.uri.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl PushSocket {
    /// Creates a socket for the given websocket endpoint. Nothing is
    /// dialed until [`listen`](PushSocket::listen) runs.
    pub fn new(
        uri: Url,
        credentials: Option<(String, String)>,
        events: mpsc::UnboundedSender<PushEvent>,
        options: PushOptions,
    ) -> Self {
        let backoff = BackoffPolicy::new(&options);
        Self {
            uri,
            credentials,
            events,
            options,
            shared: Mutex::new(Shared::default()),
            backoff: Mutex::new(backoff),
            writer: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the current connection state. Side-effect free.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Moves the state machine to `state` and notifies the owner before
    /// returning. The stored error reason rides along exactly once.
    fn transition(&self, state: ConnectionState) {
        let reason = {
            let mut shared = self.shared.lock();
            shared.state = state;
            shared.error_reason.take()
        };
        debug!("websocket {}", state.as_str());
        let _ = self.events.send(PushEvent::ConnectionState { state, reason });
    }

    fn set_error_reason(&self, reason: impl Into<String>) {
        self.shared.lock().error_reason = Some(reason.into());
    }

    /// Drives the connection until the state machine reaches `Stopped`.
    pub async fn listen(&self) {
        self.backoff.lock().reset();
        while self.state() != ConnectionState::Stopped {
            self.run_once().await;
        }
    }

    /// Stops the connection permanently and closes the transport.
    pub async fn close(&self) {
        self.transition(ConnectionState::Stopped);
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    /// One connect-dispatch-disconnect cycle.
    async fn run_once(&self) {
        self.transition(ConnectionState::Starting);

        let request = match self.handshake_request() {
            Ok(request) => request,
            Err(err) => {
                error!("invalid websocket request for {}: {err}", self.uri);
                self.set_error_reason(err.to_string());
                self.transition(ConnectionState::Stopped);
                return;
            }
        };

        match connect_async(request).await {
            Ok((stream, _response)) => {
                let (sink, source) = stream.split();
                *self.writer.lock().await = Some(sink);
                self.transition(ConnectionState::Connected);
                self.backoff.lock().reset();

                self.dispatch_frames(source).await;

                *self.writer.lock().await = None;
                if self.state() != ConnectionState::Stopped {
                    // The charger closed the stream without an error frame,
                    // e.g. an idle timeout. Give it a moment before dialing
                    // again.
                    self.transition(ConnectionState::Disconnected);
                    sleep(self.options.idle_grace).await;
                }
            }
            Err(tungstenite::Error::Http(response)) => {
                if response.status() == StatusCode::UNAUTHORIZED {
                    error!("credentials rejected by {}", self.uri);
                    self.set_error_reason(ERROR_AUTH_FAILURE);
                } else {
                    error!("unexpected handshake response: {}", response.status());
                    self.set_error_reason(format!("unexpected response: {}", response.status()));
                }
                self.transition(ConnectionState::Stopped);
            }
            Err(err) => self.handle_connect_failure(err).await,
        }
    }

    /// Retryable-failure path: back off, or stop for good once the
    /// ceiling is reached.
    async fn handle_connect_failure(&self, err: tungstenite::Error) {
        let delay = self.backoff.lock().next_delay();
        match delay {
            None => {
                self.set_error_reason(ERROR_TOO_MANY_RETRIES);
                self.transition(ConnectionState::Stopped);
            }
            Some(delay) => {
                if self.state() != ConnectionState::Stopped {
                    error!(
                        "websocket connection to {} failed, retrying in {}ms: {err}",
                        self.uri,
                        delay.as_millis(),
                    );
                    self.transition(ConnectionState::Disconnected);
                    sleep(delay).await;
                }
            }
        }
    }

    /// Reads frames off the open transport until it closes, errors or the
    /// state machine is stopped externally.
    async fn dispatch_frames(&self, mut source: WsSource) {
        while self.state() != ConnectionState::Stopped {
            let Some(message) = source.next().await else {
                break;
            };

            match message {
                Ok(Message::Text(text)) => self.dispatch_text(text.as_str()),
                Ok(Message::Close(_)) => {
                    warn!("websocket connection closed");
                    break;
                }
                // Transport-level keepalive, answered by the library.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(other) => debug!("ignoring non-text frame: {other:?}"),
                Err(err) => {
                    error!("websocket error: {err}");
                    break;
                }
            }
        }
    }

    /// Decodes a text frame and routes the payload to the owner. A `pong`
    /// marker refreshes the liveness timestamp independent of routing.
    fn dispatch_text(&self, text: &str) {
        let payload: Map<String, Value> = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("undecodable push payload: {err}");
                return;
            }
        };

        if payload.contains_key("pong") {
            self.shared.lock().last_pong = Some(Instant::now());
        }

        let _ = self.events.send(PushEvent::Data(payload));
    }

    /// Sends an application-level ping and flags the connection as
    /// disconnected when the previous ping went unanswered.
    ///
    /// Meant to be invoked on a fixed interval by the owner for as long as
    /// the connection is not stopped.
    pub async fn keepalive(&self) {
        let stale = {
            let shared = self.shared.lock();
            pong_is_stale(shared.last_ping, shared.last_pong)
        };
        if stale {
            self.set_error_reason(ERROR_PING_TIMEOUT);
            self.transition(ConnectionState::Disconnected);
        }

        let frame = json!({"ping": 1}).to_string();
        debug!("sending keepalive message: {frame}");

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            debug!("keepalive skipped, no open websocket");
            return;
        };

        match sink.send(Message::Text(frame.into())).await {
            Ok(()) => {
                self.shared.lock().last_ping = Some(Instant::now());
                debug!("ping message sent");
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                debug!("websocket closed while sending ping");
                self.transition(ConnectionState::Disconnected);
            }
            Err(tungstenite::Error::Capacity(err)) => {
                // Frame-level problem with the payload itself; the
                // connection is still usable.
                error!("attempt to send ping data failed: {err}");
            }
            Err(err) => {
                debug!("problem sending ping request: {err}");
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    /// Builds the handshake request, attaching HTTP basic auth when
    /// credentials are configured.
    fn handshake_request(&self) -> Result<Request, tungstenite::Error> {
        let mut request = self.uri.as_str().into_client_request()?;
        if let Some((user, password)) = &self.credentials {
            let token = STANDARD.encode(format!("{user}:{password}"));
            if let Ok(value) = HeaderValue::from_str(&format!("Basic {token}")) {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }
        Ok(request)
    }
}
