//! Streaming connection lifecycle.
//!
//! [`ConnectionManager`] owns at most one live WebSocket at a time and a small
//! state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open──▶ Connected
//!       ▲                      │                    │
//!       │                  fail/timeout           close
//!       │                      ▼                    │
//!       └──────────────────  Error ◀──transport error┘
//! ```
//!
//! A closed connection is never reopened here. Signed parameters expire, so
//! the next query signs and opens a fresh connection through
//! [`ConnectionManager::ensure_connected`].

use crate::handlers::{EventCallback, HandlerStack, Subscription};
use crate::signer::{AuthParamBuilder, SIGN_TYPE, SignedConnectParams};
use crate::state::{CloseInfo, ConnectionEvent, ConnectionState, StreamFrame};
use config::ConnectionConfig;
use errors::{QueryError, QueryResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

/// Sent after every query to mark the end of the utterance.
pub const END_OF_UTTERANCE: &str = "--end--";

/// Keep-alive payload sent on the heartbeat interval.
pub const HEARTBEAT_TOKEN: &str = "ping";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exponential backoff bookkeeping for callers that retry connections.
///
/// delay = `base_delay` × 2^(attempt−1), for attempts `1..=max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor))
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            reconnect: ReconnectPolicy {
                base_delay: config.reconnect_base_delay(),
                max_attempts: config.max_reconnect_attempts
            }
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>
}

impl Link {
    fn abort_background(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<ConnectionState>,
    handlers: HandlerStack,
    attempts: AtomicU32,
    generation: AtomicU64,
    link: Mutex<Option<Link>>,
    current_query: Mutex<String>
}

impl Shared {
    /// Returns `false` for a no-op transition; subscribers are not notified.
    fn set_state(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if *state == next {
                return false;
            }
            std::mem::replace(&mut *state, next)
        };

        info!(from = %previous, to = %next, "Connection state changed");
        self.handlers.dispatch(&ConnectionEvent::StateChanged(next));
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn take_link(&self) -> Option<Link> {
        self.link.lock().take()
    }

    fn on_frame(&self, generation: u64, frame: StreamFrame) {
        if self.is_current(generation) {
            self.handlers.dispatch(&ConnectionEvent::Message(frame));
        }
    }

    fn on_closed(&self, generation: u64, close: CloseInfo) {
        if !self.is_current(generation) {
            return;
        }

        info!(
            code = ?close.code,
            reason = %close.reason,
            "Connection closed, next query will reconnect"
        );

        if let Some(mut link) = self.take_link() {
            if let Some(heartbeat) = link.heartbeat.take() {
                heartbeat.abort();
            }
        }
        self.set_state(ConnectionState::Disconnected);
        self.handlers.dispatch(&ConnectionEvent::Closed(close));
    }

    fn on_transport_error(&self, generation: u64, message: String) {
        if !self.is_current(generation) {
            return;
        }

        error!(error = %message, "Connection transport error");

        if let Some(mut link) = self.take_link() {
            if let Some(heartbeat) = link.heartbeat.take() {
                heartbeat.abort();
            }
            link.writer.abort();
        }
        self.set_state(ConnectionState::Error);
        self.handlers.dispatch(&ConnectionEvent::Error(message));
    }
}

/// Owns the live streaming connection and its state machine.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    shared: Arc<Shared>
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            shared: Arc::new(Shared::default())
        }
    }

    /// Number of event subscribers currently installed.
    pub fn subscriber_count(&self) -> usize {
        self.shared.handlers.len()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn state_description(&self) -> &'static str {
        self.state().description()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.shared.link.lock().is_some()
    }

    /// Install an event observer for as long as the returned guard lives.
    pub fn subscribe(&self, callback: EventCallback) -> Subscription {
        self.shared.handlers.install(callback)
    }

    pub fn attempt_count(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn reset_attempts(&self) {
        self.shared.attempts.store(0, Ordering::SeqCst);
    }

    /// Record one more reconnect attempt and return how long to wait before
    /// making it, or `None` once the policy's cap is exceeded.
    pub fn begin_reconnect(&self) -> Option<Duration> {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.settings.reconnect.delay_for(attempt) {
            Some(delay) => {
                self.shared.set_state(ConnectionState::Reconnecting);
                info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                Some(delay)
            }
            None => {
                error!(attempt, "Reconnect attempts exhausted");
                None
            }
        }
    }

    /// The text of the last query sent on any connection.
    pub fn current_query(&self) -> String {
        self.shared.current_query.lock().clone()
    }

    pub fn handshake_url(&self, params: &SignedConnectParams, app_id: &str) -> String {
        format!(
            "{}?appid={}&checksum={}&curtime={}&param={}&signtype={}",
            self.settings.endpoint,
            urlencoding::encode(app_id),
            urlencoding::encode(&params.checksum),
            urlencoding::encode(&params.curtime),
            urlencoding::encode(&params.param_base64),
            SIGN_TYPE
        )
    }

    /// Sign fresh parameters and connect, unless already connected.
    ///
    /// Makes at most one attempt; retry policy belongs to the caller.
    pub async fn ensure_connected(
        &self,
        signer: &AuthParamBuilder,
        query: &str,
        app_id: &str
    ) -> QueryResult<()> {
        if self.is_connected() {
            debug!("Connection already open, reusing it");
            return Ok(());
        }

        debug!(state = %self.state(), "Opening a fresh connection");
        let params = signer.build_connect_params(query)?;
        self.connect(&params, app_id).await
    }

    pub async fn connect(&self, params: &SignedConnectParams, app_id: &str) -> QueryResult<()> {
        if self.is_connected() {
            debug!("Connection already open");
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut stale) = self.shared.take_link() {
            stale.abort_background();
            stale.writer.abort();
        }

        let url = self.handshake_url(params, app_id);
        info!(endpoint = %self.settings.endpoint, "Opening semantic stream");

        let stream = match tokio::time::timeout(self.settings.connect_timeout, connect_async(url))
            .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let reason = e.to_string();
                error!(error = %reason, "Handshake failed");
                self.shared.set_state(ConnectionState::Error);
                self.shared
                    .handlers
                    .dispatch(&ConnectionEvent::Error(reason.clone()));
                return Err(QueryError::connection(reason));
            }
            Err(_) => {
                let reason = format!(
                    "connect timed out after {}ms",
                    self.settings.connect_timeout.as_millis()
                );
                error!(error = %reason, "Handshake timed out");
                self.shared.set_state(ConnectionState::Error);
                return Err(QueryError::connection(reason));
            }
        };

        if !self.shared.is_current(generation) {
            return Err(QueryError::connection("connection superseded while opening"));
        }

        let (sink, source) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, outbound_rx));

        *self.shared.link.lock() = Some(Link {
            generation,
            outbound: outbound.clone(),
            writer,
            reader: None,
            heartbeat: None
        });
        self.reset_attempts();
        self.shared.set_state(ConnectionState::Connected);

        let reader = tokio::spawn(read_loop(Arc::clone(&self.shared), generation, source));
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::downgrade(&self.shared),
            outbound,
            self.settings.heartbeat_interval
        ));

        match self.shared.link.lock().as_mut() {
            Some(link) if link.generation == generation => {
                link.reader = Some(reader);
                link.heartbeat = Some(heartbeat);
            }
            _ => {
                reader.abort();
                heartbeat.abort();
            }
        }

        Ok(())
    }

    /// Send the query followed by the end-of-utterance token.
    pub fn send_query(&self, query: &str) -> QueryResult<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(QueryError::connection(format!("not connected, state: {state}")));
        }

        let guard = self.shared.link.lock();
        let link = guard
            .as_ref()
            .ok_or_else(|| QueryError::connection("no open connection"))?;

        *self.shared.current_query.lock() = query.to_string();

        let payload = serde_json::json!({ "intent": { "text": query } }).to_string();
        debug!(query = %query, "Sending query");

        link.outbound
            .send(Message::Text(payload.into()))
            .and_then(|()| link.outbound.send(Message::Text(END_OF_UTTERANCE.into())))
            .map_err(|_| QueryError::transport("outbound channel closed"))
    }

    /// Close the connection locally. No close event is delivered to
    /// subscribers; the state moves to `Disconnected`.
    pub fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut link) = self.shared.take_link() {
            link.abort_background();
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client closing".into()
            }));
            if link.outbound.send(close).is_err() {
                link.writer.abort();
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(mut link) = self.shared.take_link() {
            link.abort_background();
            link.writer.abort();
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "Failed to write to semantic stream");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(shared: Arc<Shared>, generation: u64, mut source: SplitStream<WsStream>) {
    while let Some(incoming) = source.next().await {
        match incoming {
            Ok(Message::Text(text)) => match StreamFrame::parse(text.as_str()) {
                Ok(frame) => {
                    debug!(len = text.len(), "Received frame");
                    shared.on_frame(generation, frame);
                }
                Err(e) => {
                    warn!(error = %e, payload = %text.as_str(), "Dropping unparseable frame");
                }
            },
            Ok(Message::Close(frame)) => {
                let close = match frame {
                    Some(frame) => CloseInfo {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string()
                    },
                    None => CloseInfo {
                        code: None,
                        reason: String::new()
                    }
                };
                shared.on_closed(generation, close);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                shared.on_transport_error(generation, e.to_string());
                return;
            }
        }
    }

    shared.on_closed(
        generation,
        CloseInfo {
            code: None,
            reason: "stream ended".to_string()
        }
    );
}

async fn heartbeat_loop(
    shared: Weak<Shared>,
    outbound: mpsc::UnboundedSender<Message>,
    period: Duration
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;

        let Some(live) = shared.upgrade() else {
            return;
        };
        if *live.state.lock() != ConnectionState::Connected {
            continue;
        }
        if outbound.send(Message::Text(HEARTBEAT_TOKEN.into())).is_err() {
            return;
        }
        debug!("Heartbeat sent");
    }
}
