use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const END_OF_UTTERANCE: &str = "--end--";

#[derive(Debug, Error)]
pub enum MockError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error)
}

pub type MockResult<T> = Result<T, MockError>;

/// `{"data":{"content": <content>}}`, the usual shape of a reply frame.
pub fn content_frame(content: &str) -> String {
    serde_json::json!({ "data": { "sub": "nlp", "content": content } }).to_string()
}

/// How the server answers each utterance.
#[derive(Debug, Clone, Default)]
pub struct Script {
    frames: Vec<String>,
    gap: Duration,
    close_code: Option<u16>,
    drop_after: bool,
    reject_handshake: bool
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw text frame.
    pub fn frame(mut self, text: impl Into<String>) -> Self {
        self.frames.push(text.into());
        self
    }

    /// Delay before each frame.
    pub fn gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    /// Close the socket with `code` after the frames are sent.
    pub fn then_close(mut self, code: u16) -> Self {
        self.close_code = Some(code);
        self
    }

    /// Drop the TCP stream after the frames are sent, without a close frame.
    pub fn then_drop(mut self) -> Self {
        self.drop_after = true;
        self
    }

    /// Answer every handshake with 401.
    pub fn reject_handshake(mut self) -> Self {
        self.reject_handshake = true;
        self
    }
}

#[derive(Default)]
struct Recorded {
    handshakes: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>
}

pub struct MockSemanticServer {
    addr: SocketAddr,
    recorded: Arc<Recorded>,
    accept_loop: JoinHandle<()>
}

impl MockSemanticServer {
    pub async fn start(script: Script) -> MockResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let recorded = Arc::new(Recorded::default());
        tracing::debug!("Mock semantic server listening on {addr}");

        let loop_recorded = Arc::clone(&recorded);
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let script = script.clone();
                        let recorded = Arc::clone(&loop_recorded);
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, script, recorded).await {
                                tracing::debug!("Mock connection from {peer_addr} ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {e}");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            addr,
            recorded,
            accept_loop
        })
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/v1/aiui", self.addr)
    }

    /// Request URIs of every handshake attempt, accepted or not.
    pub fn handshakes(&self) -> Vec<String> {
        self.recorded.handshakes.lock().clone()
    }

    /// Every text message received, across all connections, in order.
    pub fn received(&self) -> Vec<String> {
        self.recorded.messages.lock().clone()
    }
}

impl Drop for MockSemanticServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(stream: TcpStream, script: Script, recorded: Arc<Recorded>) -> MockResult<()> {
    let reject = script.reject_handshake;
    let handshake_log = Arc::clone(&recorded);
    let callback = move |request: &Request, response: Response| {
        handshake_log.handshakes.lock().push(request.uri().to_string());
        if reject {
            let mut refusal = ErrorResponse::new(Some("invalid checksum".to_string()));
            *refusal.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(refusal);
        }
        Ok(response)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(incoming) = ws_receiver.next().await {
        match incoming? {
            Message::Text(text) => {
                recorded.messages.lock().push(text.to_string());
                if text.as_str() != END_OF_UTTERANCE {
                    continue;
                }

                for frame in &script.frames {
                    if !script.gap.is_zero() {
                        tokio::time::sleep(script.gap).await;
                    }
                    ws_sender.send(Message::Text(frame.clone().into())).await?;
                }

                if script.drop_after {
                    return Ok(());
                }

                if let Some(code) = script.close_code {
                    ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "scripted close".into()
                        })))
                        .await?;
                }
            }
            Message::Close(_) => break,
            Message::Ping(data) => ws_sender.send(Message::Pong(data)).await?,
            _ => {}
        }
    }

    Ok(())
}
