//! Per-query collection of streamed fragments.
//!
//! The upstream never signals "final fragment". A query is complete once no
//! new fragment has arrived for `idle_timeout`, or once the stream closes
//! after at least one fragment.

use crate::connection::ConnectionManager;
use crate::convert::Converter;
use crate::state::{CloseInfo, ConnectionEvent, StreamFrame};
use config::AggregationConfig;
use errors::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One received frame plus its extracted text and arrival time (unix ms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFragment {
    pub content: String,
    pub timestamp: i64,
    pub original: StreamFrame
}

impl StreamFragment {
    pub fn from_frame(frame: StreamFrame) -> Self {
        Self {
            content: frame.content(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            original: frame
        }
    }
}

/// Final payload of a completed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Converted {
        semantic: Vec<StreamFragment>,
        convert: serde_json::Value
    },
    Raw {
        response: Vec<StreamFragment>
    }
}

impl QueryResponse {
    pub fn fragments(&self) -> &[StreamFragment] {
        match self {
            QueryResponse::Converted { semantic, .. } => semantic,
            QueryResponse::Raw { response } => response
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self, QueryResponse::Converted { .. })
    }
}

pub type FragmentCallback = Arc<dyn Fn(&StreamFragment) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationSettings {
    pub idle_timeout: Duration,
    pub first_fragment_timeout: Duration
}

impl From<&AggregationConfig> for AggregationSettings {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            first_fragment_timeout: config.first_fragment_timeout()
        }
    }
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self::from(&AggregationConfig::default())
    }
}

enum Signal {
    Fragment(StreamFragment, Instant),
    Closed(CloseInfo),
    Failed(String)
}

pub struct ResponseAggregator {
    settings: AggregationSettings,
    converter: Option<Arc<dyn Converter>>
}

impl ResponseAggregator {
    pub fn new(settings: AggregationSettings, converter: Option<Arc<dyn Converter>>) -> Self {
        Self { settings, converter }
    }

    /// Send `query` on `connection` and collect its fragments until settled.
    ///
    /// `on_fragment` runs synchronously on the connection's reader task for
    /// every fragment. The subscription installed here is removed on every
    /// exit path.
    pub async fn collect(
        &self,
        connection: &ConnectionManager,
        query: &str,
        on_fragment: Option<FragmentCallback>
    ) -> QueryResult<QueryResponse> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _subscription = connection.subscribe(Arc::new(move |event| {
            let signal = match event {
                ConnectionEvent::Message(frame) => {
                    let fragment = StreamFragment::from_frame(frame.clone());
                    if let Some(callback) = &on_fragment {
                        callback(&fragment);
                    }
                    Signal::Fragment(fragment, Instant::now())
                }
                ConnectionEvent::Closed(close) => Signal::Closed(close.clone()),
                ConnectionEvent::Error(message) => Signal::Failed(message.clone()),
                ConnectionEvent::StateChanged(_) => return
            };
            let _ = tx.send(signal);
        }));

        connection.send_query(query)?;

        let fragments = settle(&mut rx, self.settings).await?;
        Ok(self.finish(fragments).await)
    }

    async fn finish(&self, fragments: Vec<StreamFragment>) -> QueryResponse {
        let last_content = fragments
            .last()
            .map(|fragment| fragment.content.as_str())
            .filter(|content| !content.is_empty());

        if let (Some(converter), Some(raw)) = (&self.converter, last_content) {
            let result = converter.convert(raw).await;
            if result.success {
                return QueryResponse::Converted {
                    semantic: fragments,
                    convert: result.data.unwrap_or(serde_json::Value::Null)
                };
            }
            warn!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "Conversion failed, returning raw fragments"
            );
        }

        QueryResponse::Raw {
            response: fragments
        }
    }
}

async fn settle(
    rx: &mut mpsc::UnboundedReceiver<Signal>,
    settings: AggregationSettings
) -> QueryResult<Vec<StreamFragment>> {
    let mut fragments = Vec::new();
    let mut deadline = Instant::now() + settings.first_fragment_timeout;

    loop {
        tokio::select! {
            signal = rx.recv() => match signal {
                Some(Signal::Fragment(fragment, arrived)) => {
                    debug!(fragments = fragments.len() + 1, "Fragment received");
                    fragments.push(fragment);
                    deadline = arrived + settings.idle_timeout;
                }
                Some(Signal::Closed(close)) => {
                    if fragments.is_empty() {
                        return Err(QueryError::response_timeout(format!(
                            "connection closed before any response (code {:?}, reason {:?})",
                            close.code, close.reason
                        )));
                    }
                    info!(fragments = fragments.len(), "Stream closed, completing query");
                    return Ok(fragments);
                }
                Some(Signal::Failed(message)) => {
                    return Err(QueryError::transport(message));
                }
                None => {
                    return Err(QueryError::transport("event stream ended"));
                }
            },
            () = tokio::time::sleep_until(deadline) => {
                if fragments.is_empty() {
                    return Err(QueryError::response_timeout(format!(
                        "no response within {}ms",
                        settings.first_fragment_timeout.as_millis()
                    )));
                }
                info!(fragments = fragments.len(), "Stream idle, completing query");
                return Ok(fragments);
            }
        }
    }
}
