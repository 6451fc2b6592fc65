use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error
}

impl ConnectionState {
    pub fn description(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "not connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "connection error"
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error"
        };
        f.write_str(name)
    }
}

/// One decoded text frame from the semantic stream.
///
/// The upstream sends `{ intent?: {...}, data?: { content?, ... } }`; any other
/// top-level keys are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>
}

impl StreamFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `data.content` when present, else `data`, else the whole frame, as text.
    pub fn content(&self) -> String {
        match &self.data {
            Some(serde_json::Value::Object(map)) => match map.get("content") {
                Some(serde_json::Value::String(content)) => content.clone(),
                Some(other) => other.to_string(),
                None => serde_json::Value::Object(map.clone()).to_string()
            },
            Some(other) => other.to_string(),
            None => serde_json::to_string(self).unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String
}

/// Everything the connection reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Message(StreamFrame),
    Closed(CloseInfo),
    Error(String),
    StateChanged(ConnectionState)
}
