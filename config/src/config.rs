//! # Configuration Structures
//!
//! This module defines all configuration structures for the semantic query
//! client.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization
//! - Use `validator` for input validation
//! - Carry defaults matching the upstream service's expected values

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Top-level configuration for the semantic query client.
///
/// ## Usage
/// ```rust,no_run
/// use config::ClientConfig;
///
/// let config = ClientConfig::default();
/// println!("Endpoint: {}", config.connection.endpoint);
/// ```
///
/// ## Fields
/// - `auth`: credential and scene fields used to sign connections
/// - `connection`: streaming endpoint, timeouts and reconnect policy
/// - `aggregation`: completion heuristic tuning
/// - `query`: overall per-query deadline
/// - `conversion`: optional post-processing endpoint
/// - `history`: where the query ledger is persisted
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    #[validate(nested)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    #[validate(nested)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    #[validate(nested)]
    pub query: QueryConfig,

    #[serde(default)]
    #[validate(nested)]
    pub conversion: Option<ConversionConfig>,

    #[serde(default)]
    pub history: HistoryConfig
}

/// Credential and scene fields embedded in every signed connection.
///
/// Required fields (`api_key`, `auth_id`, `data_type`, `interact_mode`) are
/// checked by the signer rather than by `validator`, so a partially filled
/// configuration can still be loaded and completed later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub auth_id: String,

    #[serde(default = "default_data_type")]
    pub data_type: String,

    #[serde(default = "default_interact_mode")]
    pub interact_mode: String,

    #[serde(default = "default_result_level")]
    pub result_level: String,

    #[serde(default = "default_scene")]
    pub scene: String,

    #[serde(default = "default_close_delay")]
    pub close_delay: String,

    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_speech_client_ver")]
    pub speech_client_ver: String,

    #[serde(default = "default_start_asr_num")]
    pub start_asr_num: String,

    #[serde(default)]
    pub vin: String,

    #[serde(default = "default_voice_active_detect")]
    pub voice_active_detect: String,

    #[serde(default)]
    pub ai_status: String
}

fn default_data_type() -> String {
    "text".to_string()
}

fn default_interact_mode() -> String {
    "continuous".to_string()
}

fn default_result_level() -> String {
    "complete".to_string()
}

fn default_scene() -> String {
    "main".to_string()
}

fn default_close_delay() -> String {
    "100".to_string()
}

fn default_device_id() -> String {
    "0".repeat(32)
}

fn default_speech_client_ver() -> String {
    "1.6.0.1_beta".to_string()
}

fn default_start_asr_num() -> String {
    "1".to_string()
}

fn default_voice_active_detect() -> String {
    "inactive".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            auth_id: String::new(),
            data_type: default_data_type(),
            interact_mode: default_interact_mode(),
            result_level: default_result_level(),
            scene: default_scene(),
            close_delay: default_close_delay(),
            device_id: default_device_id(),
            speech_client_ver: default_speech_client_ver(),
            start_asr_num: default_start_asr_num(),
            vin: String::new(),
            voice_active_detect: default_voice_active_detect(),
            ai_status: String::new()
        }
    }
}

/// Partial update for [`AuthConfig`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigPatch {
    pub api_key: Option<String>,
    pub auth_id: Option<String>,
    pub data_type: Option<String>,
    pub interact_mode: Option<String>,
    pub result_level: Option<String>,
    pub scene: Option<String>,
    pub close_delay: Option<String>,
    pub device_id: Option<String>,
    pub speech_client_ver: Option<String>,
    pub start_asr_num: Option<String>,
    pub vin: Option<String>,
    pub voice_active_detect: Option<String>,
    pub ai_status: Option<String>
}

impl AuthConfig {
    /// Returns a copy with every `Some` field of `patch` applied.
    pub fn patched(&self, patch: AuthConfigPatch) -> Self {
        Self {
            api_key: patch.api_key.unwrap_or_else(|| self.api_key.clone()),
            auth_id: patch.auth_id.unwrap_or_else(|| self.auth_id.clone()),
            data_type: patch.data_type.unwrap_or_else(|| self.data_type.clone()),
            interact_mode: patch
                .interact_mode
                .unwrap_or_else(|| self.interact_mode.clone()),
            result_level: patch
                .result_level
                .unwrap_or_else(|| self.result_level.clone()),
            scene: patch.scene.unwrap_or_else(|| self.scene.clone()),
            close_delay: patch.close_delay.unwrap_or_else(|| self.close_delay.clone()),
            device_id: patch.device_id.unwrap_or_else(|| self.device_id.clone()),
            speech_client_ver: patch
                .speech_client_ver
                .unwrap_or_else(|| self.speech_client_ver.clone()),
            start_asr_num: patch
                .start_asr_num
                .unwrap_or_else(|| self.start_asr_num.clone()),
            vin: patch.vin.unwrap_or_else(|| self.vin.clone()),
            voice_active_detect: patch
                .voice_active_detect
                .unwrap_or_else(|| self.voice_active_detect.clone()),
            ai_status: patch.ai_status.unwrap_or_else(|| self.ai_status.clone())
        }
    }
}

/// Streaming connection settings.
///
/// ## Fields
/// - `endpoint`: WebSocket URL without query string
/// - `app_id`: application id sent as the `appid` handshake parameter
/// - `connect_timeout_ms`: budget for the handshake (default: 10000)
/// - `heartbeat_interval_ms`: keep-alive period while connected (default: 30000)
/// - `reconnect_base_delay_ms`: base of the exponential backoff (default: 1000)
/// - `max_reconnect_attempts`: backoff cap (default: 5)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConnectionConfig {
    #[serde(default = "default_endpoint")]
    #[validate(length(min = 1, max = 2048))]
    pub endpoint: String,

    #[serde(default)]
    pub app_id: String,

    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 100, max = 120000))]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    #[validate(range(min = 1000, max = 600000))]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_reconnect_base_delay_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_reconnect_attempts: u32
}

fn default_endpoint() -> String {
    "ws://wsapi.xfyun.cn/v1/aiui".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10000
}

fn default_heartbeat_interval_ms() -> u64 {
    30000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            app_id: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts()
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

/// Completion heuristic tuning.
///
/// The stream has no end marker, so a reply counts as finished once
/// `idle_timeout_ms` passes without a new fragment. Slow links want a larger
/// value.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AggregationConfig {
    #[serde(default = "default_idle_timeout_ms")]
    #[validate(range(min = 10, max = 60000))]
    pub idle_timeout_ms: u64,

    /// Upper bound on the wait for the first fragment.
    #[serde(default = "default_first_fragment_timeout_ms")]
    #[validate(range(min = 10, max = 600000))]
    pub first_fragment_timeout_ms: u64
}

fn default_idle_timeout_ms() -> u64 {
    1500
}

fn default_first_fragment_timeout_ms() -> u64 {
    10000
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            first_fragment_timeout_ms: default_first_fragment_timeout_ms()
        }
    }
}

impl AggregationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn first_fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.first_fragment_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct QueryConfig {
    /// Overall deadline for one query, connection included.
    #[serde(default = "default_query_timeout_ms")]
    #[validate(range(min = 10, max = 600000))]
    pub timeout_ms: u64
}

fn default_query_timeout_ms() -> u64 {
    10000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_query_timeout_ms()
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Post-processing endpoint settings.
///
/// ## Fields
/// - `api_url`: full URL of the conversion endpoint
/// - `authorization`: bearer token, sent as `Authorization: Bearer <token>`
/// - `app_id`: application id forwarded in the request body
/// - `supplier`: upstream supplier code (default: 0)
/// - `version`: conversion version tag (default: "lastest", the literal the
///   upstream expects)
/// - `timeout_ms`: HTTP request timeout (default: 30000)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionConfig {
    #[validate(length(min = 1))]
    pub api_url: String,

    #[serde(default)]
    pub authorization: String,

    #[serde(default)]
    pub app_id: String,

    #[serde(default)]
    pub supplier: u32,

    #[serde(default = "default_conversion_version")]
    pub version: String,

    #[serde(default = "default_conversion_timeout_ms")]
    #[validate(range(min = 100, max = 300000))]
    pub timeout_ms: u64
}

fn default_conversion_version() -> String {
    "lastest".to_string()
}

fn default_conversion_timeout_ms() -> u64 {
    30000
}

impl ConversionConfig {
    pub fn new(api_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            authorization: authorization.into(),
            app_id: String::new(),
            supplier: 0,
            version: default_conversion_version(),
            timeout_ms: default_conversion_timeout_ms()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the query ledger lives. `None` keeps history in memory only.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HistoryConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.connection.endpoint, "ws://wsapi.xfyun.cn/v1/aiui");
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.aggregation.idle_timeout(), Duration::from_millis(1500));
        assert_eq!(config.query.timeout(), Duration::from_secs(10));
        assert!(config.conversion.is_none());
        assert!(config.history.directory.is_none());
    }

    #[test]
    fn test_auth_config_default() {
        let auth = AuthConfig::default();
        assert_eq!(auth.data_type, "text");
        assert_eq!(auth.interact_mode, "continuous");
        assert_eq!(auth.scene, "main");
        assert_eq!(auth.device_id.len(), 32);
        assert!(auth.api_key.is_empty());
    }

    #[test]
    fn test_auth_config_patched_replaces_only_given_fields() {
        let auth = AuthConfig {
            api_key: "K".to_string(),
            auth_id: "A".to_string(),
            ..AuthConfig::default()
        };

        let patched = auth.patched(AuthConfigPatch {
            auth_id: Some("B".to_string()),
            vin: Some("Test_10000001".to_string()),
            ..AuthConfigPatch::default()
        });

        assert_eq!(patched.api_key, "K");
        assert_eq!(patched.auth_id, "B");
        assert_eq!(patched.vin, "Test_10000001");
        assert_eq!(patched.scene, "main");
    }

    #[test]
    fn test_conversion_config_defaults() {
        let conversion = ConversionConfig::new("http://localhost/convert", "token");
        assert_eq!(conversion.supplier, 0);
        assert_eq!(conversion.version, "lastest");
        assert_eq!(conversion.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_client_config_deserializes_partial_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            [auth]
            apiKey = "K"
            authId = "A"

            [aggregation]
            idle_timeout_ms = 2500
            "#
        )
        .unwrap();

        assert_eq!(config.auth.api_key, "K");
        assert_eq!(config.auth.scene, "main");
        assert_eq!(config.aggregation.idle_timeout_ms, 2500);
        assert_eq!(config.aggregation.first_fragment_timeout_ms, 10000);
        assert_eq!(config.connection.max_reconnect_attempts, 5);
    }
}
