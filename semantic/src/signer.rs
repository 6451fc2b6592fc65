//! Signed connection parameters.
//!
//! Every connection attempt carries a freshly derived parameter payload and a
//! SHA-256 checksum over `api_key + curtime + param`. The checksum embeds the
//! current time, so parameters are never cached or reused.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use config::{AuthConfig, AuthConfigPatch};
use errors::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const SIGN_TYPE: &str = "sha256";

/// Time-bound credential material for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedConnectParams {
    pub checksum: String,
    pub curtime: String,
    pub param_base64: String,
    pub sign_type: String
}

/// A required credential field that is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigIssue {
    MissingApiKey,
    MissingAuthId,
    MissingDataType,
    MissingInteractMode
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            ConfigIssue::MissingApiKey => "API key must not be empty",
            ConfigIssue::MissingAuthId => "auth id must not be empty",
            ConfigIssue::MissingDataType => "data type must not be empty",
            ConfigIssue::MissingInteractMode => "interaction mode must not be empty"
        };
        f.write_str(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<ConfigIssue>
}

#[derive(Serialize)]
struct UserParams<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    #[serde(rename = "dialogueId")]
    dialogue_id: &'a str,
    #[serde(rename = "hotWords")]
    hot_words: &'a str,
    #[serde(rename = "speechClientVer")]
    speech_client_ver: &'a str,
    #[serde(rename = "speechId")]
    speech_id: &'a str,
    #[serde(rename = "startAsrNum")]
    start_asr_num: &'a str,
    vin: &'a str,
    voice_active_detect: &'a str,
    #[serde(rename = "wtAppId")]
    wt_app_id: &'a str,
    #[serde(rename = "AI_STATUS")]
    ai_status: &'a str
}

#[derive(Serialize)]
struct SceneParams<'a> {
    auth_id: &'a str,
    close_delay: &'a str,
    data_type: &'a str,
    interact_mode: &'a str,
    result_level: &'a str,
    scene: &'a str,
    userparams: String
}

/// Builds [`SignedConnectParams`] from an [`AuthConfig`].
#[derive(Debug, Clone)]
pub struct AuthParamBuilder {
    config: AuthConfig
}

impl AuthParamBuilder {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> AuthConfig {
        self.config.clone()
    }

    /// Replace the fields present in `patch`. The swap happens in one
    /// assignment, so readers never see a half-applied update.
    pub fn update_config(&mut self, patch: AuthConfigPatch) {
        self.config = self.config.patched(patch);
    }

    pub fn build_connect_params(&self, query: &str) -> QueryResult<SignedConnectParams> {
        let curtime = chrono::Utc::now().timestamp().to_string();
        self.build_connect_params_at(query, curtime)
    }

    fn build_connect_params_at(
        &self,
        query: &str,
        curtime: String
    ) -> QueryResult<SignedConnectParams> {
        let config = &self.config;

        let user_params = UserParams {
            device_id: &config.device_id,
            dialogue_id: "",
            hot_words: "",
            speech_client_ver: &config.speech_client_ver,
            speech_id: "",
            start_asr_num: &config.start_asr_num,
            vin: &config.vin,
            voice_active_detect: &config.voice_active_detect,
            wt_app_id: &config.api_key,
            ai_status: &config.ai_status
        };
        let user_json = serde_json::to_string(&user_params)
            .map_err(|e| QueryError::signing(format!("user params: {e}")))?;

        let scene_params = SceneParams {
            auth_id: &config.auth_id,
            close_delay: &config.close_delay,
            data_type: &config.data_type,
            interact_mode: &config.interact_mode,
            result_level: &config.result_level,
            scene: &config.scene,
            userparams: encode_base64(&user_json)
        };
        let scene_json = serde_json::to_string(&scene_params)
            .map_err(|e| QueryError::signing(format!("scene params: {e}")))?;

        let param_base64 = encode_base64(&scene_json);
        let checksum = sha256_hex(&format!("{}{}{}", config.api_key, curtime, param_base64));

        debug!(
            query_len = query.len(),
            curtime = %curtime,
            "Built signed connect params"
        );

        Ok(SignedConnectParams {
            checksum,
            curtime,
            param_base64,
            sign_type: SIGN_TYPE.to_string()
        })
    }

    /// Reports every missing required field; never short-circuits.
    pub fn validate_config(&self) -> ConfigValidation {
        let config = &self.config;
        let checks = [
            (&config.api_key, ConfigIssue::MissingApiKey),
            (&config.auth_id, ConfigIssue::MissingAuthId),
            (&config.data_type, ConfigIssue::MissingDataType),
            (&config.interact_mode, ConfigIssue::MissingInteractMode)
        ];

        let errors: Vec<ConfigIssue> = checks
            .into_iter()
            .filter(|(value, _)| value.is_empty())
            .map(|(_, issue)| issue)
            .collect();

        ConfigValidation {
            valid: errors.is_empty(),
            errors
        }
    }
}

pub fn encode_base64(data: &str) -> String {
    STANDARD.encode(data.as_bytes())
}

pub fn decode_base64(data: &str) -> QueryResult<String> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| QueryError::signing(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| QueryError::signing(format!("invalid utf-8: {e}")))
}

/// Decode a `param_base64` payload back into its scene-parameter object.
pub fn decode_param(param_base64: &str) -> QueryResult<serde_json::Value> {
    let json = decode_base64(param_base64)?;
    serde_json::from_str(&json).map_err(|e| QueryError::signing(format!("invalid param: {e}")))
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}
