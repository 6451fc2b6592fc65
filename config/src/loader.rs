//! # Environment Variable Loader
//!
//! Overlays configuration from environment variables onto a base
//! configuration.
//!
//! # Naming Convention
//! Every variable uses the `SQ_` prefix. Unset variables leave the base value
//! untouched; a set but unparseable numeric variable is an error.

use crate::config::{ClientConfig, ConversionConfig};
use std::env;
use std::path::PathBuf;

/// Load configuration from environment variables on top of defaults.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("Endpoint: {}", config.connection.endpoint);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// ### Credentials
/// - `SQ_API_KEY`, `SQ_AUTH_ID`, `SQ_DATA_TYPE`, `SQ_INTERACT_MODE`
/// - `SQ_SCENE`, `SQ_DEVICE_ID`, `SQ_VIN`
///
/// ### Connection
/// - `SQ_ENDPOINT`: WebSocket endpoint
/// - `SQ_APP_ID`: application id for the handshake
/// - `SQ_CONNECT_TIMEOUT_MS`, `SQ_HEARTBEAT_INTERVAL_MS`
///
/// ### Aggregation and query
/// - `SQ_IDLE_TIMEOUT_MS`, `SQ_FIRST_FRAGMENT_TIMEOUT_MS`, `SQ_QUERY_TIMEOUT_MS`
///
/// ### Conversion
/// - `SQ_CONVERT_URL`: enables conversion when set
/// - `SQ_CONVERT_TOKEN`, `SQ_CONVERT_APP_ID`
///
/// ### History
/// - `SQ_HISTORY_DIR`: directory for the persisted ledger
pub fn load_from_env() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    apply_env(ClientConfig::default())
}

/// Overlay `SQ_*` variables onto `base`.
pub fn apply_env(base: ClientConfig) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = base;

    override_string("SQ_API_KEY", &mut config.auth.api_key);
    override_string("SQ_AUTH_ID", &mut config.auth.auth_id);
    override_string("SQ_DATA_TYPE", &mut config.auth.data_type);
    override_string("SQ_INTERACT_MODE", &mut config.auth.interact_mode);
    override_string("SQ_SCENE", &mut config.auth.scene);
    override_string("SQ_DEVICE_ID", &mut config.auth.device_id);
    override_string("SQ_VIN", &mut config.auth.vin);

    override_string("SQ_ENDPOINT", &mut config.connection.endpoint);
    override_string("SQ_APP_ID", &mut config.connection.app_id);
    override_parsed(
        "SQ_CONNECT_TIMEOUT_MS",
        &mut config.connection.connect_timeout_ms
    )?;
    override_parsed(
        "SQ_HEARTBEAT_INTERVAL_MS",
        &mut config.connection.heartbeat_interval_ms
    )?;

    override_parsed("SQ_IDLE_TIMEOUT_MS", &mut config.aggregation.idle_timeout_ms)?;
    override_parsed(
        "SQ_FIRST_FRAGMENT_TIMEOUT_MS",
        &mut config.aggregation.first_fragment_timeout_ms
    )?;
    override_parsed("SQ_QUERY_TIMEOUT_MS", &mut config.query.timeout_ms)?;

    if let Ok(url) = env::var("SQ_CONVERT_URL") {
        let mut conversion = config
            .conversion
            .take()
            .unwrap_or_else(|| ConversionConfig::new(String::new(), String::new()));
        conversion.api_url = url;
        config.conversion = Some(conversion);
    }
    if let Some(conversion) = config.conversion.as_mut() {
        override_string("SQ_CONVERT_TOKEN", &mut conversion.authorization);
        override_string("SQ_CONVERT_APP_ID", &mut conversion.app_id);
    }

    if let Ok(dir) = env::var("SQ_HISTORY_DIR") {
        config.history.directory = Some(PathBuf::from(dir));
    }

    Ok(config)
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn override_parsed<T>(key: &str, target: &mut T) -> Result<(), Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static
{
    match env::var(key) {
        Ok(raw) => {
            *target = parse_value(key, &raw)?;
            Ok(())
        }
        Err(_) => Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| format!("{key}: {e}").into())
}
