//! # Configuration Validation
//!
//! Range and presence checks for [`ClientConfig`] using the `validator`
//! crate.

use crate::config::ClientConfig;
use validator::Validate;

/// Validate configuration structure.
///
/// ## Validation Rules
/// ### Connection
/// - `endpoint`: 1-2048 characters
/// - `connect_timeout_ms`: 100-120000
/// - `heartbeat_interval_ms`: 1000-600000
/// - `reconnect_base_delay_ms`: 1-60000
/// - `max_reconnect_attempts`: 1-20
///
/// ### Aggregation
/// - `idle_timeout_ms`: 10-60000
/// - `first_fragment_timeout_ms`: 10-600000
///
/// ### Query
/// - `timeout_ms`: 10-600000
///
/// ### Conversion (when present)
/// - `api_url`: non-empty
/// - `timeout_ms`: 100-300000
///
/// Credential fields are not checked here; the signer reports them.
pub fn validate(config: &ClientConfig) -> Result<(), validator::ValidationErrors> {
    config.validate()
}
