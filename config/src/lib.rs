//! # Configuration System
//!
//! Configuration for the semantic query client.
//!
//! This crate provides:
//! - Configuration structures for every client component
//! - Configuration file loading (TOML/YAML)
//! - Environment variable overlays (`SQ_*`)
//! - Configuration validation

pub mod config;
pub mod file_loader;
pub mod loader;
pub mod validator;

pub use config::{
    AggregationConfig, AuthConfig, AuthConfigPatch, ClientConfig, ConnectionConfig,
    ConversionConfig, HistoryConfig, QueryConfig,
};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{apply_env, load_from_env};
pub use self::validator::validate;
pub use ::validator::Validate;
