//! # Semantic Query Client
//!
//! Sends a natural-language query over a signed, long-lived WebSocket to a
//! remote semantic-understanding service and aggregates the streamed reply.
//!
//! - [`AuthParamBuilder`] signs each connection attempt
//! - [`ConnectionManager`] owns the socket, its heartbeat and state machine
//! - [`ResponseAggregator`] decides when a streamed reply is complete
//! - [`ConversionPostProcessor`] optionally reshapes the final fragment
//! - [`HistoryStore`] keeps a bounded, newest-first ledger of queries
//! - [`SemanticQueryClient`] composes all of the above

pub mod aggregator;
pub mod client;
pub mod connection;
pub mod convert;
pub mod handlers;
pub mod history;
pub mod signer;
pub mod state;
pub mod store;

pub use aggregator::{
    AggregationSettings, FragmentCallback, QueryResponse, ResponseAggregator, StreamFragment,
};
pub use client::{QueryOptions, SemanticQueryClient, StateCallback};
pub use connection::{
    ConnectionManager, ConnectionSettings, END_OF_UTTERANCE, HEARTBEAT_TOKEN, ReconnectPolicy,
};
pub use convert::{ConversionPostProcessor, ConvertResult, Converter};
pub use handlers::{EventCallback, HandlerStack, Subscription};
pub use history::{
    HISTORY_KEY, HistoryRecord, HistoryStore, MAX_HISTORY_ITEMS, QueryOutcome, QueryStatus,
};
pub use signer::{
    AuthParamBuilder, ConfigIssue, ConfigValidation, SIGN_TYPE, SignedConnectParams,
    decode_param,
};
pub use state::{CloseInfo, ConnectionEvent, ConnectionState, StreamFrame};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
