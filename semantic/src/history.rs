//! Bounded, newest-first log of past queries.

use crate::aggregator::QueryResponse;
use crate::store::KeyValueStore;
use errors::{QueryError, QueryResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const HISTORY_KEY: &str = "semantic-query-history";
pub const MAX_HISTORY_ITEMS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
    Timeout
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
            QueryStatus::Timeout => "timeout"
        };
        f.write_str(name)
    }
}

/// Result of one attempted query, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<QueryResponse>,

    pub duration_ms: u64,
    pub status: QueryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>
}

/// Persisted form of a [`QueryOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub timestamp: i64,
    pub query: String,
    pub response: String,
    pub duration: u64,
    pub status: QueryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>
}

impl HistoryRecord {
    pub fn from_outcome(outcome: &QueryOutcome, timestamp: i64) -> Self {
        let response = outcome
            .response
            .as_ref()
            .and_then(|response| serde_json::to_string(response).ok())
            .unwrap_or_default();

        Self {
            timestamp,
            query: outcome.query.clone(),
            response,
            duration: outcome.duration_ms,
            status: outcome.status,
            message: outcome.message.clone()
        }
    }
}

pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    write_lock: Mutex<()>
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, HISTORY_KEY)
    }

    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(())
        }
    }

    /// Prepend a record for `outcome`, keeping the newest
    /// [`MAX_HISTORY_ITEMS`].
    pub fn record(&self, outcome: &QueryOutcome) -> QueryResult<()> {
        let record = HistoryRecord::from_outcome(outcome, chrono::Utc::now().timestamp_millis());

        let _guard = self.write_lock.lock();
        let mut records = self.load()?;
        records.insert(0, record);
        records.truncate(MAX_HISTORY_ITEMS);
        debug!(status = %outcome.status, entries = records.len(), "Recording query history");
        self.save(&records)
    }

    pub fn list(&self) -> QueryResult<Vec<HistoryRecord>> {
        self.load()
    }

    /// Out-of-range indices are ignored.
    pub fn delete(&self, index: usize) -> QueryResult<()> {
        let _guard = self.write_lock.lock();
        let mut records = self.load()?;
        if index >= records.len() {
            debug!(index, entries = records.len(), "History index out of range");
            return Ok(());
        }
        records.remove(index);
        self.save(&records)
    }

    pub fn clear(&self) -> QueryResult<()> {
        let _guard = self.write_lock.lock();
        self.store
            .remove(&self.key)
            .map_err(|e| QueryError::storage(&self.key, e.to_string()))
    }

    fn load(&self) -> QueryResult<Vec<HistoryRecord>> {
        let raw = self
            .store
            .get(&self.key)
            .map_err(|e| QueryError::storage(&self.key, e.to_string()))?;

        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding unreadable query history");
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, records: &[HistoryRecord]) -> QueryResult<()> {
        let raw = serde_json::to_string(records)
            .map_err(|e| QueryError::storage(&self.key, e.to_string()))?;
        self.store
            .set(&self.key, &raw)
            .map_err(|e| QueryError::storage(&self.key, e.to_string()))
    }
}
