use crate::aggregator::{AggregationSettings, FragmentCallback, QueryResponse, ResponseAggregator};
use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::convert::{ConversionPostProcessor, Converter};
use crate::handlers::{EventCallback, Subscription};
use crate::history::{HistoryStore, QueryOutcome, QueryStatus};
use crate::signer::{AuthParamBuilder, ConfigValidation};
use crate::state::{ConnectionEvent, ConnectionState};
use crate::store::{FileStore, KeyValueStore, MemoryStore};
use config::{AuthConfigPatch, ClientConfig};
use errors::{QueryError, QueryResult};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Clone, Default)]
pub struct QueryOptions {
    pub on_fragment: Option<FragmentCallback>,
    pub on_state_change: Option<StateCallback>,
    /// Overrides the configured query timeout.
    pub timeout: Option<Duration>
}

impl QueryOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

struct ClientInner {
    signer: RwLock<AuthParamBuilder>,
    connection: ConnectionManager,
    aggregator: ResponseAggregator,
    history: HistoryStore,
    default_app_id: String,
    query_timeout: Duration,
    query_lock: tokio::sync::Mutex<()>
}

impl ClientInner {
    async fn run_query(
        &self,
        query: &str,
        app_id: &str,
        on_fragment: Option<FragmentCallback>
    ) -> QueryResult<QueryResponse> {
        let signer = self.signer.read().clone();
        self.connection
            .ensure_connected(&signer, query, app_id)
            .await?;
        self.aggregator
            .collect(&self.connection, query, on_fragment)
            .await
    }
}

/// Entry point for issuing semantic queries.
///
/// Cheap to clone; clones share one connection and one history.
#[derive(Clone)]
pub struct SemanticQueryClient {
    inner: Arc<ClientInner>
}

impl SemanticQueryClient {
    /// History goes to a [`FileStore`] when `history.directory` is set,
    /// otherwise it lives in memory.
    pub fn from_config(config: &ClientConfig) -> QueryResult<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.history.directory {
            Some(directory) => Arc::new(FileStore::new(directory)),
            None => Arc::new(MemoryStore::new())
        };

        let converter: Option<Arc<dyn Converter>> = match &config.conversion {
            Some(conversion) => Some(Arc::new(ConversionPostProcessor::new(conversion.clone())?)),
            None => None
        };

        Ok(Self::from_parts(config, store, converter))
    }

    pub fn from_parts(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
        converter: Option<Arc<dyn Converter>>
    ) -> Self {
        let inner = ClientInner {
            signer: RwLock::new(AuthParamBuilder::new(config.auth.clone())),
            connection: ConnectionManager::new(ConnectionSettings::from(&config.connection)),
            aggregator: ResponseAggregator::new(
                AggregationSettings::from(&config.aggregation),
                converter
            ),
            history: HistoryStore::new(store),
            default_app_id: config.connection.app_id.clone(),
            query_timeout: config.query.timeout(),
            query_lock: tokio::sync::Mutex::new(())
        };

        Self {
            inner: Arc::new(inner)
        }
    }

    /// Run one query to completion and record it in history.
    ///
    /// An empty `app_id` falls back to the configured one. When the timeout
    /// elapses the caller gets `ResponseTimeout`, but the query keeps running
    /// in the background and its late result is dropped. Queries from one
    /// client run one at a time.
    pub async fn send_query(
        &self,
        query: &str,
        app_id: &str,
        options: QueryOptions
    ) -> QueryResult<QueryOutcome> {
        if query.trim().is_empty() {
            return Err(QueryError::validation("query must not be empty"));
        }

        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.inner.query_timeout);
        let app_id = if app_id.is_empty() {
            self.inner.default_app_id.clone()
        } else {
            app_id.to_string()
        };

        let _state_subscription = options.on_state_change.map(|callback| {
            self.inner.connection.subscribe(Arc::new(move |event| {
                if let ConnectionEvent::StateChanged(state) = event {
                    callback(*state);
                }
            }))
        });

        let inner = Arc::clone(&self.inner);
        let owned_query = query.to_string();
        let on_fragment = options.on_fragment;
        let work = tokio::spawn(async move {
            let _turn = inner.query_lock.lock().await;
            inner.run_query(&owned_query, &app_id, on_fragment).await
        });

        let (result, timed_out) = match tokio::time::timeout(timeout, work).await {
            Ok(Ok(result)) => (result, false),
            Ok(Err(join_error)) => (
                Err(QueryError::transport(format!("query task failed: {join_error}"))),
                false
            ),
            Err(_) => (
                Err(QueryError::response_timeout(format!(
                    "no complete response within {}ms",
                    timeout.as_millis()
                ))),
                true
            )
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (outcome, failure) = match result {
            Ok(response) => (
                QueryOutcome {
                    query: query.to_string(),
                    response: Some(response),
                    duration_ms,
                    status: QueryStatus::Success,
                    message: None
                },
                None
            ),
            Err(error) => (
                QueryOutcome {
                    query: query.to_string(),
                    response: None,
                    duration_ms,
                    status: if timed_out {
                        QueryStatus::Timeout
                    } else {
                        QueryStatus::Error
                    },
                    message: Some(error.to_string())
                },
                Some(error)
            )
        };

        info!(
            status = %outcome.status,
            duration_ms,
            connection = %self.inner.connection.state(),
            "Query settled"
        );

        if let Err(e) = self.inner.history.record(&outcome) {
            warn!(error = %e, "Failed to record query history");
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(outcome)
        }
    }

    /// Open a connection now instead of on the first query.
    ///
    /// Waits for any running query, so it never races a query's handshake.
    pub async fn connect(&self, app_id: &str) -> QueryResult<()> {
        let _turn = self.inner.query_lock.lock().await;
        let app_id = if app_id.is_empty() {
            self.inner.default_app_id.as_str()
        } else {
            app_id
        };
        let signer = self.inner.signer.read().clone();
        self.inner
            .connection
            .ensure_connected(&signer, "", app_id)
            .await
    }

    /// Like [`connect`](Self::connect), retrying retryable failures with
    /// exponential backoff until the configured attempt cap.
    pub async fn connect_with_backoff(&self, app_id: &str) -> QueryResult<()> {
        loop {
            let error = match self.connect(app_id).await {
                Ok(()) => return Ok(()),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => error
            };

            let Some(delay) = self.inner.connection.begin_reconnect() else {
                return Err(error);
            };
            warn!(
                error = %error,
                attempt = self.inner.connection.attempt_count(),
                delay_ms = delay.as_millis() as u64,
                "Connect failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn connection_state_description(&self) -> &'static str {
        self.inner.connection.state_description()
    }

    pub fn subscribe(&self, callback: EventCallback) -> Subscription {
        self.inner.connection.subscribe(callback)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.inner.history
    }

    pub fn update_auth_config(&self, patch: AuthConfigPatch) {
        self.inner.signer.write().update_config(patch);
    }

    pub fn validate_config(&self) -> ConfigValidation {
        self.inner.signer.read().validate_config()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.connection.attempt_count()
    }

    pub fn reset_reconnect_attempts(&self) {
        self.inner.connection.reset_attempts();
    }
}
