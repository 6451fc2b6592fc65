use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use config::{ClientConfig, ConversionConfig};
use errors::ErrorKind;
use parking_lot::Mutex;
use semantic::{
    ConnectionState, QueryOptions, QueryResponse, QueryStatus, SemanticQueryClient, decode_param,
};
use serde_json::json;
use testing::{MockSemanticServer, Script, content_frame};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_config(endpoint: String) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.auth.api_key = "K".to_string();
    config.auth.auth_id = "A".to_string();
    config.connection.endpoint = endpoint;
    config.connection.app_id = "app".to_string();
    config.connection.connect_timeout_ms = 2000;
    config.aggregation.idle_timeout_ms = 200;
    config.aggregation.first_fragment_timeout_ms = 3000;
    config.query.timeout_ms = 5000;
    config
}

async fn conversion_mock(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(header("Authorization", "Bearer convert-token"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"domain": "weather"})))
        .mount(&server)
        .await;
    server
}

fn with_conversion(mut config: ClientConfig, server: &MockServer) -> ClientConfig {
    config.conversion = Some(ConversionConfig::new(
        format!("{}/convert", server.uri()),
        "convert-token"
    ));
    config
}

#[tokio::test]
async fn test_two_fragments_with_conversion() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("partial"))
            .frame(content_frame("{\"intent\":{\"service\":\"weather\"}}"))
            .gap(Duration::from_millis(20))
    )
    .await
    .unwrap();
    let converter = conversion_mock(200).await;
    let client =
        SemanticQueryClient::from_config(&with_conversion(client_config(server.endpoint()), &converter))
            .unwrap();

    let outcome = client
        .send_query("weather tomorrow", "", QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Success);
    match outcome.response.as_ref().unwrap() {
        QueryResponse::Converted { semantic, convert } => {
            assert_eq!(semantic.len(), 2);
            assert_eq!(semantic[0].content, "partial");
            assert_eq!(convert["domain"], "weather");
        }
        other => panic!("expected converted response, got {other:?}"),
    }

    let records = client.history().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Success);
    let stored: serde_json::Value = serde_json::from_str(&records[0].response).unwrap();
    assert_eq!(stored["semantic"].as_array().unwrap().len(), 2);

    let received = server.received();
    assert_eq!(received[0], r#"{"intent":{"text":"weather tomorrow"}}"#);
    assert_eq!(received[1], "--end--");

    assert!(client.is_connected());
}

#[tokio::test]
async fn test_handshake_carries_signed_params() {
    let server = MockSemanticServer::start(Script::new().frame(content_frame("ok")))
        .await
        .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    client.send_query("hello", "app-7", QueryOptions::default()).await.unwrap();

    let handshakes = server.handshakes();
    assert_eq!(handshakes.len(), 1);
    let uri = &handshakes[0];
    assert!(uri.starts_with("/v1/aiui?appid=app-7&checksum="));
    assert!(uri.ends_with("&signtype=sha256"));

    let param = uri
        .split('&')
        .find_map(|pair| pair.strip_prefix("param="))
        .unwrap();
    let param = urlencoding::decode(param).unwrap();
    let scene = decode_param(&param).unwrap();
    assert_eq!(scene["auth_id"], "A");
    assert_eq!(scene["interact_mode"], "continuous");
}

#[tokio::test]
async fn test_conversion_failure_returns_raw_fragments() {
    let server = MockSemanticServer::start(Script::new().frame(content_frame("raw")))
        .await
        .unwrap();
    let converter = conversion_mock(500).await;
    let client =
        SemanticQueryClient::from_config(&with_conversion(client_config(server.endpoint()), &converter))
            .unwrap();

    let outcome = client
        .send_query("hello", "", QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, QueryStatus::Success);
    match outcome.response.unwrap() {
        QueryResponse::Raw { response } => assert_eq!(response[0].content, "raw"),
        other => panic!("expected raw response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_without_fragments_is_error() {
    let server = MockSemanticServer::start(Script::new().then_close(1000))
        .await
        .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    let err = client
        .send_query("hello", "", QueryOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResponseTimeout);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let records = client.history().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Error);
    assert!(records[0].response.is_empty());
}

#[tokio::test]
async fn test_close_after_fragments_completes_early() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("one"))
            .then_close(1000)
    )
    .await
    .unwrap();
    let mut config = client_config(server.endpoint());
    config.aggregation.idle_timeout_ms = 4000;
    let client = SemanticQueryClient::from_config(&config).unwrap();

    let started = Instant::now();
    let outcome = client
        .send_query("hello", "", QueryOptions::default())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.response.unwrap().fragments().len(), 1);
}

#[tokio::test]
async fn test_idle_completion_waits_after_last_fragment() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("a"))
            .frame(content_frame("b"))
            .gap(Duration::from_millis(100))
    )
    .await
    .unwrap();
    let mut config = client_config(server.endpoint());
    config.aggregation.idle_timeout_ms = 300;
    let client = SemanticQueryClient::from_config(&config).unwrap();

    let last_fragment = Arc::new(Mutex::new(None));
    let clone = Arc::clone(&last_fragment);
    let options = QueryOptions {
        on_fragment: Some(Arc::new(move |_fragment| {
            *clone.lock() = Some(Instant::now());
        })),
        ..QueryOptions::default()
    };

    client.send_query("hello", "", options).await.unwrap();
    let settled = Instant::now();

    let last = last_fragment.lock().unwrap();
    let quiet = settled.duration_since(last);
    assert!(quiet >= Duration::from_millis(300), "settled after {quiet:?}");
    assert!(quiet < Duration::from_millis(1500), "settled after {quiet:?}");
}

#[tokio::test]
async fn test_overall_timeout_records_timeout() {
    let server = MockSemanticServer::start(Script::new()).await.unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    let started = Instant::now();
    let err = client
        .send_query(
            "hello",
            "",
            QueryOptions::with_timeout(Duration::from_millis(300))
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResponseTimeout);
    assert!(started.elapsed() < Duration::from_secs(2));

    let records = client.history().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Timeout);

    // The connection stays open after a failed query.
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_rejected_handshake_is_connection_error() {
    let server = MockSemanticServer::start(Script::new().reject_handshake())
        .await
        .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    let err = client
        .send_query("hello", "", QueryOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(client.connection_state(), ConnectionState::Error);
    assert_eq!(client.history().list().unwrap()[0].status, QueryStatus::Error);
}

#[tokio::test]
async fn test_callbacks_see_fragments_and_states() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("a"))
            .frame(content_frame("b"))
    )
    .await
    .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    let fragments = Arc::new(AtomicUsize::new(0));
    let states = Arc::new(Mutex::new(Vec::new()));
    let fragment_count = Arc::clone(&fragments);
    let state_log = Arc::clone(&states);

    let options = QueryOptions {
        on_fragment: Some(Arc::new(move |_| {
            fragment_count.fetch_add(1, Ordering::SeqCst);
        })),
        on_state_change: Some(Arc::new(move |state| state_log.lock().push(state))),
        timeout: None
    };

    client.send_query("hello", "", options).await.unwrap();

    assert_eq!(fragments.load(Ordering::SeqCst), 2);
    assert_eq!(
        *states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test]
async fn test_connection_reused_until_closed() {
    let server = MockSemanticServer::start(Script::new().frame(content_frame("a")))
        .await
        .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    client.send_query("first", "", QueryOptions::default()).await.unwrap();
    client.send_query("second", "", QueryOptions::default()).await.unwrap();
    assert_eq!(server.handshakes().len(), 1);

    client.disconnect();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    client.send_query("third", "", QueryOptions::default()).await.unwrap();
    assert_eq!(server.handshakes().len(), 2);
    assert_eq!(client.history().list().unwrap().len(), 3);
}

#[tokio::test]
async fn test_heartbeat_sent_while_connected() {
    let server = MockSemanticServer::start(Script::new()).await.unwrap();
    let mut config = client_config(server.endpoint());
    config.connection.heartbeat_interval_ms = 100;
    let client = SemanticQueryClient::from_config(&config).unwrap();

    client.connect("").await.unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;

    let pings = server
        .received()
        .iter()
        .filter(|message| message.as_str() == "ping")
        .count();
    assert!(pings >= 2, "saw {pings} heartbeats");
}

#[tokio::test]
async fn test_queries_from_one_client_are_serialized() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("a"))
            .gap(Duration::from_millis(50))
    )
    .await
    .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    let (first, second) = tokio::join!(
        client.send_query("one", "", QueryOptions::default()),
        client.send_query("two", "", QueryOptions::default())
    );
    first.unwrap();
    second.unwrap();

    let received = server.received();
    let queries: Vec<_> = received.iter().filter(|m| m.starts_with('{')).collect();
    assert_eq!(queries.len(), 2);
    // Each query is followed by its own end token before the next one starts.
    assert_eq!(received[1], "--end--");
    assert_eq!(received[3], "--end--");
}

#[tokio::test]
async fn test_transport_error_midstream_is_recorded() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("partial"))
            .then_drop()
    )
    .await
    .unwrap();
    let mut config = client_config(server.endpoint());
    config.aggregation.idle_timeout_ms = 2000;
    let client = SemanticQueryClient::from_config(&config).unwrap();

    let err = client
        .send_query("hello", "", QueryOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(client.connection_state(), ConnectionState::Error);

    let records = client.history().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Error);
    assert!(records[0].message.as_deref().unwrap().starts_with("Transport error"));

    // The next query signs and opens a fresh connection.
    let _ = client.send_query("again", "", QueryOptions::default()).await;
    assert_eq!(server.handshakes().len(), 2);
}

#[tokio::test]
async fn test_connect_waits_for_running_query() {
    let server = MockSemanticServer::start(
        Script::new()
            .frame(content_frame("a"))
            .gap(Duration::from_millis(50))
    )
    .await
    .unwrap();
    let client = SemanticQueryClient::from_config(&client_config(server.endpoint())).unwrap();

    let (query, connect) = tokio::join!(
        client.send_query("hello", "", QueryOptions::default()),
        client.connect("")
    );

    query.unwrap();
    connect.unwrap();
    assert_eq!(server.handshakes().len(), 1);
    assert!(client.is_connected());
}
