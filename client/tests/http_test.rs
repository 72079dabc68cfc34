//! HttpTransport against the fake server served over axum.

mod common;

use common::{device, fast_options, spawn_http, FakeServer, Fault, PASSWORD};
use std::sync::Arc;
use std::time::Duration;
use tally_client::{HttpTransport, Scope, SyncError, SyncOutcome, SyncTransport};
use tally_engine::{wire, Envelope, Mutation, Timestamp, Value};

async fn setup() -> (Arc<FakeServer>, HttpTransport, String) {
    let server = FakeServer::new();
    let addr = spawn_http(server.clone()).await;
    let base_url = format!("http://{addr}");
    let transport = HttpTransport::new(&base_url, Duration::from_secs(5)).unwrap();
    (server, transport, base_url)
}

fn empty_request(file_id: &str) -> Vec<u8> {
    wire::encode(&Envelope::new(file_id, "group-1", Timestamp::zero(), vec![])).unwrap()
}

#[tokio::test]
async fn login_returns_token() {
    let (server, transport, _) = setup().await;

    let token = transport.login(PASSWORD).await.unwrap();
    assert_eq!(token, "token-1");
    assert_eq!(server.login_calls(), 1);
}

#[tokio::test]
async fn bad_password_is_a_rejection() {
    let (_, transport, _) = setup().await;

    match transport.login("guess").await {
        Err(SyncError::ServerRejected { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body, "invalid-password");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn list_user_files_parses_listing() {
    let (_, transport, _) = setup().await;
    let token = transport.login(PASSWORD).await.unwrap();

    let files = transport.list_user_files(&token).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].file_id, "file-1");
    assert_eq!(files[0].name, "Household");
    assert_eq!(files[1].group_id, None);
    assert!(files[1].deleted);
}

#[tokio::test]
async fn unknown_token_maps_to_auth() {
    let (_, transport, _) = setup().await;

    let err = transport.list_user_files("nope").await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(ref body) if body == "token-expired"));

    let err = transport
        .sync("nope", "file-1", empty_request("file-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
}

#[tokio::test]
async fn sync_round_trips_envelope() {
    let (server, transport, _) = setup().await;
    let token = transport.login(PASSWORD).await.unwrap();

    let response = transport
        .sync(&token, "file-1", empty_request("file-1"))
        .await
        .unwrap();
    let envelope = wire::decode(&response).unwrap();
    assert!(envelope.messages.is_empty());
    assert_eq!(server.requests()[0].file_id, "file-1");
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let (server, transport, _) = setup().await;
    let token = transport.login(PASSWORD).await.unwrap();

    server.push_fault(Fault::Network);
    let err = transport
        .sync(&token, "file-1", empty_request("file-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert!(err.is_retryable());

    server.push_fault(Fault::Reject);
    let err = transport
        .sync(&token, "file-1", empty_request("file-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ServerRejected { status: 400, ref body } if body == "file-not-found"));
    assert!(!err.is_retryable());

    // The server could not decode what we sent.
    let err = transport
        .sync(&token, "file-1", b"not a frame".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ServerRejected { status: 400, .. }));
}

#[tokio::test]
async fn sync_requires_envelope_content_type() {
    let (_, transport, base_url) = setup().await;
    let token = transport.login(PASSWORD).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{base_url}/sync/sync"))
        .header("x-actual-token", token)
        .header("x-actual-file-id", "file-1")
        .body(empty_request("file-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(format!("http://{addr}/"), Duration::from_secs(2)).unwrap();
    let err = transport.login(PASSWORD).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
}

#[tokio::test]
async fn devices_converge_over_http() {
    let (server, _, base_url) = setup().await;
    let http = || -> Arc<dyn SyncTransport> {
        Arc::new(HttpTransport::new(&base_url, Duration::from_secs(5)).unwrap())
    };
    let scope = Scope::new("file-1", "group-1");

    let a = device("00000000000000AA", http(), fast_options()).await;
    let b = device("00000000000000BB", http(), fast_options()).await;

    a.tracker
        .track(&scope, vec![
            Mutation::new("transactions", "tx-1", "amount", -4_250i64),
            Mutation::new("transactions", "tx-1", "notes", "Groceries"),
            Mutation::new("transactions", "tx-1", "date", 20240201i64),
        ])
        .await
        .unwrap();
    assert!(matches!(
        a.client.sync(&scope).await.unwrap(),
        SyncOutcome::Completed(_)
    ));
    b.client.sync(&scope).await.unwrap();

    let row = b.db.get_row("transactions", "tx-1").await.unwrap().unwrap();
    assert_eq!(row["amount"], Value::Number(-4250.0));
    assert_eq!(row["notes"], Value::Text("Groceries".into()));
    assert_eq!(server.log().len(), 3);
    assert_eq!(server.login_calls(), 2);
}
