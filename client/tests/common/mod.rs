//! Shared test fixtures: an in-process sync server with fault injection,
//! an axum front end for it, and per-device setup.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_client::{
    ChangeTracker, Credentials, Database, FileInfo, Session, SyncClient, SyncError, SyncOptions,
    SyncTransport,
};
use tally_engine::{
    wire, Envelope, Error as EngineError, HybridLogicalClock, ManualClock, Message, SchemaRegistry,
    Timestamp,
};

pub const PASSWORD: &str = "correct horse";

/// One injected failure, consumed by the next sync request.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Network,
    /// Expire every token before handling the request
    ExpireTokens,
    Reject,
    Garbage,
}

#[derive(Default)]
struct ServerState {
    log: Vec<Message>,
    tokens: HashSet<String>,
    issued: u32,
    faults: VecDeque<Fault>,
    delay: Duration,
    extra_once: Vec<Message>,
    requests: Vec<Envelope>,
    sync_calls: usize,
    login_calls: usize,
}

/// Relay server kept in memory. Stores every pushed message once and answers
/// with everything newer than the request's cursor that the requester did
/// not just send.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn push_fault(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Messages another device already pushed.
    pub fn seed(&self, messages: Vec<Message>) {
        let mut state = self.state();
        for message in messages {
            store(&mut state.log, message);
        }
    }

    /// Add messages to the next response only, without storing them.
    pub fn inject_once(&self, messages: Vec<Message>) {
        self.state().extra_once = messages;
    }

    pub fn expire_tokens(&self) {
        self.state().tokens.clear();
    }

    pub fn log(&self) -> Vec<Message> {
        self.state().log.clone()
    }

    pub fn requests(&self) -> Vec<Envelope> {
        self.state().requests.clone()
    }

    pub fn sync_calls(&self) -> usize {
        self.state().sync_calls
    }

    pub fn login_calls(&self) -> usize {
        self.state().login_calls
    }
}

fn store(log: &mut Vec<Message>, message: Message) {
    if !log.iter().any(|m| m.timestamp == message.timestamp) {
        log.push(message);
        log.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    }
}

#[async_trait]
impl SyncTransport for FakeServer {
    async fn login(&self, password: &str) -> Result<String, SyncError> {
        let mut state = self.state();
        state.login_calls += 1;
        if password != PASSWORD {
            return Err(SyncError::ServerRejected {
                status: 400,
                body: "invalid-password".into(),
            });
        }
        state.issued += 1;
        let token = format!("token-{}", state.issued);
        state.tokens.insert(token.clone());
        Ok(token)
    }

    async fn list_user_files(&self, token: &str) -> Result<Vec<FileInfo>, SyncError> {
        if !self.state().tokens.contains(token) {
            return Err(SyncError::Auth("token-expired".into()));
        }
        Ok(vec![
            FileInfo {
                file_id: "file-1".into(),
                group_id: Some("group-1".into()),
                name: "Household".into(),
                deleted: false,
            },
            FileInfo {
                file_id: "file-0".into(),
                group_id: None,
                name: "Old budget".into(),
                deleted: true,
            },
        ])
    }

    async fn sync(&self, token: &str, file_id: &str, body: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        let (delay, fault) = {
            let mut state = self.state();
            state.sync_calls += 1;
            (state.delay, state.faults.pop_front())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        match fault {
            Some(Fault::Network) => return Err(SyncError::Network("connection reset".into())),
            Some(Fault::Reject) => {
                return Err(SyncError::ServerRejected {
                    status: 400,
                    body: "file-not-found".into(),
                })
            }
            Some(Fault::Garbage) => return Ok(b"<html>502 Bad Gateway</html>".to_vec()),
            Some(Fault::ExpireTokens) => state.tokens.clear(),
            None => {}
        }
        if !state.tokens.contains(token) {
            return Err(SyncError::Auth("token-expired".into()));
        }

        let request = wire::decode(&body).map_err(SyncError::Decode)?;
        assert_eq!(request.file_id, file_id);

        let sent: HashSet<Timestamp> = request
            .messages
            .iter()
            .map(|m| m.timestamp.clone())
            .collect();
        for message in &request.messages {
            store(&mut state.log, message.clone());
        }

        let mut messages: Vec<Message> = state
            .log
            .iter()
            .filter(|m| m.timestamp > request.since && !sent.contains(&m.timestamp))
            .cloned()
            .collect();
        messages.append(&mut state.extra_once);
        state.requests.push(request);

        wire::encode(&Envelope::response(messages)).map_err(SyncError::Decode)
    }
}

/// A device: its own database, clock, tracker and sync client.
pub struct Device {
    pub db: Database,
    pub wall: Arc<ManualClock>,
    pub clock: Arc<HybridLogicalClock>,
    pub tracker: ChangeTracker,
    pub client: SyncClient,
}

pub fn fast_options() -> SyncOptions {
    SyncOptions {
        retries: 2,
        backoff: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

pub async fn device(node: &str, transport: Arc<dyn SyncTransport>, options: SyncOptions) -> Device {
    device_with(node, transport, options, Credentials::Password(PASSWORD.into())).await
}

pub async fn device_with(
    node: &str,
    transport: Arc<dyn SyncTransport>,
    options: SyncOptions,
    credentials: Credentials,
) -> Device {
    let db = Database::connect("sqlite::memory:", SchemaRegistry::finance())
        .await
        .unwrap();
    let wall = Arc::new(ManualClock::new(1_706_745_600_000));
    let clock = Arc::new(HybridLogicalClock::with_wall_clock(node, wall.clone()).unwrap());
    db.seed_clock(&clock).await.unwrap();

    let tracker = ChangeTracker::new(db.clone(), clock.clone());
    let client = SyncClient::new(
        db.clone(),
        transport,
        Session::new(credentials),
        clock.clone(),
        options,
    );
    Device {
        db,
        wall,
        clock,
        tracker,
        client,
    }
}

pub fn ts(millis: u64, counter: u16, node: &str) -> Timestamp {
    Timestamp::new(millis, counter, node).unwrap()
}

// ============================================================================
// HTTP front end
// ============================================================================

fn error_response(error: SyncError) -> Response {
    let status = match &error {
        SyncError::Auth(_) => StatusCode::UNAUTHORIZED,
        SyncError::ServerRejected { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
        }
        SyncError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    let body = match error {
        SyncError::Auth(body) | SyncError::ServerRejected { body, .. } => body,
        other => other.to_string(),
    };
    (status, body).into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn login(
    State(server): State<Arc<FakeServer>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let password = body["password"].as_str().unwrap_or_default();
    match server.login(password).await {
        Ok(token) => Json(json!({"status": "ok", "data": {"token": token}})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_user_files(State(server): State<Arc<FakeServer>>, headers: HeaderMap) -> Response {
    let token = header_value(&headers, "x-actual-token");
    match server.list_user_files(token).await {
        Ok(files) => Json(json!({"status": "ok", "data": files})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn sync(State(server): State<Arc<FakeServer>>, headers: HeaderMap, body: Bytes) -> Response {
    if header_value(&headers, header::CONTENT_TYPE.as_str()) != wire::CONTENT_TYPE {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected sync envelope").into_response();
    }
    let token = header_value(&headers, "x-actual-token");
    let file_id = header_value(&headers, "x-actual-file-id");
    match server.sync(token, file_id, body.to_vec()).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, wire::CONTENT_TYPE)], bytes).into_response(),
        Err(e) => error_response(e),
    }
}

/// Serve a fake server over HTTP on an ephemeral port.
pub async fn spawn_http(server: Arc<FakeServer>) -> SocketAddr {
    let app = Router::new()
        .route("/account/login", post(login))
        .route("/sync/list-user-files", get(list_user_files))
        .route("/sync/sync", post(sync))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Decode-error helper for assertions.
pub fn is_decode(error: &SyncError) -> bool {
    matches!(error, SyncError::Decode(EngineError::Decode(_)))
}
