//! HTTP boundary to the sync server.
//!
//! The server is an external collaborator. It exposes three endpoints:
//!
//! - `POST /account/login` with `{password}` returning `{data: {token}}`
//! - `GET /sync/list-user-files` returning `{data: FileInfo[]}`
//! - `POST /sync/sync` taking and returning a binary envelope
//!
//! [`SyncTransport`] abstracts them so the sync cycle can run against an
//! in-process fake.

use crate::error::SyncError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tally_engine::{wire, Error as EngineError};

/// Header carrying the session token.
pub const TOKEN_HEADER: &str = "x-actual-token";

/// Header naming the budget file being synced.
pub const FILE_ID_HEADER: &str = "x-actual-file-id";

/// A budget file known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: String,
    /// Absent until the file has been uploaded once
    pub group_id: Option<String>,
    pub name: String,
    #[serde(default, deserialize_with = "flag")]
    pub deleted: bool,
}

/// The server sends `deleted` as either a boolean or 0/1.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        None => false,
    })
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    password: &'a str,
}

/// Requests the sync cycle makes of the server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Exchange a password for a session token.
    async fn login(&self, password: &str) -> Result<String, SyncError>;

    async fn list_user_files(&self, token: &str) -> Result<Vec<FileInfo>, SyncError>;

    /// Send an encoded request envelope; returns the encoded response.
    async fn sync(&self, token: &str, file_id: &str, body: Vec<u8>) -> Result<Vec<u8>, SyncError>;
}

/// Production transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn login(&self, password: &str) -> Result<String, SyncError> {
        let response = self
            .client
            .post(self.url("/account/login"))
            .json(&LoginRequest { password })
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;

        let body: DataResponse<LoginData> = response.json().await.map_err(malformed)?;
        body.data
            .token
            .ok_or_else(|| SyncError::Auth("login returned no token".into()))
    }

    async fn list_user_files(&self, token: &str) -> Result<Vec<FileInfo>, SyncError> {
        let response = self
            .client
            .get(self.url("/sync/list-user-files"))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;

        let body: DataResponse<Vec<FileInfo>> = response.json().await.map_err(malformed)?;
        Ok(body.data)
    }

    async fn sync(&self, token: &str, file_id: &str, body: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        let response = self
            .client
            .post(self.url("/sync/sync"))
            .header(TOKEN_HEADER, token)
            .header(FILE_ID_HEADER, file_id)
            .header(reqwest::header::CONTENT_TYPE, wire::CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(network)?;
        let response = check_status(response).await?;

        let bytes = response.bytes().await.map_err(network)?;
        Ok(bytes.to_vec())
    }
}

/// Map a non-success status to the error taxonomy.
pub fn classify(status: StatusCode, body: String) -> SyncError {
    match status.as_u16() {
        401 | 403 => SyncError::Auth(body),
        400..=499 => SyncError::ServerRejected {
            status: status.as_u16(),
            body,
        },
        _ => SyncError::Network(format!("{status}: {body}")),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, %body, "Sync server returned an error");
    Err(classify(status, body))
}

fn network(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

fn malformed(e: reqwest::Error) -> SyncError {
    if e.is_decode() {
        SyncError::Decode(EngineError::Decode(format!("unexpected response body: {e}")))
    } else {
        network(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "token-expired".into()),
            SyncError::Auth(_)
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, String::new()),
            SyncError::Auth(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, "file-not-found".into()),
            SyncError::ServerRejected { status: 400, .. }
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, String::new()),
            SyncError::Network(_)
        ));
        assert!(matches!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            SyncError::Network(_)
        ));
    }

    #[test]
    fn file_info_accepts_numeric_flags() {
        let json = r#"{"data":[
            {"fileId":"f1","groupId":"g1","name":"Household","deleted":0},
            {"fileId":"f2","groupId":null,"name":"Old","deleted":1},
            {"fileId":"f3","groupId":"g3","name":"New","deleted":false}
        ]}"#;
        let parsed: DataResponse<Vec<FileInfo>> = serde_json::from_str(json).unwrap();
        let files = parsed.data;

        assert_eq!(files.len(), 3);
        assert!(!files[0].deleted);
        assert!(files[1].deleted);
        assert_eq!(files[1].group_id, None);
        assert!(!files[2].deleted);
    }
}
