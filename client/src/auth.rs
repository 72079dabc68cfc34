//! Credentials and the cached session token.

use crate::error::SyncError;
use crate::transport::SyncTransport;
use std::fmt;
use tokio::sync::RwLock;

/// How the client proves its identity to the server.
#[derive(Clone)]
pub enum Credentials {
    /// Exchanged for a token on login; allows re-authentication.
    Password(String),
    /// A token obtained elsewhere. Cannot be refreshed.
    Token(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

/// Token cache shared by every sync cycle.
pub struct Session {
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(credentials: Credentials) -> Self {
        let token = match &credentials {
            Credentials::Token(token) => Some(token.clone()),
            Credentials::Password(_) => None,
        };
        Self {
            credentials,
            token: RwLock::new(token),
        }
    }

    /// Whether an expired token can be replaced by logging in again.
    pub fn can_reauthenticate(&self) -> bool {
        matches!(self.credentials, Credentials::Password(_))
    }

    /// Current token, logging in first if none is cached.
    pub async fn token(&self, transport: &dyn SyncTransport) -> Result<String, SyncError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let Credentials::Password(password) = &self.credentials else {
            return Err(SyncError::Auth("token rejected and no password to renew it".into()));
        };

        let mut slot = self.token.write().await;
        // Another task may have logged in while we waited for the lock.
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        tracing::debug!("Logging in to sync server");
        let token = transport.login(password).await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token after the server rejected it.
    pub async fn invalidate(&self) {
        if self.can_reauthenticate() {
            *self.token.write().await = None;
        }
    }
}
