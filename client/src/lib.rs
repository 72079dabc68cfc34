//! # Tally Client
//!
//! Local persistence and server sync for the tally engine.
//!
//! - [`db`]: SQLite tables for the finance datasets, per-cell clocks, the
//!   outbox and sync cursors
//! - [`tracker`]: stamps local changes and queues them
//! - [`sync`]: the push/pull cycle per budget file
//! - [`transport`]: the HTTP boundary to the sync server
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_client::{
//!     ChangeTracker, Credentials, Database, HttpTransport, Scope, Session, SyncClient,
//!     SyncOptions,
//! };
//! use tally_engine::{HybridLogicalClock, Mutation, SchemaRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("sqlite://tally.db?mode=rwc", SchemaRegistry::finance()).await?;
//! let clock = Arc::new(HybridLogicalClock::new(db.client_id(None).await?)?);
//! db.seed_clock(&clock).await?;
//!
//! let scope = Scope::new("file-id", "group-id");
//! let tracker = ChangeTracker::new(db.clone(), clock.clone());
//! tracker
//!     .track(&scope, vec![Mutation::new("accounts", "acct-1", "name", "Checking")])
//!     .await?;
//!
//! let options = SyncOptions::default();
//! let transport = Arc::new(HttpTransport::new("http://localhost:5006", options.timeout)?);
//! let session = Session::new(Credentials::Password("secret".into()));
//! let client = SyncClient::new(db, transport, session, clock, options);
//! client.sync(&scope).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod scope;
pub mod sync;
pub mod tracker;
pub mod transport;

pub use auth::{Credentials, Session};
pub use config::{Config, ConfigError};
pub use db::Database;
pub use error::{ApplyError, DbError, FailureReason, SyncError, TrackError};
pub use scope::Scope;
pub use sync::{CycleReport, SyncClient, SyncOptions, SyncOutcome, SyncState};
pub use tracker::{ChangeTracker, TrackReport};
pub use transport::{FileInfo, HttpTransport, SyncTransport};
