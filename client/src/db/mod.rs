//! Database module for SQLite persistence.
//!
//! Free functions take a `&mut SqliteConnection` so callers decide the
//! transaction boundary. [`Database`] bundles the pool with the schema
//! registry for the common single-statement cases.

pub mod cells;
pub mod cursor;
pub mod meta;
pub mod outbox;
mod pool;

pub use outbox::OutboxEntry;
pub use pool::*;

use crate::error::{ApplyError, DbError};
use crate::scope::Scope;
use std::sync::Arc;
use tally_engine::{
    store::is_tombstoned, CellKey, HybridLogicalClock, MergeOutcome, Message, NodeId, Row,
    SchemaRegistry, Timestamp,
};

/// Local store: dataset tables, cell clocks, outbox and cursors.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool,
    schema: Arc<SchemaRegistry>,
}

impl Database {
    /// Open a database, run migrations and verify the schema.
    pub async fn connect(database_url: &str, schema: SchemaRegistry) -> Result<Self, DbError> {
        let pool = create_pool(database_url).await?;
        tracing::info!("Running database migrations...");
        run_migrations(&pool).await?;

        let db = Self::new(pool, schema);
        db.verify_schema().await?;
        Ok(db)
    }

    /// Wrap an already migrated pool.
    pub fn new(pool: Pool, schema: SchemaRegistry) -> Self {
        Self {
            pool,
            schema: Arc::new(schema),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Fail unless every registered dataset column exists.
    pub async fn verify_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        cells::verify_schema(&mut conn, &self.schema).await
    }

    /// Merge one message in its own transaction.
    pub async fn apply(&self, message: &Message) -> Result<MergeOutcome, ApplyError> {
        let mut tx = self.pool.begin().await?;
        let outcome = cells::apply_message(&mut tx, &self.schema, message).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get_row(&self, dataset: &str, id: &str) -> Result<Option<Row>, DbError> {
        let mut conn = self.pool.acquire().await?;
        cells::get_row(&mut conn, &self.schema, dataset, id).await
    }

    /// All rows of a dataset, tombstoned ones included.
    pub async fn rows(&self, dataset: &str) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.acquire().await?;
        cells::rows(&mut conn, &self.schema, dataset).await
    }

    /// Rows of a dataset that are not tombstoned.
    pub async fn active_rows(&self, dataset: &str) -> Result<Vec<Row>, DbError> {
        let mut rows = self.rows(dataset).await?;
        rows.retain(|row| !is_tombstoned(row));
        Ok(rows)
    }

    pub async fn cell_clock(&self, cell: &CellKey) -> Result<Option<Timestamp>, DbError> {
        let mut conn = self.pool.acquire().await?;
        cells::cell_clock(&mut conn, cell).await
    }

    /// Greatest clock across all cells.
    pub async fn max_clock(&self) -> Result<Option<Timestamp>, DbError> {
        let mut conn = self.pool.acquire().await?;
        cells::max_clock(&mut conn).await
    }

    /// Advance a freshly created clock past everything already stored, so a
    /// restarted device never stamps below its own history.
    pub async fn seed_clock(&self, clock: &HybridLogicalClock) -> Result<(), DbError> {
        if let Some(max) = self.max_clock().await? {
            clock.observe(&max)?;
            tracing::debug!(seed = %max, "Seeded clock from stored history");
        }
        Ok(())
    }

    /// Unacknowledged outbox entries of a scope.
    pub async fn pending_outbox(&self, scope: &Scope) -> Result<Vec<OutboxEntry>, DbError> {
        let mut conn = self.pool.acquire().await?;
        outbox::pending(&mut conn, scope).await
    }

    pub async fn pending_count(&self, scope: &Scope) -> Result<i64, DbError> {
        let mut conn = self.pool.acquire().await?;
        outbox::pending_count(&mut conn, scope).await
    }

    /// Pull watermark for a scope.
    pub async fn cursor(&self, file_id: &str, group_id: &str) -> Result<Timestamp, DbError> {
        let mut conn = self.pool.acquire().await?;
        cursor::load(&mut conn, file_id, group_id).await
    }

    /// Resolve this device's client id.
    pub async fn client_id(&self, configured: Option<&str>) -> Result<NodeId, DbError> {
        let mut conn = self.pool.acquire().await?;
        meta::client_id(&mut conn, configured).await
    }
}
