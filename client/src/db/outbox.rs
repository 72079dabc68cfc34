//! Outbox: locally stamped messages awaiting delivery.

use crate::error::DbError;
use crate::scope::Scope;
use sqlx::SqliteConnection;
use tally_engine::{Message, Value};

/// A queued message and its outbox row id.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub message: Message,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    timestamp: String,
    dataset: String,
    row_id: String,
    column_name: String,
    value: String,
}

impl OutboxRow {
    fn into_entry(self) -> Result<OutboxEntry, DbError> {
        Ok(OutboxEntry {
            id: self.id,
            message: Message {
                dataset: self.dataset,
                row: self.row_id,
                column: self.column_name,
                value: Value::decode(&self.value)?,
                timestamp: self.timestamp.parse()?,
            },
        })
    }
}

/// Queue a message for one scope. Timestamps are unique, so a message is
/// queued at most once.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    scope: &Scope,
    message: &Message,
) -> Result<i64, DbError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO outbox (file_id, group_id, timestamp, dataset, row_id, column_name, value)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&scope.file_id)
    .bind(&scope.group_id)
    .bind(message.timestamp.to_string())
    .bind(&message.dataset)
    .bind(&message.row)
    .bind(&message.column)
    .bind(message.value.encode())
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Unacknowledged entries of a scope in timestamp order.
pub async fn pending(
    conn: &mut SqliteConnection,
    scope: &Scope,
) -> Result<Vec<OutboxEntry>, DbError> {
    let rows: Vec<OutboxRow> = sqlx::query_as(
        r#"
        SELECT id, timestamp, dataset, row_id, column_name, value
        FROM outbox
        WHERE file_id = ? AND group_id = ? AND acknowledged = 0
        ORDER BY timestamp ASC
        "#,
    )
    .bind(&scope.file_id)
    .bind(&scope.group_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(OutboxRow::into_entry).collect()
}

pub async fn pending_count(conn: &mut SqliteConnection, scope: &Scope) -> Result<i64, DbError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM outbox WHERE file_id = ? AND group_id = ? AND acknowledged = 0",
    )
    .bind(&scope.file_id)
    .bind(&scope.group_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Mark delivered entries of a scope acknowledged and remove them.
///
/// Ids belonging to another scope are left alone.
pub async fn acknowledge(
    conn: &mut SqliteConnection,
    scope: &Scope,
    ids: &[i64],
) -> Result<u64, DbError> {
    for id in ids {
        sqlx::query(
            "UPDATE outbox SET acknowledged = 1 WHERE id = ? AND file_id = ? AND group_id = ?",
        )
        .bind(id)
        .bind(&scope.file_id)
        .bind(&scope.group_id)
        .execute(&mut *conn)
        .await?;
    }
    let removed = sqlx::query(
        "DELETE FROM outbox WHERE file_id = ? AND group_id = ? AND acknowledged = 1",
    )
    .bind(&scope.file_id)
    .bind(&scope.group_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(removed)
}
