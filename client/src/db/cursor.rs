//! Pull watermark per (file, group) scope.

use crate::error::DbError;
use sqlx::SqliteConnection;
use tally_engine::Timestamp;

/// Stored watermark, or the epoch-zero sentinel for a scope never synced.
pub async fn load(
    conn: &mut SqliteConnection,
    file_id: &str,
    group_id: &str,
) -> Result<Timestamp, DbError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT since FROM sync_cursor WHERE file_id = ? AND group_id = ?")
            .bind(file_id)
            .bind(group_id)
            .fetch_optional(&mut *conn)
            .await?;

    match row {
        Some((since,)) => Ok(since.parse()?),
        None => Ok(Timestamp::zero()),
    }
}

pub async fn store(
    conn: &mut SqliteConnection,
    file_id: &str,
    group_id: &str,
    since: &Timestamp,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO sync_cursor (file_id, group_id, since)
        VALUES (?, ?, ?)
        ON CONFLICT(file_id, group_id) DO UPDATE SET
            since = excluded.since
        "#,
    )
    .bind(file_id)
    .bind(group_id)
    .bind(since.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
