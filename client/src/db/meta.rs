//! Small key/value settings, such as the persisted client id.

use crate::error::DbError;
use sqlx::SqliteConnection;
use tally_engine::NodeId;
use uuid::Uuid;

const CLIENT_ID_KEY: &str = "client_id";

pub async fn get(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, DbError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn set(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// The id this device stamps its timestamps with.
///
/// A configured id wins and is persisted; otherwise the stored id is reused,
/// or a random one is generated on first start.
pub async fn client_id(
    conn: &mut SqliteConnection,
    configured: Option<&str>,
) -> Result<NodeId, DbError> {
    if let Some(id) = configured {
        let id = id.to_ascii_uppercase();
        set(conn, CLIENT_ID_KEY, &id).await?;
        return Ok(id);
    }
    if let Some(id) = get(conn, CLIENT_ID_KEY).await? {
        return Ok(id);
    }

    let id = generate_client_id();
    tracing::info!(client_id = %id, "Generated new client id");
    set(conn, CLIENT_ID_KEY, &id).await?;
    Ok(id)
}

fn generate_client_id() -> NodeId {
    format!("{:016X}", Uuid::new_v4().as_u128() as u64)
}
