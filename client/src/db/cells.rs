//! Cell storage: dataset tables plus the per-cell clock.
//!
//! Table and column names are spliced into SQL, so they are always taken
//! from the schema registry after a message has been checked against it,
//! never from the message itself.

use crate::error::{ApplyError, DbError};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row as _, Sqlite, SqliteConnection};
use tally_engine::{
    CellKey, DatasetSchema, Error as EngineError, FieldDef, MergeEngine, MergeOutcome, MergePlan,
    Message, Row, SchemaRegistry, Timestamp, Value, ID_COLUMN,
};

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Number(n) => query.bind(*n),
        Value::Text(s) => query.bind(s.as_str()),
    }
}

/// Timestamp of the value currently held by a cell.
pub async fn cell_clock(
    conn: &mut SqliteConnection,
    cell: &CellKey,
) -> Result<Option<Timestamp>, DbError> {
    let stored: Option<(String,)> = sqlx::query_as(
        "SELECT timestamp FROM crdt_clock WHERE dataset = ? AND row_id = ? AND column_name = ?",
    )
    .bind(&cell.dataset)
    .bind(&cell.row)
    .bind(&cell.column)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(stored.map(|(ts,)| ts.parse::<Timestamp>()).transpose()?)
}

/// Greatest clock across all cells.
pub async fn max_clock(conn: &mut SqliteConnection) -> Result<Option<Timestamp>, DbError> {
    // Canonical text sorts like the timestamps themselves.
    let (max,): (Option<String>,) = sqlx::query_as("SELECT MAX(timestamp) FROM crdt_clock")
        .fetch_one(&mut *conn)
        .await?;
    Ok(max.map(|ts| ts.parse::<Timestamp>()).transpose()?)
}

async fn row_exists(
    conn: &mut SqliteConnection,
    dataset: &DatasetSchema,
    id: &str,
) -> Result<bool, DbError> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?",
        quote(&dataset.name),
        quote(ID_COLUMN)
    );
    let found = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

async fn write_cell(
    conn: &mut SqliteConnection,
    dataset: &DatasetSchema,
    field: &FieldDef,
    message: &Message,
    create_row: bool,
) -> Result<(), DbError> {
    let table = quote(&dataset.name);
    let column = quote(&field.name);

    if create_row {
        let sql = format!(
            "INSERT INTO {table} ({}, {column}) VALUES (?, ?)",
            quote(ID_COLUMN)
        );
        bind_value(sqlx::query(&sql).bind(&message.row), &message.value)
            .execute(&mut *conn)
            .await?;
    } else {
        let sql = format!("UPDATE {table} SET {column} = ? WHERE {} = ?", quote(ID_COLUMN));
        bind_value(sqlx::query(&sql), &message.value)
            .bind(&message.row)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO crdt_clock (dataset, row_id, column_name, timestamp)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(dataset, row_id, column_name) DO UPDATE SET
            timestamp = excluded.timestamp
        "#,
    )
    .bind(&dataset.name)
    .bind(&message.row)
    .bind(&field.name)
    .bind(message.timestamp.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Merge one message into local storage.
///
/// Runs on the caller's connection, so wrapping it in a transaction keeps the
/// cell value and its clock in one commit.
pub async fn apply_message(
    conn: &mut SqliteConnection,
    schema: &SchemaRegistry,
    message: &Message,
) -> Result<MergeOutcome, ApplyError> {
    let stored = cell_clock(conn, &message.cell()).await?;
    match MergeEngine::new(schema).plan(message, stored.as_ref())? {
        MergePlan::Discard(reason) => Ok(MergeOutcome::Discarded { reason }),
        MergePlan::Write(write) => {
            let row_created =
                write.first_write && !row_exists(conn, write.dataset, &message.row).await?;
            write_cell(conn, write.dataset, write.field, message, row_created).await?;
            Ok(MergeOutcome::Applied { row_created })
        }
    }
}

fn select_sql(dataset: &DatasetSchema) -> String {
    let mut columns = vec![quote(ID_COLUMN)];
    columns.extend(dataset.fields.iter().map(|f| quote(&f.name)));
    format!("SELECT {} FROM {}", columns.join(", "), quote(&dataset.name))
}

fn decode_row(dataset: &DatasetSchema, row: &SqliteRow) -> Result<Row, DbError> {
    let mut out = Row::new();
    let id: String = row.try_get(ID_COLUMN)?;
    out.insert(ID_COLUMN.to_string(), Value::Text(id));

    for field in &dataset.fields {
        let name = field.name.as_str();
        // SQLite stores numbers as INTEGER or REAL depending on affinity;
        // read them back without a declared-type check.
        let value = if field.field_type.is_numeric() {
            row.try_get_unchecked::<Option<f64>, _>(name)?
                .map_or(Value::Null, Value::Number)
        } else {
            row.try_get_unchecked::<Option<String>, _>(name)?
                .map_or(Value::Null, Value::Text)
        };
        out.insert(field.name.clone(), value);
    }
    Ok(out)
}

fn resolve<'s>(schema: &'s SchemaRegistry, dataset: &str) -> Result<&'s DatasetSchema, DbError> {
    schema
        .dataset(dataset)
        .ok_or_else(|| EngineError::UnknownDataset(dataset.to_string()).into())
}

/// Read one row, including tombstoned rows.
pub async fn get_row(
    conn: &mut SqliteConnection,
    schema: &SchemaRegistry,
    dataset: &str,
    id: &str,
) -> Result<Option<Row>, DbError> {
    let dataset = resolve(schema, dataset)?;
    let sql = format!("{} WHERE {} = ?", select_sql(dataset), quote(ID_COLUMN));
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| decode_row(dataset, &r)).transpose()
}

/// Read every row of a dataset ordered by id.
pub async fn rows(
    conn: &mut SqliteConnection,
    schema: &SchemaRegistry,
    dataset: &str,
) -> Result<Vec<Row>, DbError> {
    let dataset = resolve(schema, dataset)?;
    let sql = format!("{} ORDER BY {}", select_sql(dataset), quote(ID_COLUMN));
    let found = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    found.iter().map(|r| decode_row(dataset, r)).collect()
}

/// Check every registered table and column exists.
pub async fn verify_schema(
    conn: &mut SqliteConnection,
    schema: &SchemaRegistry,
) -> Result<(), DbError> {
    for dataset in schema.datasets() {
        let sql = format!("PRAGMA table_info({})", quote(&dataset.name));
        let columns: Vec<String> = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;

        let required = std::iter::once(ID_COLUMN).chain(dataset.fields.iter().map(|f| f.name.as_str()));
        for column in required {
            if !columns.iter().any(|c| c == column) {
                return Err(DbError::MissingColumn {
                    table: dataset.name.clone(),
                    column: column.to_string(),
                });
            }
        }
    }
    Ok(())
}
