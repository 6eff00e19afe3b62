use super::model::NewDocument;
use crate::model::{Document, DocumentStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const DOCUMENT_COLUMNS: &str = "id, collection, status, \
     CAST(json_extract(data, '$.\"' || ? || '\"') AS TEXT) AS label, \
     scheduled_publish_at, last_publish_event_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // sqlx only creates missing files when asked to.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let id: String = row.get("id");
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("document {} has unknown status {}", id, status_str))?;
    let scheduled = row
        .try_get::<Option<i64>, _>("scheduled_publish_at")?
        .map(from_millis)
        .transpose()?;
    let last = row
        .try_get::<Option<i64>, _>("last_publish_event_at")?
        .map(from_millis)
        .transpose()?;

    Ok(Document {
        collection: row.get("collection"),
        status,
        label: row
            .try_get::<Option<String>, _>("label")
            .ok()
            .flatten()
            .filter(|s| !s.is_empty()),
        scheduled_publish_at: scheduled,
        last_publish_event_at: last,
        id,
    })
}

/// Insert or replace a document's content. The publish watermark of an
/// existing row is preserved. Returns the document id.
#[instrument(skip_all, fields(collection = %doc.collection))]
pub async fn upsert_document(pool: &Pool, doc: &NewDocument) -> Result<String> {
    let id = doc
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    sqlx::query(
        "INSERT INTO documents (collection, id, status, data, scheduled_publish_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (collection, id) DO UPDATE SET \
            status = excluded.status, \
            data = excluded.data, \
            scheduled_publish_at = excluded.scheduled_publish_at, \
            updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&doc.collection)
    .bind(&id)
    .bind(doc.status.as_str())
    .bind(doc.data.to_string())
    .bind(doc.scheduled_publish_at.map(to_millis))
    .execute(pool)
    .await
    .context("failed to upsert document")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_document(
    pool: &Pool,
    collection: &str,
    title_field: &str,
    id: &str,
) -> Result<Option<Document>> {
    let sql = format!(
        "SELECT {} FROM documents WHERE collection = ? AND id = ?",
        DOCUMENT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(title_field)
        .bind(collection)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// Published documents whose schedule has elapsed and whose watermark lags
/// behind it. At most `limit` rows, unordered.
#[instrument(skip_all, fields(collection = %collection))]
pub async fn find_due_documents(
    pool: &Pool,
    collection: &str,
    title_field: &str,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<Document>> {
    let sql = format!(
        "SELECT {} FROM documents \
         WHERE collection = ? \
           AND status = ? \
           AND scheduled_publish_at IS NOT NULL \
           AND scheduled_publish_at <= ? \
           AND (last_publish_event_at IS NULL OR last_publish_event_at < scheduled_publish_at) \
         LIMIT ?",
        DOCUMENT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(title_field)
        .bind(collection)
        .bind(DocumentStatus::Published.as_str())
        .bind(to_millis(now))
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await
        .with_context(|| format!("failed to query due documents in {}", collection))?;
    rows.iter().map(document_from_row).collect()
}

#[instrument(skip_all)]
pub async fn set_last_publish_event_at(
    pool: &Pool,
    collection: &str,
    id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let res = sqlx::query(
        "UPDATE documents SET last_publish_event_at = ? WHERE collection = ? AND id = ?",
    )
    .bind(to_millis(at))
    .bind(collection)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to persist publish watermark")?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("document {}/{} not found", collection, id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_documents(pool: &Pool, collection: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
        .bind(collection)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
