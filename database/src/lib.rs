use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gleaner_core::{Comment, ExtractedItem, ItemKind, PersistenceError, ResultSink};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

// Primary result codes; extended codes carry them in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

const MIGRATIONS: [(&str, &str); 3] = [
    (
        "create_items",
        r"
        CREATE TABLE IF NOT EXISTS items (
            item_id TEXT PRIMARY KEY NOT NULL,
            kind TEXT NOT NULL,
            author TEXT NOT NULL,
            content TEXT NOT NULL,
            likes INTEGER NOT NULL,
            comment_count INTEGER NOT NULL,
            url TEXT NOT NULL,
            extracted_at TEXT NOT NULL
        )
        ",
    ),
    (
        "create_comments",
        r"
        CREATE TABLE IF NOT EXISTS comments (
            item_id TEXT NOT NULL REFERENCES items(item_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            author TEXT NOT NULL,
            text TEXT NOT NULL,
            posted_at TEXT,
            PRIMARY KEY (item_id, position)
        )
        ",
    ),
    (
        "index_comments_item",
        "CREATE INDEX IF NOT EXISTS idx_comments_item ON comments(item_id)",
    ),
];

/// SQLite store for extracted items, keyed by `item_id`.
pub struct Database {
    connection_string: String,
    busy_timeout: Option<Duration>,
    pool: Option<SqlitePool>,
}

/// The database is the SQLite result sink.
pub type SqliteSink = Database;

impl Database {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            busy_timeout: None,
            pool: None,
        }
    }

    /// How long a write waits on another writer before failing with
    /// `DatabaseLocked`. Applied on `connect`.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub async fn connect(&mut self) -> Result<(), PersistenceError> {
        let mut options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| PersistenceError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .foreign_keys(true);
        if let Some(timeout) = self.busy_timeout {
            options = options.busy_timeout(timeout);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    /// Connects and brings the schema up to date.
    pub async fn open(connection_string: impl Into<String>) -> Result<Self, PersistenceError> {
        let mut db = Self::new(connection_string.into());
        db.connect().await?;
        db.run_migrations().await?;
        Ok(db)
    }

    fn pool(&self) -> Result<&SqlitePool, PersistenceError> {
        self.pool
            .as_ref()
            .ok_or_else(|| PersistenceError::ConnectionFailed {
                reason: "database not connected".to_string(),
            })
    }

    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        let pool = self.pool()?;
        for (name, statement) in MIGRATIONS {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| {
                    debug!("Migration {} failed: {}", name, e);
                    PersistenceError::MigrationFailed {
                        migration: name.to_string(),
                    }
                })?;
        }
        Ok(())
    }

    /// Inserts new items and overwrites existing ones, replacing their
    /// comments. All or nothing.
    pub async fn upsert_items(&self, items: &[ExtractedItem]) -> Result<usize, PersistenceError> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await.map_err(transaction_error)?;

        for item in items {
            sqlx::query(
                r"
                INSERT INTO items (
                    item_id, kind, author, content, likes, comment_count, url, extracted_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(item_id) DO UPDATE SET
                    kind = excluded.kind,
                    author = excluded.author,
                    content = excluded.content,
                    likes = excluded.likes,
                    comment_count = excluded.comment_count,
                    url = excluded.url,
                    extracted_at = excluded.extracted_at
                ",
            )
            .bind(&item.item_id)
            .bind(item.kind.as_str())
            .bind(&item.author)
            .bind(&item.content)
            .bind(to_sql_count("likes", item.likes)?)
            .bind(to_sql_count("comment_count", item.comment_count)?)
            .bind(&item.url)
            .bind(item.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(classify_sql_error)?;

            sqlx::query("DELETE FROM comments WHERE item_id = ?")
                .bind(&item.item_id)
                .execute(&mut *tx)
                .await
                .map_err(classify_sql_error)?;

            for (position, comment) in item.comments.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO comments (item_id, position, author, text, posted_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&item.item_id)
                .bind(position as i64)
                .bind(&comment.author)
                .bind(&comment.text)
                .bind(comment.timestamp.map(|t| t.to_rfc3339()))
                .execute(&mut *tx)
                .await
                .map_err(classify_sql_error)?;
            }
        }

        tx.commit().await.map_err(transaction_error)?;

        debug!("Upserted {} items", items.len());
        Ok(items.len())
    }

    /// All items in first-insert order.
    pub async fn get_items(&self) -> Result<Vec<ExtractedItem>, PersistenceError> {
        let pool = self.pool()?;
        let rows = sqlx::query("SELECT * FROM items ORDER BY rowid")
            .fetch_all(pool)
            .await?;
        let comment_rows = sqlx::query("SELECT * FROM comments ORDER BY item_id, position")
            .fetch_all(pool)
            .await?;

        let mut comments: HashMap<String, Vec<Comment>> = HashMap::new();
        for row in &comment_rows {
            let item_id: String = row.try_get("item_id")?;
            comments.entry(item_id).or_default().push(row_to_comment(row)?);
        }

        rows.iter()
            .map(|row| {
                let item_id: String = row.try_get("item_id")?;
                let item_comments = comments.remove(&item_id).unwrap_or_default();
                row_to_item(row, item_comments)
            })
            .collect()
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Option<ExtractedItem>, PersistenceError> {
        let pool = self.pool()?;
        let row = sqlx::query("SELECT * FROM items WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let comment_rows =
            sqlx::query("SELECT * FROM comments WHERE item_id = ? ORDER BY position")
                .bind(item_id)
                .fetch_all(pool)
                .await?;
        let comments = comment_rows
            .iter()
            .map(row_to_comment)
            .collect::<Result<Vec<_>, _>>()?;

        row_to_item(&row, comments).map(Some)
    }

    pub async fn item_count(&self) -> Result<usize, PersistenceError> {
        let pool = self.pool()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(pool)
            .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ResultSink for Database {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn persist(&self, items: &[ExtractedItem]) -> Result<usize, PersistenceError> {
        self.upsert_items(items).await
    }
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::QueryFailed {
            query: format!("invalid {} '{}': {}", column, value, e),
        })
}

/// Busy and locked databases become `DatabaseLocked` so flushes retry them.
fn classify_sql_error(e: sqlx::Error) -> PersistenceError {
    let locked = e
        .as_database_error()
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED));

    if locked {
        debug!("Database locked: {}", e);
        PersistenceError::DatabaseLocked
    } else {
        PersistenceError::Sql(e)
    }
}

fn transaction_error(e: sqlx::Error) -> PersistenceError {
    match classify_sql_error(e) {
        PersistenceError::Sql(e) => PersistenceError::TransactionFailed {
            reason: e.to_string(),
        },
        other => other,
    }
}

/// SQLite integers are signed; counts past `i64::MAX` are rejected, not wrapped.
fn to_sql_count(column: &str, value: u64) -> Result<i64, PersistenceError> {
    i64::try_from(value).map_err(|_| PersistenceError::QueryFailed {
        query: format!("{} {} does not fit an INTEGER column", column, value),
    })
}

fn from_sql_count(column: &str, value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::QueryFailed {
        query: format!("negative {} {} in stored row", column, value),
    })
}

fn row_to_comment(row: &SqliteRow) -> Result<Comment, PersistenceError> {
    let posted_at: Option<String> = row.try_get("posted_at")?;
    Ok(Comment {
        author: row.try_get("author")?,
        text: row.try_get("text")?,
        timestamp: posted_at
            .map(|t| parse_timestamp("posted_at", &t))
            .transpose()?,
    })
}

fn row_to_item(row: &SqliteRow, comments: Vec<Comment>) -> Result<ExtractedItem, PersistenceError> {
    let kind: String = row.try_get("kind")?;
    let extracted_at: String = row.try_get("extracted_at")?;

    Ok(ExtractedItem {
        item_id: row.try_get("item_id")?,
        kind: ItemKind::from(kind),
        author: row.try_get("author")?,
        content: row.try_get("content")?,
        likes: from_sql_count("likes", row.try_get("likes")?)?,
        comment_count: from_sql_count("comment_count", row.try_get("comment_count")?)?,
        url: row.try_get("url")?,
        timestamp: parse_timestamp("extracted_at", &extracted_at)?,
        comments,
    })
}
