use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::StudioError;

/// Relational store backing the history log and the local CMS collaborators
/// (posts and media rows). All writes are single-row inserts.
pub struct Database {
    conn: Mutex<Connection>,
}

/// One persisted audit row per generation attempt. Never mutated after
/// insert.
#[derive(Debug, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub provider: String,
    pub model: Option<String>,
    pub tone: Option<String>,
    pub word_count: i64,
    pub tokens_used: i64,
    pub cost: f64,
    pub generation_time: f64,
    pub status: String,
    pub created_at: String,
}

pub struct NewHistoryEntry {
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub provider: String,
    pub model: String,
    pub tone: String,
    pub word_count: i64,
    pub tokens_used: i64,
    pub cost: f64,
    pub generation_time: f64,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PostRecord {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub status: String,
    pub created_at: String,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StudioError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                tracing::error!(error = %err, "failed to create database directory");
                StudioError::Persistence("Failed to open the history store.".to_string())
            })?;
        }
        let conn = Connection::open(path).map_err(open_error)?;
        init_schema(&conn).map_err(open_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StudioError> {
        let conn = Connection::open_in_memory().map_err(open_error)?;
        init_schema(&conn).map_err(open_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_history(&self, entry: &NewHistoryEntry) -> Result<i64, StudioError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO history (user_id, type, title, provider, model, tone, word_count,
                                  tokens_used, cost, generation_time, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.user_id,
                entry.kind,
                entry.title,
                entry.provider,
                entry.model,
                entry.tone,
                entry.word_count,
                entry.tokens_used,
                entry.cost,
                entry.generation_time,
                entry.status,
                now_local(),
            ],
        )
        .map_err(query_error)?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest-first page of a user's history plus the user's total row count.
    pub fn list_history(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<HistoryRecord>, i64), StudioError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, type, title, provider, model, tone, word_count,
                        tokens_used, cost, generation_time, status, created_at
                 FROM history
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], |row| {
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    kind: row.get(2)?,
                    title: row.get(3)?,
                    provider: row.get(4)?,
                    model: row.get(5)?,
                    tone: row.get(6)?,
                    word_count: row.get(7)?,
                    tokens_used: row.get(8)?,
                    cost: row.get(9)?,
                    generation_time: row.get(10)?,
                    status: row.get(11)?,
                    created_at: row.get(12)?,
                })
            })
            .map_err(query_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM history WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(query_error)?;
        Ok((rows, total))
    }

    /// Count of a user's history rows created on the current server-local
    /// calendar day. An unprovisioned store reads as zero so the rate gate
    /// stays open on first run.
    pub fn count_today(&self, user_id: i64) -> Result<i64, StudioError> {
        let conn = self.conn();
        let result: rusqlite::Result<i64> = conn.query_row(
            "SELECT COUNT(*) FROM history
             WHERE user_id = ?1 AND date(created_at) = date('now', 'localtime')",
            params![user_id],
            |row| row.get(0),
        );
        match result {
            Ok(count) => Ok(count),
            Err(err) if is_missing_table(&err) => Ok(0),
            Err(err) => Err(query_error(err)),
        }
    }

    pub fn insert_post(
        &self,
        user_id: i64,
        title: &str,
        content: &str,
        status: &str,
    ) -> Result<i64, StudioError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO posts (user_id, title, content, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, title, content, status, now_local()],
        )
        .map_err(query_error)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRecord>, StudioError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, title, content, status, created_at
             FROM posts WHERE id = ?1",
            params![id],
            |row| {
                Ok(PostRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                    status: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(query_error)
    }

    pub fn insert_media(
        &self,
        user_id: i64,
        title: &str,
        file_key: &str,
        mime_type: &str,
        width: u32,
        height: u32,
    ) -> Result<i64, StudioError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO media (user_id, title, file_key, mime_type, width, height, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![user_id, title, file_key, mime_type, width, height, now_local()],
        )
        .map_err(query_error)?;
        Ok(conn.last_insert_rowid())
    }

    /// In-memory store without any schema, test seam for first-run behavior.
    #[cfg(test)]
    pub fn open_unprovisioned() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory database");
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Backdates one history row, test seam for day-rollover behavior.
    #[cfg(test)]
    pub fn set_created_at(&self, history_id: i64, created_at: &str) {
        let conn = self.conn();
        conn.execute(
            "UPDATE history SET created_at = ?1 WHERE id = ?2",
            params![created_at, history_id],
        )
        .expect("backdate history row");
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            type TEXT NOT NULL DEFAULT 'content',
            title TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT,
            tone TEXT,
            word_count INTEGER DEFAULT 0,
            tokens_used INTEGER DEFAULT 0,
            cost REAL DEFAULT 0,
            generation_time REAL DEFAULT 0,
            status TEXT DEFAULT 'completed',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id);
        CREATE INDEX IF NOT EXISTS idx_history_created ON history(created_at);

        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            file_key TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            width INTEGER DEFAULT 0,
            height INTEGER DEFAULT 0,
            created_at TEXT NOT NULL
        );",
    )
}

fn now_local() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("no such table"))
}

fn open_error(err: rusqlite::Error) -> StudioError {
    tracing::error!(error = %err, "failed to open database");
    StudioError::Persistence("Failed to open the history store.".to_string())
}

fn query_error(err: rusqlite::Error) -> StudioError {
    tracing::error!(error = %err, "database query failed");
    StudioError::Persistence("Database operation failed.".to_string())
}

#[cfg(test)]
pub fn sample_entry(user_id: i64) -> NewHistoryEntry {
    NewHistoryEntry {
        user_id,
        kind: "content".to_string(),
        title: "Test Post".to_string(),
        provider: "gemini".to_string(),
        model: "gemini-2.5-flash".to_string(),
        tone: "professional".to_string(),
        word_count: 640,
        tokens_used: 900,
        cost: 0.0,
        generation_time: 4.2,
        status: "completed".to_string(),
    }
}
