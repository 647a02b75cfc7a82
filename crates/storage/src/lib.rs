use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{fs, path::{Path, PathBuf}, str::FromStr};

/// SQLite-backed store for the three document classes: registered model
/// templates, per-session content uploads, and produced output artifacts.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredModel {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredContent {
    pub stored_name: String,
    pub original_name: String,
    pub bytes: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredOutput {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Registers a model template. Re-uploading under the same filename
    /// replaces the previous bytes.
    pub async fn upsert_model(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO models (filename, bytes, uploaded_at) VALUES (?, ?, ?)
             ON CONFLICT(filename) DO UPDATE SET bytes=excluded.bytes, uploaded_at=excluded.uploaded_at",
        )
        .bind(filename)
        .bind(bytes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_model_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT filename FROM models ORDER BY filename")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    pub async fn load_model(&self, filename: &str) -> Result<Option<StoredModel>> {
        let row = sqlx::query("SELECT filename, bytes, uploaded_at FROM models WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredModel {
            filename: r.get("filename"),
            bytes: r.get("bytes"),
            uploaded_at: r.get("uploaded_at"),
        }))
    }

    pub async fn insert_content(
        &self,
        stored_name: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO content_uploads (stored_name, original_name, bytes, uploaded_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(stored_name)
        .bind(original_name)
        .bind(bytes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_content(&self, stored_name: &str) -> Result<Option<StoredContent>> {
        let row = sqlx::query(
            "SELECT stored_name, original_name, bytes, uploaded_at
             FROM content_uploads WHERE stored_name = ?",
        )
        .bind(stored_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredContent {
            stored_name: r.get("stored_name"),
            original_name: r.get("original_name"),
            bytes: r.get("bytes"),
            uploaded_at: r.get("uploaded_at"),
        }))
    }

    /// Stores a produced artifact. Reprocessing the same content upload
    /// overwrites the previous artifact under the same name.
    pub async fn store_output(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO outputs (filename, bytes, created_at) VALUES (?, ?, ?)
             ON CONFLICT(filename) DO UPDATE SET bytes=excluded.bytes, created_at=excluded.created_at",
        )
        .bind(filename)
        .bind(bytes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_output(&self, filename: &str) -> Result<Option<StoredOutput>> {
        let row = sqlx::query("SELECT filename, bytes, created_at FROM outputs WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredOutput {
            filename: r.get("filename"),
            bytes: r.get("bytes"),
            created_at: r.get("created_at"),
        }))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
