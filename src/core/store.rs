use crate::core::model::Visibility;
use anyhow::Context;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Ledger of finished uploads, keyed by local path and size.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub path: String,
    pub size: u64,
    pub video_id: String,
    pub visibility: String,
    pub uploaded_at: i64,
}

impl SqliteStore {
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create_dir_all {}", parent.display()))?;
            }
        }

        let abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()
                .with_context(|| "current_dir")?
                .join(db_path)
        };

        let mut p = abs.to_string_lossy().to_string();
        if cfg!(windows) {
            p = p.replace('\\', "/");
        }

        // mode=rwc creates the file on first use
        let url = if p.starts_with('/') {
            format!("sqlite://{}?mode=rwc", p)
        } else {
            format!("sqlite:///{}?mode=rwc", p)
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("connect sqlite url={} (file={})", url, abs.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              path TEXT NOT NULL,
              size INTEGER NOT NULL,
              video_id TEXT NOT NULL,
              visibility TEXT NOT NULL,
              uploaded_at INTEGER NOT NULL
            );
            "#,
        )
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_uploads_unique
            ON uploads(path, size);
            "#,
        )
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn now_epoch() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    fn key(path: &Path) -> String {
        std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string()
    }

    pub async fn record_upload(
        &self,
        path: &Path,
        size: u64,
        video_id: &str,
        visibility: Visibility,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (path, size, video_id, visibility, uploaded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path, size) DO UPDATE SET
              video_id = excluded.video_id,
              visibility = excluded.visibility,
              uploaded_at = excluded.uploaded_at;
            "#,
        )
            .bind(Self::key(path))
            .bind(size as i64)
            .bind(video_id)
            .bind(visibility.as_str())
            .bind(Self::now_epoch())
            .execute(&self.pool)
            .await
            .context("record upload")?;
        Ok(())
    }

    pub async fn find_upload(&self, path: &Path, size: u64) -> anyhow::Result<Option<UploadRecord>> {
        let row = sqlx::query(
            r#"
            SELECT path, size, video_id, visibility, uploaded_at
            FROM uploads
            WHERE path = ? AND size = ?;
            "#,
        )
            .bind(Self::key(path))
            .bind(size as i64)
            .fetch_optional(&self.pool)
            .await
            .context("fetch upload")?;

        Ok(row.map(row_to_record))
    }

    pub async fn list_uploads(&self) -> anyhow::Result<Vec<UploadRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT path, size, video_id, visibility, uploaded_at
            FROM uploads
            ORDER BY uploaded_at DESC, id DESC;
            "#,
        )
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }
}

fn row_to_record(r: sqlx::sqlite::SqliteRow) -> UploadRecord {
    UploadRecord {
        path: r.get::<String, _>("path"),
        size: r.get::<i64, _>("size").max(0) as u64,
        video_id: r.get::<String, _>("video_id"),
        visibility: r.get::<String, _>("visibility"),
        uploaded_at: r.get::<i64, _>("uploaded_at"),
    }
}
