//! Entity store over a single-writer SQLite database.
//!
//! All writes are single-row, single-statement operations; deduplication is
//! expressed as conflict-target no-ops rather than transactions. The store is
//! a passive accessor: the orchestrators own the audit narrative and call
//! [`Store::record_audit`] themselves.

use std::path::Path;

use anyhow::Context as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, SqlitePool};
use thiserror::Error;

use crate::model::{
    AuditEntry, Item, ListId, ListKey, ListRecord, NewList, NewTitle, NewVolume, ScrapeStatus,
    TitleId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A volume id already exists with a materially different payload. This
    /// indicates a resolution bug upstream and must not silently overwrite.
    #[error("volume `{volume_id}` already stored with different payload (existing url: {existing_url})")]
    DuplicateVolume {
        volume_id: String,
        existing_url: String,
    },

    #[error("illegal list status transition: {from} -> {to}")]
    IllegalTransition {
        from: ScrapeStatus,
        to: ScrapeStatus,
    },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    WithStatus(ScrapeStatus),
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if necessary) the database file. The pool is capped at
    /// one connection: there is exactly one logical writer at a time.
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database dir: {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("open database: {}", db_path.display()))?;

        Ok(Self { pool })
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("open in-memory database")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fails with a pointer at `migrate` when the schema has not been applied.
    pub async fn assert_schema(&self) -> anyhow::Result<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'lists')",
        )
        .fetch_one(&self.pool)
        .await
        .context("check schema")?;

        if !exists {
            anyhow::bail!("database schema is missing; run `whakoom-scrape migrate` first");
        }
        Ok(())
    }

    /// Inserts the list or refreshes its display data. The scrape status of
    /// an existing row is left untouched.
    pub async fn upsert_list(&self, list: &NewList) -> Result<ListKey, StoreError> {
        let key: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lists (list_id, title, url, user_profile, scrape_status)
            VALUES (?, ?, ?, ?, 'pending')
            ON CONFLICT(list_id) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                user_profile = excluded.user_profile
            RETURNING id
            "#,
        )
        .bind(list.list_id.0)
        .bind(&list.title)
        .bind(&list.url)
        .bind(&list.owner_profile)
        .fetch_one(&self.pool)
        .await?;

        Ok(ListKey(key))
    }

    pub async fn get_lists(&self, filter: ListFilter) -> Result<Vec<ListRecord>, StoreError> {
        let base = "SELECT id, list_id, title, url, user_profile, scrape_status, scraped_at \
                    FROM lists";
        let rows = match filter {
            ListFilter::All => {
                sqlx::query(&format!("{base} ORDER BY id"))
                    .fetch_all(&self.pool)
                    .await?
            }
            ListFilter::WithStatus(status) => {
                sqlx::query(&format!("{base} WHERE scrape_status = ? ORDER BY id"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(list_from_row).collect()
    }

    /// Updates a list's status, keyed by the database primary key. Rejects
    /// edges the lifecycle does not allow. Completion stamps `scraped_at`.
    pub async fn set_list_status(
        &self,
        key: ListKey,
        next: ScrapeStatus,
    ) -> Result<(), StoreError> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT scrape_status FROM lists WHERE id = ?")
                .bind(key.0)
                .fetch_optional(&self.pool)
                .await?;
        let Some(current) = current else {
            return Err(StoreError::Integrity(format!(
                "no list row with key {}",
                key.0
            )));
        };

        let from = ScrapeStatus::parse(&current).ok_or_else(|| {
            StoreError::Integrity(format!(
                "list row {} has unrecognized scrape_status `{current}`",
                key.0
            ))
        })?;
        if !from.can_become(next) {
            return Err(StoreError::IllegalTransition { from, to: next });
        }

        if next == ScrapeStatus::Completed {
            sqlx::query("UPDATE lists SET scrape_status = ?, scraped_at = ? WHERE id = ?")
                .bind(next.as_str())
                .bind(chrono::Utc::now().to_rfc3339())
                .bind(key.0)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE lists SET scrape_status = ? WHERE id = ?")
                .bind(next.as_str())
                .bind(key.0)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// First-write-wins title insertion. Returns true only when this call
    /// created the row; a repeat for the same `title_id` is a silent no-op.
    pub async fn insert_title_if_absent(&self, title: &NewTitle) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO titles (title_id, title, url, scrape_status)
            VALUES (?, ?, ?, 'pending')
            ON CONFLICT(title_id) DO NOTHING
            "#,
        )
        .bind(title.title_id.0)
        .bind(&title.display_name)
        .bind(&title.url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Marks a title ingestion-complete (identity recorded). Idempotent, and
    /// legal straight from `pending`: titles do not pass through
    /// `in_progress` on this path.
    pub async fn complete_title(&self, title_id: TitleId) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE titles SET scrape_status = 'completed', scraped_at = ? WHERE title_id = ?",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(title_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns true when the volume was inserted. A repeat insert of the
    /// identical payload is a harmless no-op; the same id with a different
    /// payload is a [`StoreError::DuplicateVolume`].
    pub async fn insert_volume(&self, volume: &NewVolume) -> Result<bool, StoreError> {
        let existing = sqlx::query("SELECT title_id, url FROM volumes WHERE volume_id = ?")
            .bind(&volume.volume_id.0)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = existing {
            let existing_title: i64 = row.get("title_id");
            let existing_url: Option<String> = row.get("url");
            let same = existing_title == volume.title_id.0
                && existing_url.as_deref() == Some(volume.url.as_str());
            if same {
                return Ok(false);
            }
            return Err(StoreError::DuplicateVolume {
                volume_id: volume.volume_id.0.clone(),
                existing_url: existing_url.unwrap_or_default(),
            });
        }

        let result = sqlx::query("INSERT INTO volumes (volume_id, title_id, url) VALUES (?, ?, ?)")
            .bind(&volume.volume_id.0)
            .bind(volume.title_id.0)
            .bind(&volume.url)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => Err(map_foreign_key(err, || {
                format!(
                    "volume `{}` references missing title {}",
                    volume.volume_id, volume.title_id
                )
            })),
        }
    }

    /// Best-effort flag: a title with exactly one stored volume is marked as
    /// a single-volume work.
    pub async fn refresh_single_volume_flag(&self, title_id: TitleId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE titles
            SET is_single_volume = ((SELECT COUNT(*) FROM volumes WHERE title_id = ?) = 1)
            WHERE title_id = ?
            "#,
        )
        .bind(title_id.0)
        .bind(title_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Links a title to a list. Re-linking an existing pair is a no-op, not
    /// an error; that pair is the deduplication witness.
    pub async fn link_title_to_list(
        &self,
        list: ListKey,
        title: TitleId,
        position: Option<i64>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO lists_titles (list_id, title_id, position)
            VALUES (?, ?, ?)
            ON CONFLICT(list_id, title_id) DO NOTHING
            "#,
        )
        .bind(list.0)
        .bind(title.0)
        .bind(position)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(err) => Err(map_foreign_key(err, || {
                format!("membership ({}, {title}) references a missing row", list.0)
            })),
        }
    }

    pub async fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scraping_log
                (scrapper_name, operation_type, entity_id, status, error_message, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.actor)
        .bind(entry.operation)
        .bind(&entry.entity_id)
        .bind(entry.outcome.as_str())
        .bind(entry.error.as_deref())
        .bind(entry.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// One handler per item variant; the typed replacement for dispatching on a
/// record's runtime type.
pub async fn persist_item(store: &Store, item: &Item) -> Result<(), StoreError> {
    match item {
        Item::List(list) => {
            store.upsert_list(list).await?;
        }
        Item::Title(title) => {
            store.insert_title_if_absent(title).await?;
            store.complete_title(title.title_id).await?;
        }
        Item::Volume(volume) => {
            store.insert_volume(volume).await?;
            store.refresh_single_volume_flag(volume.title_id).await?;
        }
        Item::Membership {
            list,
            title,
            position,
        } => {
            store.link_title_to_list(*list, *title, *position).await?;
        }
    }

    Ok(())
}

fn list_from_row(row: &SqliteRow) -> Result<ListRecord, StoreError> {
    let raw_status: String = row.get("scrape_status");
    let status = ScrapeStatus::parse(&raw_status).ok_or_else(|| {
        StoreError::Integrity(format!(
            "list `{}` has unrecognized scrape_status `{raw_status}`",
            row.get::<i64, _>("list_id")
        ))
    })?;

    Ok(ListRecord {
        key: ListKey(row.get("id")),
        list_id: ListId(row.get("list_id")),
        title: row.get("title"),
        url: row.get("url"),
        owner_profile: row.get("user_profile"),
        status,
        last_scraped_at: row.get("scraped_at"),
    })
}

fn map_foreign_key(err: sqlx::Error, detail: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation) =>
        {
            StoreError::Integrity(detail())
        }
        _ => StoreError::Db(err),
    }
}
