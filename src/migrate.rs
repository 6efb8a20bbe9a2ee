//! Applies versioned schema change-sets exactly once.
//!
//! A migration is a file named `NNN_name.sql` holding an `-- Up` section
//! (and, optionally, a `-- Down` section which this applier never runs).
//! Applied versions are recorded permanently in the `migrations` ledger.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use sqlx::SqlitePool;

use crate::cli::MigrateArgs;
use crate::store::Store;

pub async fn run(args: MigrateArgs) -> anyhow::Result<()> {
    let store = Store::open(Path::new(&args.db)).await.context("open store")?;
    let applied = apply_all(store.pool(), Path::new(&args.dir)).await?;
    tracing::info!(applied, dir = %args.dir, "migrations up to date");
    Ok(())
}

/// Applies every unapplied migration in version order. Returns how many were
/// applied; re-running is a no-op.
pub async fn apply_all(pool: &SqlitePool, dir: &Path) -> anyhow::Result<usize> {
    ensure_ledger(pool).await?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT version FROM migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("read applied migrations")?;

    let mut count = 0;
    for (version, name, path) in pending_files(dir, &applied)? {
        let sql = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read migration: {}", path.display()))?;
        let up = up_section(&sql).with_context(|| format!("migration {version}_{name}"))?;

        sqlx::raw_sql(up)
            .execute(pool)
            .await
            .with_context(|| format!("apply migration {version}_{name}"))?;
        sqlx::query("INSERT INTO migrations (version, name) VALUES (?, ?)")
            .bind(&version)
            .bind(&name)
            .execute(pool)
            .await
            .with_context(|| format!("record migration {version}_{name}"))?;

        tracing::info!(version, name, "applied migration");
        count += 1;
    }

    Ok(count)
}

async fn ensure_ledger(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("create migrations ledger")?;

    Ok(())
}

fn pending_files(
    dir: &Path,
    applied: &[String],
) -> anyhow::Result<Vec<(String, String, PathBuf)>> {
    let mut names = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read migrations dir: {}", dir.display()))?
    {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.ends_with(".sql") {
            names.push(file_name);
        }
    }
    names.sort();

    let mut pending = Vec::new();
    for file_name in names {
        let (version, name) = parse_migration_filename(&file_name).ok_or_else(|| {
            anyhow::anyhow!("invalid migration filename `{file_name}`; expected NNN_name.sql")
        })?;
        if applied.iter().any(|v| v == version) {
            continue;
        }
        pending.push((version.to_owned(), name.to_owned(), dir.join(&file_name)));
    }

    Ok(pending)
}

fn parse_migration_filename(file_name: &str) -> Option<(&str, &str)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || name.is_empty() {
        return None;
    }
    Some((version, name))
}

fn up_section(sql: &str) -> anyhow::Result<&str> {
    let mut offset = 0;
    let mut start = None;
    let mut end = sql.len();

    for line in sql.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if start.is_none() && trimmed.starts_with("-- Up") {
            start = Some(offset + line.len());
        } else if start.is_some() && trimmed.starts_with("-- Down") {
            end = offset;
            break;
        }
        offset += line.len();
    }

    let start = start.ok_or_else(|| anyhow::anyhow!("no `-- Up` section"))?;
    Ok(&sql[start..end])
}
