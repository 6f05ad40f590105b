use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{OwnerConfig, RelayError, Result, SourceBinding, SourceKind};

/// Owns the SQLite pool and the source-binding configuration. Delivery
/// records and cache entries are managed by [`crate::DedupStore`] and
/// [`crate::ContentCache`], which share this pool.
pub struct Store {
    db: SqlitePool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_owners: i64,
    pub total_sources: i64,
    pub total_delivered: i64,
    pub delivered_by_source: HashMap<String, i64>,
}

impl Store {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(RelayError::Database)?
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { db };
        store.init_schema().await?;
        info!("store initialized at {}", url);
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps every query
    /// on the same memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS source_bindings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                url TEXT NOT NULL,
                channel TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                translate INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(owner_id, url)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delivery_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                item_id TEXT NOT NULL,
                source TEXT NOT NULL,
                title TEXT,
                url TEXT,
                delivered_at TEXT NOT NULL,
                UNIQUE(owner_id, item_id, source)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS translation_cache (
                fingerprint TEXT PRIMARY KEY,
                original_text TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used TEXT NOT NULL,
                use_count INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_delivery_owner_source ON delivery_records(owner_id, source)",
            "CREATE INDEX IF NOT EXISTS idx_delivery_at ON delivery_records(delivered_at)",
            "CREATE INDEX IF NOT EXISTS idx_bindings_owner ON source_bindings(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_cache_last_used ON translation_cache(last_used)",
        ] {
            sqlx::query(index).execute(&self.db).await?;
        }

        debug!("database schema ensured");
        Ok(())
    }

    // ==================== Source bindings ====================

    pub async fn add_binding(
        &self,
        owner_id: i64,
        name: &str,
        kind: SourceKind,
        url: &str,
        channel: &str,
        translate: bool,
    ) -> Result<i64> {
        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO source_bindings (owner_id, name, kind, url, channel, enabled, translate, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(owner_id)
        .bind(name)
        .bind(kind.as_str())
        .bind(url)
        .bind(channel)
        .bind(translate)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        info!("added {} source '{}' for owner {}", kind.as_str(), name, owner_id);
        Ok(result.last_insert_rowid())
    }

    pub async fn remove_binding(&self, owner_id: i64, url: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM source_bindings WHERE owner_id = ? AND url = ?")
            .bind(owner_id)
            .bind(url)
            .execute(&self.db)
            .await?;
        info!("removed source {} for owner {}", url, owner_id);
        Ok(result.rows_affected())
    }

    pub async fn set_binding_enabled(&self, binding_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE source_bindings SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(binding_id)
            .execute(&self.db)
            .await?;
        info!(
            "binding {} {}",
            binding_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// All enabled bindings grouped by owner, for one delivery sweep.
    pub async fn load_owner_configs(&self) -> Result<Vec<OwnerConfig>> {
        let bindings = self.enabled_bindings().await?;

        let mut owners: Vec<OwnerConfig> = Vec::new();
        for binding in bindings {
            match owners.last_mut() {
                Some(owner) if owner.owner_id == binding.owner_id => {
                    owner.bindings.push(binding)
                }
                _ => owners.push(OwnerConfig {
                    owner_id: binding.owner_id,
                    bindings: vec![binding],
                }),
            }
        }
        Ok(owners)
    }

    pub async fn enabled_bindings(&self) -> Result<Vec<SourceBinding>> {
        let rows = sqlx::query(
            "SELECT * FROM source_bindings WHERE enabled = 1 ORDER BY owner_id, id",
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(binding_from_row).collect()
    }

    pub async fn list_bindings(&self, owner_id: i64) -> Result<Vec<SourceBinding>> {
        let rows = sqlx::query("SELECT * FROM source_bindings WHERE owner_id = ? ORDER BY id")
            .bind(owner_id)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(binding_from_row).collect()
    }

    // ==================== Statistics ====================

    pub async fn statistics(&self) -> Result<Statistics> {
        let total_owners: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT owner_id) FROM source_bindings")
                .fetch_one(&self.db)
                .await?;
        let total_sources: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM source_bindings WHERE enabled = 1")
                .fetch_one(&self.db)
                .await?;
        let total_delivered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_records")
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query(
            "SELECT source, COUNT(*) as count FROM delivery_records GROUP BY source",
        )
        .fetch_all(&self.db)
        .await?;
        let mut delivered_by_source = HashMap::new();
        for row in rows {
            let source: String = row.try_get("source")?;
            let count: i64 = row.try_get("count")?;
            delivered_by_source.insert(source, count);
        }

        Ok(Statistics {
            total_owners,
            total_sources,
            total_delivered,
            delivered_by_source,
        })
    }
}

fn binding_from_row(row: &SqliteRow) -> Result<SourceBinding> {
    let kind: String = row.try_get("kind")?;
    let kind = SourceKind::parse(&kind)
        .ok_or_else(|| RelayError::Config(format!("unknown source kind: {kind}")))?;
    Ok(SourceBinding {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        kind,
        url: row.try_get("url")?,
        channel: row.try_get("channel")?,
        enabled: row.try_get("enabled")?,
        translate: row.try_get("translate")?,
    })
}
