use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::store::Store;
use crate::types::Result;

/// Tracks which items have already been delivered per owner scope.
///
/// Records are write-once: a record exists if and only if the delivery
/// side-effect was observed to succeed, so a failed send is naturally
/// retried on the next cycle.
pub struct DedupStore {
    db: SqlitePool,
}

impl DedupStore {
    pub fn new(store: &Store) -> Self {
        Self {
            db: store.pool().clone(),
        }
    }

    pub async fn is_delivered(&self, owner_id: i64, item_id: &str, source: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM delivery_records WHERE owner_id = ? AND item_id = ? AND source = ?",
        )
        .bind(owner_id)
        .bind(item_id)
        .bind(source)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.is_some())
    }

    /// Records a successful delivery. Duplicate marks are no-ops.
    pub async fn mark_delivered(
        &self,
        owner_id: i64,
        item_id: &str,
        source: &str,
        title: &str,
        url: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO delivery_records (owner_id, item_id, source, title, url, delivered_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(owner_id)
        .bind(item_id)
        .bind(source)
        .bind(title)
        .bind(url)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        debug!("marked delivered: owner={} source={} item={}", owner_id, source, item_id);
        Ok(())
    }

    /// Deletes records older than the retention window. Sources never
    /// resurface items older than the window with the same id, so this
    /// only reduces storage.
    pub async fn sweep(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let result = sqlx::query("DELETE FROM delivery_records WHERE delivered_at < ?")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("swept {} delivery records older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }

    pub async fn record_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_records")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
