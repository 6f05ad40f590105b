use chrono::{Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::store::Store;
use crate::types::Result;

/// Persisted fingerprint → translation cache.
///
/// Session hit/miss counters answer "is caching working right now";
/// the persisted totals answer "how big is the cache".
pub struct ContentCache {
    db: SqlitePool,
    session_hits: AtomicU64,
    session_misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub session_hits: u64,
    pub session_misses: u64,
    pub session_hit_rate_pct: f64,
    pub total_entries: i64,
    pub total_uses: i64,
}

/// Deterministic fingerprint of the UTF-8 bytes of `text`.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ContentCache {
    pub fn new(store: &Store) -> Self {
        Self {
            db: store.pool().clone(),
            session_hits: AtomicU64::new(0),
            session_misses: AtomicU64::new(0),
        }
    }

    /// Looks up the cached derivation of `text`. A hit refreshes
    /// `last_used` and bumps `use_count`; a miss leaves no trace.
    pub async fn get(&self, text: &str) -> Result<Option<String>> {
        let key = fingerprint(text);
        let row = sqlx::query(
            "SELECT translated_text FROM translation_cache WHERE fingerprint = ?",
        )
        .bind(&key)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                sqlx::query(
                    "UPDATE translation_cache SET last_used = ?, use_count = use_count + 1 WHERE fingerprint = ?",
                )
                .bind(Utc::now())
                .bind(&key)
                .execute(&self.db)
                .await?;
                self.session_hits.fetch_add(1, Ordering::Relaxed);
                debug!("cache hit for {}", &key[..8]);
                Ok(Some(row.try_get("translated_text")?))
            }
            None => {
                self.session_misses.fetch_add(1, Ordering::Relaxed);
                debug!("cache miss for {}", &key[..8]);
                Ok(None)
            }
        }
    }

    pub async fn set(&self, text: &str, translated: &str) -> Result<()> {
        let key = fingerprint(text);
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO translation_cache
                (fingerprint, original_text, translated_text, created_at, last_used, use_count)
            VALUES (?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&key)
        .bind(text)
        .bind(translated)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;
        debug!("cached translation {} ({} chars)", &key[..8], text.len());
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let session_hits = self.session_hits.load(Ordering::Relaxed);
        let session_misses = self.session_misses.load(Ordering::Relaxed);
        let session_total = session_hits + session_misses;
        let session_hit_rate_pct = if session_total > 0 {
            (session_hits as f64 / session_total as f64) * 100.0
        } else {
            0.0
        };

        let row = sqlx::query(
            "SELECT COUNT(*) as entries, COALESCE(SUM(use_count), 0) as uses FROM translation_cache",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(CacheStats {
            session_hits,
            session_misses,
            session_hit_rate_pct,
            total_entries: row.try_get("entries")?,
            total_uses: row.try_get("uses")?,
        })
    }

    /// Deletes entries not used within the retention window.
    pub async fn sweep(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let result = sqlx::query("DELETE FROM translation_cache WHERE last_used < ?")
            .bind(cutoff)
            .execute(&self.db)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("swept {} cache entries older than {} days", deleted, retention_days);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint("hello"), fingerprint("hello"));
        assert_ne!(fingerprint("hello"), fingerprint("hello "));
    }

    #[test]
    fn fingerprint_is_hex_of_fixed_width() {
        let fp = fingerprint("anything");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
