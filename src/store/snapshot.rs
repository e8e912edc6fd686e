//! # Persistent Snapshot Store
//!
//! Whole-document storage for the "last known good" copy of every resource
//! collection, used to serve reads when the server is unreachable.
//!
//! The snapshot is only ever written as a single-row replace; there is no
//! partial patching, so a crash mid-write can never leave a torn document.
//! Reads apply a TTL: a snapshot older than the configured age is deleted
//! and reported as absent.
//!
//! ## Failure Semantics
//!
//! This component never errors across its public boundary. A failed write
//! degrades to `false`, a missing/expired/corrupt document to `None`; the
//! coordinator treats both as non-fatal and keeps serving the in-memory view.

use chrono::{DateTime, Utc};
use sqlx::{Result as SqlxResult, Row, SqlitePool};

use crate::config::SyncConfig;
use crate::model::{Collections, Snapshot};

/// Row key of the single snapshot document
const SNAPSHOT_KEY: &str = "resources";

/// Durable store for the resource snapshot document
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
    ttl: chrono::Duration,
    quota_bytes: Option<usize>,
    heavy_fields: Vec<String>,
}

impl SnapshotStore {
    pub(crate) fn new(pool: SqlitePool, config: &SyncConfig) -> Self {
        Self {
            pool,
            ttl: config.snapshot_ttl,
            quota_bytes: config.snapshot_quota_bytes,
            heavy_fields: config.heavy_fields.clone(),
        }
    }

    /// Persist the collections as a fresh snapshot
    ///
    /// On a quota failure, retries once with a "light" payload that strips
    /// the configured heavy fields (photo blobs and the like) from every
    /// record. Returns `false` only when the light write also fails.
    pub async fn save(&self, collections: &Collections) -> bool {
        self.save_at(collections, Utc::now()).await
    }

    /// Save with an explicit capture time; split out so expiry is testable
    async fn save_at(&self, collections: &Collections, captured_at: DateTime<Utc>) -> bool {
        if let Ok(body) = serde_json::to_string(collections) {
            if self.fits_quota(&body) {
                match self.write(&body, captured_at, false).await {
                    Ok(()) => return true,
                    Err(err) => {
                        tracing::warn!("full snapshot write failed, retrying light: {err}");
                    }
                }
            } else {
                tracing::warn!(
                    bytes = body.len(),
                    "full snapshot exceeds storage quota, retrying light"
                );
            }
        }

        let stripped = self.strip_heavy_fields(collections);
        let body = match serde_json::to_string(&stripped) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("snapshot serialization failed: {err}");
                return false;
            }
        };
        if !self.fits_quota(&body) {
            tracing::warn!(
                bytes = body.len(),
                "light snapshot still exceeds storage quota, keeping session-only state"
            );
            return false;
        }
        match self.write(&body, captured_at, true).await {
            Ok(()) => {
                tracing::info!("snapshot persisted in light mode");
                true
            }
            Err(err) => {
                tracing::warn!("light snapshot write failed, keeping session-only state: {err}");
                false
            }
        }
    }

    /// Load the snapshot, honoring the TTL
    ///
    /// Returns `None` when no snapshot exists, when it fails to parse, or
    /// when it is older than the TTL. An expired document is proactively
    /// deleted so future loads stay cheap.
    pub async fn load(&self) -> Option<Snapshot> {
        let row = match sqlx::query(
            "SELECT body, captured_at, light FROM snapshots WHERE key = ?",
        )
        .bind(SNAPSHOT_KEY)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row?,
            Err(err) => {
                tracing::warn!("snapshot read failed: {err}");
                return None;
            }
        };

        let captured_at: String = row.try_get("captured_at").ok()?;
        let captured_at = match DateTime::parse_from_rfc3339(&captured_at) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(err) => {
                tracing::warn!("snapshot has unreadable capture time, treating as absent: {err}");
                return None;
            }
        };

        if Utc::now() - captured_at > self.ttl {
            tracing::info!(captured_at = %captured_at, "snapshot expired, deleting");
            self.clear().await;
            return None;
        }

        let body: String = row.try_get("body").ok()?;
        let collections: Collections = match serde_json::from_str(&body) {
            Ok(collections) => collections,
            Err(err) => {
                tracing::warn!("snapshot body is corrupt, treating as absent: {err}");
                return None;
            }
        };
        let light: bool = row.try_get("light").unwrap_or(false);

        Some(Snapshot {
            captured_at,
            collections,
            light,
        })
    }

    /// Capture time of the persisted snapshot, for "data as of …" messaging
    ///
    /// Applies the same TTL as [`load`]: a capture time [`load`] would
    /// refuse to serve is never advertised. Read-only: the expired row is
    /// left for [`load`] to delete.
    ///
    /// [`load`]: Self::load
    pub async fn timestamp(&self) -> Option<DateTime<Utc>> {
        let row = sqlx::query("SELECT captured_at FROM snapshots WHERE key = ?")
            .bind(SNAPSHOT_KEY)
            .fetch_optional(&self.pool)
            .await
            .ok()??;
        let captured_at: String = row.try_get("captured_at").ok()?;
        let captured_at = DateTime::parse_from_rfc3339(&captured_at)
            .ok()?
            .with_timezone(&Utc);
        if Utc::now() - captured_at > self.ttl {
            return None;
        }
        Some(captured_at)
    }

    /// Delete the snapshot unconditionally (logout, manual cache reset)
    pub async fn clear(&self) {
        if let Err(err) = sqlx::query("DELETE FROM snapshots WHERE key = ?")
            .bind(SNAPSHOT_KEY)
            .execute(&self.pool)
            .await
        {
            tracing::warn!("snapshot clear failed: {err}");
        }
    }

    async fn write(&self, body: &str, captured_at: DateTime<Utc>, light: bool) -> SqlxResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (key, body, captured_at, light)
             VALUES (?, ?, ?, ?)",
        )
        .bind(SNAPSHOT_KEY)
        .bind(body)
        .bind(captured_at.to_rfc3339())
        .bind(light)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn fits_quota(&self, body: &str) -> bool {
        match self.quota_bytes {
            Some(quota) => body.len() <= quota,
            None => true,
        }
    }

    /// Replace heavy fields (embedded photos etc.) with empty values
    fn strip_heavy_fields(&self, collections: &Collections) -> Collections {
        let mut stripped = collections.clone();
        for records in stripped.values_mut() {
            for record in records.iter_mut() {
                let Some(object) = record.as_object_mut() else {
                    continue;
                };
                for field in &self.heavy_fields {
                    if let Some(slot) = object.get_mut(field) {
                        *slot = match slot {
                            serde_json::Value::Array(_) => serde_json::Value::Array(Vec::new()),
                            serde_json::Value::String(_) => {
                                serde_json::Value::String(String::new())
                            }
                            _ => serde_json::Value::Null,
                        };
                    }
                }
            }
        }
        stripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;
    use serde_json::json;

    fn sample_collections() -> Collections {
        let mut collections = Collections::new();
        collections.insert(
            "clients".to_string(),
            vec![json!({"id": "c-1", "name": "Acme Field Services"})],
        );
        collections.insert(
            "reports".to_string(),
            vec![json!({"id": "r-1", "photos": ["aGVhdnkgYmxvYg==", "bW9yZSBibG9i"]})],
        );
        collections
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let snapshots = store.snapshots(&config);

        assert!(snapshots.save(&sample_collections()).await);
        let snapshot = snapshots.load().await.expect("snapshot present");
        assert!(!snapshot.light);
        assert_eq!(snapshot.collections["clients"].len(), 1);
        assert_eq!(
            snapshot.collections["reports"][0]["photos"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let snapshots = store.snapshots(&config);
        assert!(snapshots.load().await.is_none());
        assert!(snapshots.timestamp().await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let snapshots = store.snapshots(&config);
        let collections = sample_collections();

        // 31 days old: absent, and the stale row is deleted
        assert!(
            snapshots
                .save_at(&collections, Utc::now() - chrono::Duration::days(31))
                .await
        );
        assert!(snapshots.load().await.is_none());
        assert!(snapshots.timestamp().await.is_none());

        // 29 days old: still served
        assert!(
            snapshots
                .save_at(&collections, Utc::now() - chrono::Duration::days(29))
                .await
        );
        assert!(snapshots.load().await.is_some());
    }

    #[tokio::test]
    async fn test_timestamp_ignores_expired_snapshot() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let snapshots = store.snapshots(&config);

        assert!(
            snapshots
                .save_at(&sample_collections(), Utc::now() - chrono::Duration::days(31))
                .await
        );
        // Past the TTL: no "data as of" message for data load() won't serve
        assert!(snapshots.timestamp().await.is_none());

        // Read-only: the expired row is still there for load() to delete
        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_quota_degrades_to_light_write() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;

        // Full payload (with photo blobs) exceeds the quota; stripped payload fits.
        let full_len = serde_json::to_string(&sample_collections()).unwrap().len();
        config.snapshot_quota_bytes = Some(full_len - 1);
        let snapshots = store.snapshots(&config);

        assert!(snapshots.save(&sample_collections()).await);
        let snapshot = snapshots.load().await.expect("light snapshot present");
        assert!(snapshot.light);
        assert_eq!(
            snapshot.collections["reports"][0]["photos"],
            json!([]),
            "heavy fields must be emptied in the light document"
        );
        // Untouched collections survive intact
        assert_eq!(snapshot.collections["clients"][0]["name"], "Acme Field Services");
    }

    #[tokio::test]
    async fn test_quota_too_small_even_for_light() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        config.snapshot_quota_bytes = Some(4);
        let snapshots = store.snapshots(&config);

        assert!(!snapshots.save(&sample_collections()).await);
        assert!(snapshots.load().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_body_treated_as_absent() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let snapshots = store.snapshots(&config);

        sqlx::query(
            "INSERT OR REPLACE INTO snapshots (key, body, captured_at, light)
             VALUES (?, ?, ?, 0)",
        )
        .bind(SNAPSHOT_KEY)
        .bind("{ not json")
        .bind(Utc::now().to_rfc3339())
        .execute(store.pool())
        .await
        .unwrap();

        assert!(snapshots.load().await.is_none());
        // timestamp() still works: the capture time column is intact
        assert!(snapshots.timestamp().await.is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let snapshots = store.snapshots(&config);

        assert!(snapshots.save(&sample_collections()).await);
        snapshots.clear().await;
        assert!(snapshots.load().await.is_none());
        // Idempotent
        snapshots.clear().await;
    }
}
