//! Durability worker — debounced flush of dirty documents to Postgres.
//!
//! DESIGN
//! ======
//! A background task snapshots the dirty and pending-delete sets, performs
//! the I/O lock-free, and acknowledges back into the store only on success.
//! A document written again between snapshot and ack keeps its dirty flag,
//! so durability is prioritized over duplicate upserts. Transient database
//! faults are retried with bounded exponential back-off; a batch that still
//! fails keeps its flags and is picked up again on the next cycle.

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{BoardId, Collection, DocId, FlushBatch, Store};
use crate::config::{StoreConfig, env_parse};
use crate::model::Fields;

const DEFAULT_FLUSH_RETRIES: usize = 3;
const DEFAULT_FLUSH_RETRY_BASE_MS: u64 = 50;

/// Retry knobs for one flush batch.
#[derive(Clone, Copy)]
pub(crate) struct FlushRetryConfig {
    /// Attempts per batch before giving up until the next cycle.
    pub(crate) retries: usize,
    /// Base delay for linear-multiple back-off between attempts.
    pub(crate) retry_base_ms: u64,
}

impl FlushRetryConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            retries: env_parse("FLUSH_RETRIES", DEFAULT_FLUSH_RETRIES),
            retry_base_ms: env_parse("FLUSH_RETRY_BASE_MS", DEFAULT_FLUSH_RETRY_BASE_MS),
        }
    }
}

/// Spawn the background flush task. Returns a handle for shutdown.
pub fn spawn_flush_task(store: Store, config: StoreConfig) -> JoinHandle<()> {
    let retry = FlushRetryConfig::from_env();
    info!(
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        retries = retry.retries,
        retry_base_ms = retry.retry_base_ms,
        "store flush configured"
    );
    tokio::spawn(async move {
        loop {
            flush_once(&store, retry).await;
            tokio::time::sleep(config.flush_interval).await;
        }
    })
}

/// One flush cycle over every board with pending work.
pub(crate) async fn flush_once(store: &Store, retry: FlushRetryConfig) {
    let batches = store.collect_dirty().await;
    for batch in batches {
        if flush_batch_with_retry(store.pool(), &batch, retry).await {
            store.ack_flush(&batch).await;
        }
    }
}

/// Returns whether the batch landed.
async fn flush_batch_with_retry(pool: &PgPool, batch: &FlushBatch, retry: FlushRetryConfig) -> bool {
    for attempt in 1..=retry.retries.max(1) {
        match flush_batch(pool, batch).await {
            Ok(()) => return true,
            Err(e) if attempt < retry.retries => {
                warn!(
                    error = %e,
                    attempt,
                    total = retry.retries,
                    board_id = %batch.board_id,
                    "store flush failed; backing off"
                );
                tokio::time::sleep(Duration::from_millis(attempt as u64 * retry.retry_base_ms)).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    board_id = %batch.board_id,
                    upserts = batch.upserts.len(),
                    deletes = batch.deletes.len(),
                    "store flush failed after retries; retrying next cycle"
                );
            }
        }
    }
    false
}

async fn flush_batch(pool: &PgPool, batch: &FlushBatch) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    if let Some(meta) = &batch.meta {
        sqlx::query(
            "INSERT INTO boards (id, fields) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET fields = EXCLUDED.fields",
        )
        .bind(batch.board_id)
        .bind(serde_json::to_value(meta).unwrap_or_default())
        .execute(tx.as_mut())
        .await?;
    }

    for (collection, doc_id, fields, updated_at) in &batch.upserts {
        let json = serde_json::to_value(fields).unwrap_or_default();
        match collection {
            Collection::Objects => {
                sqlx::query(
                    "INSERT INTO board_objects (board_id, id, fields, updated_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (board_id, id) DO UPDATE
                         SET fields = EXCLUDED.fields, updated_at = EXCLUDED.updated_at",
                )
                .bind(batch.board_id)
                .bind(doc_id)
                .bind(&json)
                .bind(updated_at)
                .execute(tx.as_mut())
                .await?;
            }
            Collection::Presence => {
                sqlx::query(
                    "INSERT INTO presence (board_id, user_id, fields, updated_at)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (board_id, user_id) DO UPDATE
                         SET fields = EXCLUDED.fields, updated_at = EXCLUDED.updated_at",
                )
                .bind(batch.board_id)
                .bind(doc_id)
                .bind(&json)
                .bind(updated_at)
                .execute(tx.as_mut())
                .await?;
            }
        }
    }

    for (collection, doc_id) in &batch.deletes {
        match collection {
            Collection::Objects => {
                sqlx::query("DELETE FROM board_objects WHERE board_id = $1 AND id = $2")
                    .bind(batch.board_id)
                    .bind(doc_id)
                    .execute(tx.as_mut())
                    .await?;
            }
            Collection::Presence => {
                sqlx::query("DELETE FROM presence WHERE board_id = $1 AND user_id = $2")
                    .bind(batch.board_id)
                    .bind(doc_id)
                    .execute(tx.as_mut())
                    .await?;
            }
        }
    }

    tx.commit().await
}

/// Load every document of one board collection from Postgres.
pub async fn load_collection(
    pool: &PgPool,
    board_id: BoardId,
    collection: Collection,
) -> Result<Vec<(DocId, Fields)>, sqlx::Error> {
    let query = match collection {
        Collection::Objects => "SELECT id, fields FROM board_objects WHERE board_id = $1",
        Collection::Presence => "SELECT user_id, fields FROM presence WHERE board_id = $1",
    };
    let rows = sqlx::query_as::<_, (String, serde_json::Value)>(query)
        .bind(board_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(doc_id, json)| {
            let fields: Fields = match json {
                serde_json::Value::Object(map) => map.into_iter().collect(),
                _ => Fields::new(),
            };
            (doc_id, fields)
        })
        .collect())
}

/// Remove a board and both sub-collections from the durable layer.
pub async fn destroy_board(pool: &PgPool, board_id: BoardId) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM board_objects WHERE board_id = $1")
        .bind(board_id)
        .execute(tx.as_mut())
        .await?;
    sqlx::query("DELETE FROM presence WHERE board_id = $1")
        .bind(board_id)
        .execute(tx.as_mut())
        .await?;
    sqlx::query("DELETE FROM boards WHERE id = $1")
        .bind(board_id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_helpers::{seed_board, test_store};
    use crate::store::WriteMode;
    use serde_json::json;

    fn doc() -> Fields {
        [("type".to_owned(), json!("sticky")), ("x".to_owned(), json!(1.0))]
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn collect_dirty_snapshots_pending_work() {
        let store = test_store();
        let board = seed_board(&store).await;
        store
            .put(board, Collection::Objects, "obj-0001", doc(), WriteMode::Create, "a")
            .await
            .unwrap();
        store
            .put(board, Collection::Objects, "obj-0002", doc(), WriteMode::Create, "a")
            .await
            .unwrap();
        store.delete(board, Collection::Objects, "obj-0002").await.unwrap();

        let batches = store.collect_dirty().await;
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.board_id, board);
        assert_eq!(batch.upserts.len(), 1, "deleted doc is not upserted");
        assert_eq!(batch.deletes.len(), 1);
    }

    #[tokio::test]
    async fn ack_clears_flags_for_unchanged_docs() {
        let store = test_store();
        let board = seed_board(&store).await;
        store
            .put(board, Collection::Objects, "obj-0001", doc(), WriteMode::Create, "a")
            .await
            .unwrap();

        let batches = store.collect_dirty().await;
        store.ack_flush(&batches[0]).await;

        assert!(store.collect_dirty().await.is_empty());
        assert!(store.evict_if_idle(board).await);
    }

    #[tokio::test]
    async fn ack_keeps_flags_for_docs_written_after_snapshot() {
        let store = test_store();
        let board = seed_board(&store).await;
        store
            .put(board, Collection::Objects, "obj-0001", doc(), WriteMode::Create, "a")
            .await
            .unwrap();
        let batches = store.collect_dirty().await;

        // The doc changes between snapshot and ack.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let patch: Fields = [("x".to_owned(), json!(9.0))].into_iter().collect();
        store
            .put(board, Collection::Objects, "obj-0001", patch, WriteMode::Merge, "a")
            .await
            .unwrap();

        store.ack_flush(&batches[0]).await;
        let remaining = store.collect_dirty().await;
        assert_eq!(remaining.len(), 1, "newer write keeps the dirty flag");
    }

    #[tokio::test]
    async fn failed_flush_leaves_flags_for_next_cycle() {
        // The lazy pool cannot reach Postgres, so every attempt fails.
        let store = test_store();
        let board = seed_board(&store).await;
        store
            .put(board, Collection::Objects, "obj-0001", doc(), WriteMode::Create, "a")
            .await
            .unwrap();

        flush_once(&store, FlushRetryConfig { retries: 1, retry_base_ms: 1 }).await;
        assert_eq!(store.collect_dirty().await.len(), 1, "dirty work survives a failed flush");
    }
}
