//! SQLite-backed chunk store.
//!
//! Owns durability and schema enforcement for the chunk table plus the
//! two single-row metadata tables (`dataset_metadata`, `index_meta`).
//! Inserts are all-or-nothing: a batch that fails validation or insert
//! leaves the table untouched.

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Result, StoreError};
use crate::models::{Chunk, DatasetMetadata, DocumentType, IndexMeta};
use crate::schema::{
    RowBatch, CREATE_CHUNKS_SQL, CREATE_INDEX_META_SQL, CREATE_METADATA_SQL,
};

/// Embedded store for chunk rows and their metadata tables.
pub struct ChunkStore {
    pool: SqlitePool,
    config: Config,
}

impl ChunkStore {
    /// Open the store, creating the backing database and all tables.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config)
            .await
            .map_err(|e| StoreError::Schema(format!("failed to open store: {e}")))?;
        let store = Self { pool, config };
        sqlx::query(CREATE_CHUNKS_SQL).execute(&store.pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_chunk_id ON chunks(chunk_id)")
            .execute(&store.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
            .execute(&store.pool)
            .await?;
        store.ensure_metadata_table().await?;
        store.ensure_index_meta_table().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store-wide embedding dimensionality (768 by contract).
    pub fn embedding_dim(&self) -> usize {
        self.config.db.embedding_dim
    }

    fn backing_path(&self) -> String {
        self.config.db.path.display().to_string()
    }

    /// Append a batch of chunk rows.
    ///
    /// The batch's column set must be exactly the declared chunk schema;
    /// missing or unexpected columns fail with a schema error before any
    /// row is written. Every embedding in the batch must match the
    /// store's dimensionality. The insert runs in one transaction, so a
    /// failure persists nothing. `chunk_id` uniqueness is deliberately
    /// not enforced here — content-addressed IDs collide on identical
    /// content and duplicate handling belongs to the caller.
    pub async fn add(&self, batch: RowBatch) -> Result<()> {
        if batch.is_empty() {
            debug!("add called with empty batch");
            return Ok(());
        }
        batch.validate_columns()?;
        let chunks = batch.into_chunks()?;
        self.validate_embedding_dimensions(&chunks)?;

        let mut tx = self.pool.begin().await?;
        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    chunk_id, document_type, document_id,
                    post_slug, post_title, post_date,
                    media_uuid, media_type, media_path, original_filename,
                    message_date, author_uuid,
                    chunk_index, content, embedding, tags, authors, category
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(chunk.document_type.as_str())
            .bind(&chunk.document_id)
            .bind(&chunk.post_slug)
            .bind(&chunk.post_title)
            .bind(chunk.post_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(&chunk.media_uuid)
            .bind(&chunk.media_type)
            .bind(&chunk.media_path)
            .bind(&chunk.original_filename)
            .bind(chunk.message_date.map(|dt| dt.timestamp_micros()))
            .bind(&chunk.author_uuid)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(serde_json::to_string(&chunk.tags)?)
            .bind(serde_json::to_string(&chunk.authors)?)
            .bind(&chunk.category)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("Appended {} chunks to store", chunks.len());

        self.refresh_metadata().await?;
        Ok(())
    }

    fn validate_embedding_dimensions(&self, chunks: &[Chunk]) -> Result<()> {
        let expected = self.embedding_dim();
        for chunk in chunks {
            if chunk.embedding.len() != expected {
                return Err(StoreError::Dimension {
                    expected,
                    got: chunk.embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// All stored rows ordered by `chunk_id` (then `chunk_index` for
    /// duplicate IDs). Diagnostics and tests only; search never needs it.
    pub async fn get_all(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks ORDER BY chunk_id, chunk_index")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    pub async fn row_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Every `(chunk_id, embedding)` pair, ordered by `chunk_id` so index
    /// builds are deterministic.
    pub async fn scan_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query("SELECT chunk_id, embedding FROM chunks ORDER BY chunk_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("chunk_id"), blob_to_vec(&blob))
            })
            .collect())
    }

    /// Fetch full rows for a candidate set of chunk IDs.
    pub async fn fetch_by_chunk_ids(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM chunks WHERE chunk_id IN ({placeholders}) ORDER BY chunk_id, chunk_index"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(chunk_from_row).collect()
    }

    // ───── metadata tables ─────

    /// Create the dataset metadata table when missing. Safe to call
    /// repeatedly.
    pub async fn ensure_metadata_table(&self) -> Result<()> {
        sqlx::query(CREATE_METADATA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Create the index metadata table when missing. Safe to call
    /// repeatedly.
    pub async fn ensure_index_meta_table(&self) -> Result<()> {
        sqlx::query(CREATE_INDEX_META_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist or clear the dataset fingerprint. `None` clears; a value
    /// replaces the single row entirely.
    pub async fn store_metadata(&self, metadata: Option<&DatasetMetadata>) -> Result<()> {
        let path = self.backing_path();
        sqlx::query("DELETE FROM dataset_metadata WHERE path = ?")
            .bind(&path)
            .execute(&self.pool)
            .await?;
        if let Some(meta) = metadata {
            sqlx::query(
                "INSERT INTO dataset_metadata (path, mtime_ns, size, row_count, checksum) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&path)
            .bind(meta.mtime_ns)
            .bind(meta.size)
            .bind(meta.row_count)
            .bind(&meta.checksum)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn read_metadata(&self) -> Result<Option<DatasetMetadata>> {
        let row = sqlx::query(
            "SELECT mtime_ns, size, row_count, checksum FROM dataset_metadata WHERE path = ?",
        )
        .bind(self.backing_path())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| DatasetMetadata {
            mtime_ns: r.get("mtime_ns"),
            size: r.get("size"),
            row_count: r.get("row_count"),
            checksum: r.get("checksum"),
        }))
    }

    /// Recompute and persist the dataset fingerprint from the live
    /// backing file and chunk table.
    pub async fn refresh_metadata(&self) -> Result<()> {
        let row_count = self.row_count().await?;
        let (mtime_ns, size) = match std::fs::metadata(&self.config.db.path) {
            Ok(stat) => {
                let mtime_ns = stat
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as i64)
                    .unwrap_or(0);
                (mtime_ns, stat.len() as i64)
            }
            // In-memory stores have no backing file to fingerprint.
            Err(_) => (0, 0),
        };
        let checksum = self.content_fingerprint().await?;
        self.store_metadata(Some(&DatasetMetadata {
            mtime_ns,
            size,
            row_count,
            checksum: Some(checksum),
        }))
        .await
    }

    /// SHA-256 over the ordered chunk ID list: a cheap content
    /// fingerprint that changes whenever rows change out-of-band.
    async fn content_fingerprint(&self) -> Result<String> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT chunk_id FROM chunks ORDER BY chunk_id")
            .fetch_all(&self.pool)
            .await?;
        let mut hasher = Sha256::new();
        for id in &ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
    }

    // ───── index metadata ─────

    pub async fn index_meta(&self, index_name: &str) -> Result<Option<IndexMeta>> {
        let row = sqlx::query(
            "SELECT index_name, mode, row_count, threshold, nlist, embedding_dim, updated_at FROM index_meta WHERE index_name = ?",
        )
        .bind(index_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| IndexMeta {
            index_name: r.get("index_name"),
            mode: r.get("mode"),
            row_count: r.get("row_count"),
            threshold: r.get("threshold"),
            nlist: r.get("nlist"),
            embedding_dim: r.get("embedding_dim"),
            updated_at: DateTime::from_timestamp(r.get::<i64, _>("updated_at"), 0)
                .unwrap_or_else(Utc::now),
        }))
    }

    /// Record the latest index configuration. Called only after a new
    /// index structure is confirmed built, so a rebuild failure leaves
    /// the previous row intact.
    pub async fn upsert_index_meta(&self, meta: &IndexMeta) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_meta (index_name, mode, row_count, threshold, nlist, embedding_dim, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(index_name) DO UPDATE SET
                mode = excluded.mode,
                row_count = excluded.row_count,
                threshold = excluded.threshold,
                nlist = excluded.nlist,
                embedding_dim = excluded.embedding_dim,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&meta.index_name)
        .bind(&meta.mode)
        .bind(meta.row_count)
        .bind(meta.threshold)
        .bind(meta.nlist)
        .bind(meta.embedding_dim)
        .bind(meta.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_index_meta(&self, index_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_meta WHERE index_name = ?")
            .bind(index_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let document_type = match row.get::<String, _>("document_type").as_str() {
        "post" => DocumentType::Post,
        "media" => DocumentType::Media,
        other => {
            return Err(StoreError::Schema(format!(
                "unknown document_type in stored row: {other:?}"
            )))
        }
    };
    let post_date = row
        .get::<Option<String>, _>("post_date")
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| StoreError::Schema(format!("bad post_date {s:?}: {e}")))
        })
        .transpose()?;
    // Stored as epoch microseconds to preserve sub-second precision.
    let message_date = row
        .get::<Option<i64>, _>("message_date")
        .and_then(DateTime::from_timestamp_micros);
    let embedding_blob: Vec<u8> = row.get("embedding");
    let tags: Vec<String> = serde_json::from_str(row.get::<String, _>("tags").as_str())?;
    let authors: Vec<String> = serde_json::from_str(row.get::<String, _>("authors").as_str())?;

    Ok(Chunk {
        chunk_id: row.get("chunk_id"),
        document_type,
        document_id: row.get("document_id"),
        post_slug: row.get("post_slug"),
        post_title: row.get("post_title"),
        post_date,
        media_uuid: row.get("media_uuid"),
        media_type: row.get("media_type"),
        media_path: row.get("media_path"),
        original_filename: row.get("original_filename"),
        message_date,
        author_uuid: row.get("author_uuid"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        embedding: blob_to_vec(&embedding_blob),
        tags,
        authors,
        category: row.get("category"),
    })
}
