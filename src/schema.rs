//! The chunk table contract shared by ingestion and storage.
//!
//! [`CHUNK_COLUMNS`] is the single source of truth for the valid chunk
//! shape. Ingestion builds rows against it, and the store validates
//! every incoming batch against it before anything is persisted:
//! missing or unexpected columns fail fast rather than being silently
//! dropped or widened.

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::models::Chunk;

/// Canonical column set of the chunk table, in storage order.
pub const CHUNK_COLUMNS: [&str; 18] = [
    "chunk_id",
    "document_type",
    "document_id",
    "post_slug",
    "post_title",
    "post_date",
    "media_uuid",
    "media_type",
    "media_path",
    "original_filename",
    "message_date",
    "author_uuid",
    "chunk_index",
    "content",
    "embedding",
    "tags",
    "authors",
    "category",
];

/// Table holding one row per chunk.
pub const CHUNK_TABLE: &str = "chunks";
/// Single-row table fingerprinting the backing database file.
pub const METADATA_TABLE: &str = "dataset_metadata";
/// Single-row table describing the currently-built ANN index.
pub const INDEX_META_TABLE: &str = "index_meta";

pub const CREATE_CHUNKS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT NOT NULL,
    document_type TEXT NOT NULL,
    document_id TEXT NOT NULL,
    post_slug TEXT,
    post_title TEXT,
    post_date TEXT,
    media_uuid TEXT,
    media_type TEXT,
    media_path TEXT,
    original_filename TEXT,
    message_date INTEGER,
    author_uuid TEXT,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    authors TEXT NOT NULL DEFAULT '[]',
    category TEXT
)
"#;

pub const CREATE_METADATA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dataset_metadata (
    path TEXT PRIMARY KEY,
    mtime_ns INTEGER,
    size INTEGER,
    row_count INTEGER,
    checksum TEXT
)
"#;

pub const CREATE_INDEX_META_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    index_name TEXT PRIMARY KEY,
    mode TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    threshold INTEGER NOT NULL,
    nlist INTEGER NOT NULL,
    embedding_dim INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// A materialized batch of chunk rows awaiting insertion.
///
/// Rows are held as plain JSON objects, so input constructed by another
/// component or session arrives fully materialized — the store never
/// assumes shared execution state with the producer. Validation against
/// the fixed column contract happens at `add` time.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    rows: Vec<Map<String, Value>>,
}

impl RowBatch {
    /// Wrap foreign-built rows. No validation happens here; the store
    /// validates at `add` time so nothing is persisted on mismatch.
    pub fn from_records(rows: Vec<Map<String, Value>>) -> Self {
        Self { rows }
    }

    /// Serialize typed chunks through the same insertion gate the
    /// foreign-row path uses.
    pub fn from_chunks(chunks: &[Chunk]) -> Result<Self, StoreError> {
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match serde_json::to_value(chunk)? {
                Value::Object(map) => rows.push(map),
                other => {
                    return Err(StoreError::Schema(format!(
                        "chunk serialized to non-object value: {other:?}"
                    )))
                }
            }
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check every row's column set against [`CHUNK_COLUMNS`].
    ///
    /// The error message lists missing columns first, then unexpected
    /// ones, both sorted, so callers get the full mismatch at once.
    pub fn validate_columns(&self) -> Result<(), StoreError> {
        for row in &self.rows {
            let mut missing: Vec<&str> = CHUNK_COLUMNS
                .iter()
                .copied()
                .filter(|col| !row.contains_key(*col))
                .collect();
            let mut unexpected: Vec<&str> = row
                .keys()
                .filter(|key| !CHUNK_COLUMNS.contains(&key.as_str()))
                .map(String::as_str)
                .collect();
            if missing.is_empty() && unexpected.is_empty() {
                continue;
            }
            missing.sort_unstable();
            unexpected.sort_unstable();
            let mut parts = Vec::new();
            if !missing.is_empty() {
                parts.push(format!("missing columns: {}", missing.join(", ")));
            }
            if !unexpected.is_empty() {
                parts.push(format!("unexpected columns: {}", unexpected.join(", ")));
            }
            return Err(StoreError::Schema(format!(
                "rows do not match the chunk store schema ({})",
                parts.join("; ")
            )));
        }
        Ok(())
    }

    /// Deserialize validated rows into typed chunks.
    pub fn into_chunks(self) -> Result<Vec<Chunk>, StoreError> {
        self.rows
            .into_iter()
            .map(|map| serde_json::from_value(Value::Object(map)).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use crate::models::DocumentType;

    fn sample_chunk() -> Chunk {
        Chunk {
            chunk_id: "intro-post_0".to_string(),
            document_type: DocumentType::Post,
            document_id: "intro-post".to_string(),
            post_slug: Some("intro-post".to_string()),
            post_title: Some("Intro".to_string()),
            post_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            media_uuid: None,
            media_type: None,
            media_path: None,
            original_filename: None,
            message_date: None,
            author_uuid: None,
            chunk_index: 0,
            content: "hello".to_string(),
            embedding: vec![0.0; 4],
            tags: vec!["welcome".to_string()],
            authors: vec![],
            category: None,
        }
    }

    #[test]
    fn test_typed_chunks_match_contract() {
        let batch = RowBatch::from_chunks(&[sample_chunk()]).unwrap();
        batch.validate_columns().unwrap();
    }

    #[test]
    fn test_missing_column_rejected() {
        let mut row = serde_json::to_value(sample_chunk()).unwrap();
        row.as_object_mut().unwrap().remove("content");
        let batch = RowBatch::from_records(vec![row.as_object().unwrap().clone()]);
        let err = batch.validate_columns().unwrap_err();
        assert!(err.to_string().contains("missing columns: content"));
    }

    #[test]
    fn test_unexpected_column_rejected() {
        let mut row = serde_json::to_value(sample_chunk()).unwrap();
        row.as_object_mut()
            .unwrap()
            .insert("extra_field".to_string(), Value::Null);
        let batch = RowBatch::from_records(vec![row.as_object().unwrap().clone()]);
        let err = batch.validate_columns().unwrap_err();
        assert!(err.to_string().contains("unexpected columns: extra_field"));
    }

    #[test]
    fn test_both_mismatches_reported_sorted() {
        let mut row = serde_json::to_value(sample_chunk()).unwrap();
        let map = row.as_object_mut().unwrap();
        map.remove("tags");
        map.remove("authors");
        map.insert("zz".to_string(), Value::Null);
        map.insert("aa".to_string(), Value::Null);
        let batch = RowBatch::from_records(vec![map.clone()]);
        let msg = batch.validate_columns().unwrap_err().to_string();
        assert!(msg.contains("missing columns: authors, tags"));
        assert!(msg.contains("unexpected columns: aa, zz"));
    }

    #[test]
    fn test_round_trip_into_chunks() {
        let batch = RowBatch::from_chunks(&[sample_chunk()]).unwrap();
        let chunks = batch.into_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "intro-post_0");
        assert_eq!(chunks[0].tags, vec!["welcome".to_string()]);
    }
}
