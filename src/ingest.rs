//! Ingestion helpers that turn documents into schema-complete chunk rows.
//!
//! Callers chunk and embed text upstream; these helpers pair the two,
//! derive stable chunk ids, and push the rows through the store's
//! schema gate in one batch.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::models::{Chunk, DocumentType};
use crate::schema::RowBatch;
use crate::store::ChunkStore;

/// Identity of a post being indexed.
#[derive(Debug, Clone, Default)]
pub struct PostDocument {
    pub slug: String,
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub category: Option<String>,
}

/// Identity of a media artifact whose enrichment text is being indexed.
#[derive(Debug, Clone, Default)]
pub struct MediaDocument {
    pub media_uuid: String,
    pub media_type: Option<String>,
    pub media_path: Option<String>,
    pub original_filename: Option<String>,
    pub message_date: Option<DateTime<Utc>>,
    pub author_uuid: Option<String>,
}

/// Index the chunks of one post.
///
/// `chunks` and `embeddings` are parallel slices; a length mismatch is
/// an ingest error and nothing is written. Returns the number of rows
/// stored.
pub async fn index_post(
    store: &ChunkStore,
    post: &PostDocument,
    chunks: &[String],
    embeddings: &[Vec<f32>],
) -> Result<usize> {
    check_pairing(chunks, embeddings)?;
    if chunks.is_empty() {
        return Ok(0);
    }

    let rows: Vec<Chunk> = chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (content, embedding))| Chunk {
            chunk_id: format!("{}_{}", post.slug, i),
            document_type: DocumentType::Post,
            document_id: post.slug.clone(),
            post_slug: Some(post.slug.clone()),
            post_title: post.title.clone(),
            post_date: post.date,
            media_uuid: None,
            media_type: None,
            media_path: None,
            original_filename: None,
            message_date: None,
            author_uuid: None,
            chunk_index: i as i64,
            content: content.clone(),
            embedding: embedding.clone(),
            tags: post.tags.clone(),
            authors: post.authors.clone(),
            category: post.category.clone(),
        })
        .collect();

    let count = rows.len();
    store.add(RowBatch::from_chunks(&rows)?).await?;
    info!("Indexed {} chunks for post {}", count, post.slug);
    Ok(count)
}

/// Index the enrichment chunks of one media artifact.
///
/// Media rows carry no post fields: tags and authors stay empty and
/// the category is unset.
pub async fn index_media_enrichment(
    store: &ChunkStore,
    media: &MediaDocument,
    chunks: &[String],
    embeddings: &[Vec<f32>],
) -> Result<usize> {
    check_pairing(chunks, embeddings)?;
    if chunks.is_empty() {
        return Ok(0);
    }

    let rows: Vec<Chunk> = chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (content, embedding))| Chunk {
            chunk_id: format!("{}_{}", media.media_uuid, i),
            document_type: DocumentType::Media,
            document_id: media.media_uuid.clone(),
            post_slug: None,
            post_title: None,
            post_date: None,
            media_uuid: Some(media.media_uuid.clone()),
            media_type: media.media_type.clone(),
            media_path: media.media_path.clone(),
            original_filename: media.original_filename.clone(),
            message_date: media.message_date,
            author_uuid: media.author_uuid.clone(),
            chunk_index: i as i64,
            content: content.clone(),
            embedding: embedding.clone(),
            tags: Vec::new(),
            authors: Vec::new(),
            category: None,
        })
        .collect();

    let count = rows.len();
    store.add(RowBatch::from_chunks(&rows)?).await?;
    info!(
        "Indexed {} enrichment chunks for media {}",
        count, media.media_uuid
    );
    Ok(count)
}

fn check_pairing(chunks: &[String], embeddings: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != embeddings.len() {
        return Err(StoreError::Ingest(format!(
            "chunk/embedding count mismatch: {} chunks, {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }
    Ok(())
}
