//! Similarity search with filters, ranking, and dedup-by-rank.
//!
//! [`Retriever`] executes queries against either the ANN index or a
//! brute-force exact scan, applies post-filters in a fixed order, and
//! returns results ranked by similarity descending with `chunk_id`
//! ascending as the deterministic tie-break.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use crate::embedding::{check_dimension, cosine_similarity, Embedder};
use crate::error::{Result, StoreError};
use crate::index::IndexManager;
use crate::models::{Chunk, DateFilter, DocumentType, SearchHit};
use crate::store::ChunkStore;

/// Floor added to the ANN candidate pool so small `top_k` values still
/// survive post-filtering.
const ANN_POOL_FLOOR: usize = 10;
/// Multiplier applied to `top_k` by the deduplicating query helpers, so
/// collapsing to one chunk per document still fills the result set.
const DEDUP_FETCH_FACTOR: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Ann,
    Exact,
}

/// Options for a single [`Retriever::search`] call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Inclusive similarity floor.
    pub min_similarity: f64,
    pub mode: SearchMode,
    /// ANN search-width override (partitions probed).
    pub nprobe: Option<usize>,
    /// ANN candidate multiplier before filtering.
    pub overfetch: Option<usize>,
    pub document_type: Option<DocumentType>,
    /// Membership filter on `media_type`; meaningful with
    /// `document_type = media`.
    pub media_types: Option<Vec<String>>,
    /// Keep rows sharing at least one tag.
    pub tags: Option<Vec<String>>,
    /// Keep rows strictly newer than this bound (post date for posts,
    /// message date for media).
    pub date_after: Option<DateFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.0,
            mode: SearchMode::Ann,
            nprobe: None,
            overfetch: None,
            document_type: None,
            media_types: None,
            tags: None,
            date_after: None,
        }
    }
}

/// Options for the high-level post/media query helpers.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: usize,
    /// Keep only the best-ranked chunk per parent document.
    pub deduplicate: bool,
    pub mode: SearchMode,
    pub nprobe: Option<usize>,
    pub overfetch: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            deduplicate: true,
            mode: SearchMode::Ann,
            nprobe: None,
            overfetch: None,
        }
    }
}

/// Retrieval engine over a [`ChunkStore`] and its [`IndexManager`].
pub struct Retriever {
    store: ChunkStore,
    index: IndexManager,
}

impl Retriever {
    pub fn new(store: ChunkStore) -> Self {
        let index = IndexManager::new(store.config());
        Self { store, index }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Execute a similarity query.
    ///
    /// ANN mode rebuilds the index first when it is stale, and silently
    /// narrows to the exact scan when the corpus is below the build
    /// threshold or no ANN backend is available — exact search is always
    /// correct, only slower. A query matching nothing returns an empty
    /// vec.
    pub async fn search(
        &mut self,
        query_vec: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if opts.top_k == 0 {
            return Err(StoreError::InvalidParameter(
                "top_k must be positive".to_string(),
            ));
        }
        if let Some(nprobe) = opts.nprobe {
            if nprobe == 0 {
                return Err(StoreError::InvalidParameter(
                    "nprobe must be positive".to_string(),
                ));
            }
        }
        check_dimension(query_vec, self.store.embedding_dim())?;

        let mut hits = match opts.mode {
            SearchMode::Ann => self.ann_candidates(query_vec, opts).await?,
            SearchMode::Exact => self.exact_candidates(query_vec).await?,
        };

        hits.retain(|hit| keep_hit(&hit.chunk, opts));
        hits.retain(|hit| hit.similarity >= opts.min_similarity);
        sort_hits(&mut hits);
        hits.truncate(opts.top_k);

        info!(
            "Found {} similar chunks (min_similarity={})",
            hits.len(),
            opts.min_similarity
        );
        Ok(hits)
    }

    async fn ann_candidates(
        &mut self,
        query_vec: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let factor = match opts.overfetch {
            Some(f) if f > 0 => f,
            _ => self.store.config().retrieval.overfetch,
        };
        let pool = std::cmp::max(opts.top_k * factor, opts.top_k + ANN_POOL_FLOOR);

        let candidate_ids = match self.index.ensure_current(&self.store).await? {
            Some(index) => {
                let candidates = index.search(query_vec, pool, opts.nprobe)?;
                Some(candidates.into_iter().map(|(id, _)| id).collect::<Vec<_>>())
            }
            None => None,
        };
        match candidate_ids {
            Some(ids) => {
                let rows = self.store.fetch_by_chunk_ids(&ids).await?;
                Ok(score_rows(rows, query_vec))
            }
            None => {
                debug!("ANN unavailable or corpus below threshold, scanning exactly");
                self.exact_candidates(query_vec).await
            }
        }
    }

    async fn exact_candidates(&self, query_vec: &[f32]) -> Result<Vec<SearchHit>> {
        let rows = self.store.get_all().await?;
        Ok(score_rows(rows, query_vec))
    }

    /// Find prior posts similar to a batch of new source rows.
    ///
    /// Serializes the rows to one text blob, embeds it through the
    /// external embedder, and searches across the whole corpus. With
    /// deduplication on, only the single best-ranked chunk per
    /// `post_slug` survives — a post must not dominate results through
    /// several high-scoring chunks.
    pub async fn query_similar_posts(
        &mut self,
        embedder: &dyn Embedder,
        source_rows: &[Vec<String>],
        opts: &QueryOptions,
    ) -> Result<Vec<SearchHit>> {
        info!(
            "Querying similar posts for a batch of {} source rows",
            source_rows.len()
        );
        let query_text = serialize_rows(source_rows);
        let query_vec = embedder.embed_query(&query_text).await?;

        let fetch_k = if opts.deduplicate {
            opts.top_k * DEDUP_FETCH_FACTOR
        } else {
            opts.top_k
        };
        let results = self
            .search(
                &query_vec,
                &SearchOptions {
                    top_k: fetch_k,
                    min_similarity: self.store.config().retrieval.min_similarity,
                    mode: opts.mode,
                    nprobe: opts.nprobe,
                    overfetch: opts.overfetch,
                    ..SearchOptions::default()
                },
            )
            .await?;
        if results.is_empty() {
            info!("No similar posts found");
            return Ok(results);
        }

        if opts.deduplicate {
            let deduped = dedup_top_ranked(results, opts.top_k, |c| c.post_slug.clone());
            info!("After deduplication: {} unique posts", deduped.len());
            return Ok(deduped);
        }
        Ok(results)
    }

    /// Search media enrichments by natural-language description.
    ///
    /// Same pattern as [`query_similar_posts`](Self::query_similar_posts)
    /// but always filtered to the media partition and deduplicated per
    /// `media_uuid`.
    pub async fn query_media(
        &mut self,
        embedder: &dyn Embedder,
        query: &str,
        media_types: Option<Vec<String>>,
        opts: &QueryOptions,
    ) -> Result<Vec<SearchHit>> {
        info!("Searching media for: {}", query);
        let query_vec = embedder.embed_query(query).await?;

        let fetch_k = if opts.deduplicate {
            opts.top_k * DEDUP_FETCH_FACTOR
        } else {
            opts.top_k
        };
        let results = self
            .search(
                &query_vec,
                &SearchOptions {
                    top_k: fetch_k,
                    min_similarity: self.store.config().retrieval.min_similarity,
                    mode: opts.mode,
                    nprobe: opts.nprobe,
                    overfetch: opts.overfetch,
                    document_type: Some(DocumentType::Media),
                    media_types,
                    ..SearchOptions::default()
                },
            )
            .await?;
        if results.is_empty() {
            info!("No matching media found");
            return Ok(results);
        }

        if opts.deduplicate {
            let deduped = dedup_top_ranked(results, opts.top_k, |c| c.media_uuid.clone());
            info!("After deduplication: {} unique media files", deduped.len());
            return Ok(deduped);
        }
        Ok(results)
    }
}

/// The comparable instant of a chunk for temporal filtering: post date
/// (midnight UTC) for posts, message date for media.
fn chunk_instant(chunk: &Chunk) -> Option<DateTime<Utc>> {
    chunk
        .post_date
        .map(|d| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)))
        .or(chunk.message_date)
}

fn keep_hit(chunk: &Chunk, opts: &SearchOptions) -> bool {
    if let Some(doc_type) = opts.document_type {
        if chunk.document_type != doc_type {
            return false;
        }
    }
    if let Some(ref media_types) = opts.media_types {
        match chunk.media_type {
            Some(ref mt) if media_types.contains(mt) => {}
            _ => return false,
        }
    }
    if let Some(ref tags) = opts.tags {
        if !chunk.tags.iter().any(|t| tags.contains(t)) {
            return false;
        }
    }
    if let Some(ref bound) = opts.date_after {
        // Undated rows never pass a temporal filter.
        match chunk_instant(chunk) {
            Some(instant) if instant > bound.as_utc() => {}
            _ => return false,
        }
    }
    true
}

fn score_rows(rows: Vec<Chunk>, query_vec: &[f32]) -> Vec<SearchHit> {
    rows.into_iter()
        .map(|chunk| {
            let similarity = cosine_similarity(query_vec, &chunk.embedding) as f64;
            SearchHit { chunk, similarity }
        })
        .collect()
}

/// Similarity descending, `chunk_id` ascending on ties.
fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

/// Keep the single best-ranked hit per grouping key, re-sort, truncate.
///
/// Hits without a key (e.g. media rows grouped by `post_slug`) collapse
/// into one shared group rather than each surviving individually.
fn dedup_top_ranked<F>(mut hits: Vec<SearchHit>, top_k: usize, key: F) -> Vec<SearchHit>
where
    F: Fn(&Chunk) -> Option<String>,
{
    sort_hits(&mut hits);
    let mut seen: HashMap<Option<String>, ()> = HashMap::new();
    let mut kept = Vec::new();
    for hit in hits {
        let group = key(&hit.chunk);
        if seen.insert(group, ()).is_none() {
            kept.push(hit);
        }
    }
    sort_hits(&mut kept);
    kept.truncate(top_k);
    kept
}

/// Serialize source rows to a single embeddable text blob: fields
/// joined by `|`, rows by newlines.
fn serialize_rows(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|fields| fields.join("|"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, slug: Option<&str>, similarity: f64) -> SearchHit {
        SearchHit {
            chunk: Chunk {
                chunk_id: chunk_id.to_string(),
                document_type: DocumentType::Post,
                document_id: slug.unwrap_or("doc").to_string(),
                post_slug: slug.map(String::from),
                post_title: None,
                post_date: None,
                media_uuid: None,
                media_type: None,
                media_path: None,
                original_filename: None,
                message_date: None,
                author_uuid: None,
                chunk_index: 0,
                content: String::new(),
                embedding: Vec::new(),
                tags: Vec::new(),
                authors: Vec::new(),
                category: None,
            },
            similarity,
        }
    }

    #[test]
    fn test_dedup_keeps_single_best_per_document() {
        // Two chunks of post A (0.9, 0.8) and one of post B (0.85):
        // the 0.8 chunk is dropped even though it would rank second.
        let hits = vec![
            hit("a_0", Some("post-a"), 0.9),
            hit("a_1", Some("post-a"), 0.8),
            hit("b_0", Some("post-b"), 0.85),
        ];
        let deduped = dedup_top_ranked(hits, 2, |c| c.post_slug.clone());
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].chunk.chunk_id, "a_0");
        assert_eq!(deduped[1].chunk.chunk_id, "b_0");
    }

    #[test]
    fn test_dedup_groups_missing_keys_together() {
        let hits = vec![
            hit("x_0", None, 0.9),
            hit("y_0", None, 0.8),
            hit("a_0", Some("post-a"), 0.7),
        ];
        let deduped = dedup_top_ranked(hits, 5, |c| c.post_slug.clone());
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].chunk.chunk_id, "x_0");
        assert_eq!(deduped[1].chunk.chunk_id, "a_0");
    }

    #[test]
    fn test_sort_ties_broken_by_chunk_id() {
        let mut hits = vec![
            hit("zeta_0", Some("z"), 0.5),
            hit("alpha_0", Some("a"), 0.5),
            hit("mid_0", Some("m"), 0.7),
        ];
        sort_hits(&mut hits);
        let order: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(order, ["mid_0", "alpha_0", "zeta_0"]);
    }

    #[test]
    fn test_serialize_rows_pipe_and_newline() {
        let rows = vec![
            vec!["2024-01-01".to_string(), "alice".to_string(), "hi".to_string()],
            vec!["2024-01-02".to_string(), "bob".to_string(), "yo".to_string()],
        ];
        assert_eq!(
            serialize_rows(&rows),
            "2024-01-01|alice|hi\n2024-01-02|bob|yo"
        );
    }

    #[test]
    fn test_keep_hit_media_type_membership() {
        let mut media = hit("m_0", None, 0.9);
        media.chunk.document_type = DocumentType::Media;
        media.chunk.media_type = Some("image".to_string());

        let opts = SearchOptions {
            document_type: Some(DocumentType::Media),
            media_types: Some(vec!["image".to_string(), "video".to_string()]),
            ..SearchOptions::default()
        };
        assert!(keep_hit(&media.chunk, &opts));

        media.chunk.media_type = Some("audio".to_string());
        assert!(!keep_hit(&media.chunk, &opts));
    }

    #[test]
    fn test_keep_hit_undated_rows_fail_temporal_filter() {
        let undated = hit("u_0", Some("post-u"), 0.9);
        let opts = SearchOptions {
            date_after: Some(DateFilter::parse("2024-01-01").unwrap()),
            ..SearchOptions::default()
        };
        assert!(!keep_hit(&undated.chunk, &opts));
    }
}
