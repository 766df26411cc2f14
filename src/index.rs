//! ANN index build, rebuild, and staleness tracking.
//!
//! The index is an in-process IVF-flat structure: embeddings are
//! partitioned into `nlist` centroid lists, and a query probes the
//! `nprobe` nearest lists before exact-scoring the candidates it finds.
//! `nlist` grows as `max(1, floor(sqrt(row_count)))` and is recorded in
//! `index_meta` alongside the row count and dimensionality that the
//! staleness check compares against.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::cosine_similarity;
use crate::error::{Result, StoreError};
use crate::models::IndexMeta;
use crate::store::ChunkStore;

/// IVF-flat index over the embedding column.
///
/// Construction is deterministic for a given entry order: centroid
/// seeds are sampled at even strides over the `chunk_id`-ordered input,
/// then refined with a fixed number of Lloyd iterations.
#[derive(Debug)]
pub struct IvfIndex {
    dim: usize,
    nlist: usize,
    centroids: Vec<Vec<f32>>,
    /// Entry indices assigned to each centroid.
    lists: Vec<Vec<usize>>,
    entries: Vec<(String, Vec<f32>)>,
}

const LLOYD_ITERATIONS: usize = 2;

impl IvfIndex {
    /// Partition count heuristic, recorded in `index_meta`.
    pub fn nlist_for(row_count: usize) -> usize {
        std::cmp::max(1, (row_count as f64).sqrt().floor() as usize)
    }

    /// Build the index over `chunk_id`-ordered `(id, embedding)` pairs.
    pub fn build(entries: Vec<(String, Vec<f32>)>, dim: usize) -> Result<Self> {
        if entries.is_empty() {
            return Err(StoreError::Ingest(
                "cannot build an index over zero rows".to_string(),
            ));
        }
        for (id, vec) in &entries {
            if vec.len() != dim {
                debug!("stored embedding for {} has wrong width", id);
                return Err(StoreError::Dimension {
                    expected: dim,
                    got: vec.len(),
                });
            }
        }

        let nlist = Self::nlist_for(entries.len());
        let mut centroids: Vec<Vec<f32>> = (0..nlist)
            .map(|i| entries[i * entries.len() / nlist].1.clone())
            .collect();
        let mut lists = assign(&entries, &centroids);

        for _ in 0..LLOYD_ITERATIONS {
            for (centroid, members) in centroids.iter_mut().zip(lists.iter()) {
                if members.is_empty() {
                    continue;
                }
                let mut mean = vec![0.0f32; dim];
                for &idx in members {
                    for (m, v) in mean.iter_mut().zip(entries[idx].1.iter()) {
                        *m += v;
                    }
                }
                let scale = 1.0 / members.len() as f32;
                for m in mean.iter_mut() {
                    *m *= scale;
                }
                *centroid = mean;
            }
            lists = assign(&entries, &centroids);
        }

        Ok(Self {
            dim,
            nlist,
            centroids,
            lists,
            entries,
        })
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default probe width when the caller passes no `nprobe`.
    pub fn default_nprobe(&self) -> usize {
        std::cmp::max(1, (self.nlist as f64).sqrt().ceil() as usize)
    }

    /// Return up to `limit` candidates from the `nprobe` nearest
    /// partitions, as `(chunk_id, cosine similarity)` ranked by
    /// similarity descending with `chunk_id` ascending tie-break.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        nprobe: Option<usize>,
    ) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dim {
            return Err(StoreError::Dimension {
                expected: self.dim,
                got: query.len(),
            });
        }
        let nprobe = nprobe.unwrap_or_else(|| self.default_nprobe()).min(self.nlist);

        let mut ranked_lists: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, c)))
            .collect();
        ranked_lists.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let mut candidates: Vec<(String, f32)> = ranked_lists
            .iter()
            .take(nprobe)
            .flat_map(|(list_idx, _)| self.lists[*list_idx].iter())
            .map(|&entry_idx| {
                let (id, vec) = &self.entries[entry_idx];
                (id.clone(), cosine_similarity(query, vec))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn assign(entries: &[(String, Vec<f32>)], centroids: &[Vec<f32>]) -> Vec<Vec<usize>> {
    let mut lists = vec![Vec::new(); centroids.len()];
    for (idx, (_, vec)) in entries.iter().enumerate() {
        let mut best = 0usize;
        let mut best_sim = f32::NEG_INFINITY;
        for (c_idx, centroid) in centroids.iter().enumerate() {
            let sim = cosine_similarity(vec, centroid);
            if sim > best_sim {
                best_sim = sim;
                best = c_idx;
            }
        }
        lists[best].push(idx);
    }
    lists
}

/// Tracks whether the live ANN index can be trusted, rebuilding it when
/// the chunk table diverges from the recorded index configuration.
pub struct IndexManager {
    index: Option<IvfIndex>,
    ann_capable: bool,
    warned_unavailable: bool,
    index_name: String,
    threshold: i64,
}

impl IndexManager {
    pub fn new(config: &Config) -> Self {
        let ann_capable = match detect_ann_backend(config) {
            Ok(()) => true,
            Err(StoreError::BackendUnavailable) => false,
            Err(_) => false,
        };
        Self {
            index: None,
            ann_capable,
            warned_unavailable: false,
            index_name: config.index.index_name.clone(),
            threshold: config.index.threshold,
        }
    }

    /// Whether ANN queries can be served at all this session.
    pub fn ann_available(&self) -> bool {
        self.ann_capable
    }

    /// Make sure the index reflects the live chunk table, rebuilding if
    /// stale. Returns `None` when the engine should fall back to exact
    /// search: ANN capability missing (logged once, never fatal) or the
    /// corpus is still below the build threshold.
    pub async fn ensure_current(&mut self, store: &ChunkStore) -> Result<Option<&IvfIndex>> {
        if !self.ann_capable {
            if !self.warned_unavailable {
                warn!("ANN backend unavailable; serving exact search for this session");
                self.warned_unavailable = true;
            }
            return Ok(None);
        }

        let live_count = store.row_count().await?;
        if live_count < self.threshold.max(1) {
            debug!(
                "corpus below ANN threshold ({} < {}), using exact scan",
                live_count, self.threshold
            );
            return Ok(None);
        }

        let dim = store.embedding_dim();
        let meta = store.index_meta(&self.index_name).await?;
        let current = match (&self.index, &meta) {
            (Some(index), Some(meta)) => {
                meta.row_count == live_count
                    && meta.embedding_dim == dim as i64
                    && index.len() as i64 == live_count
            }
            _ => false,
        };
        if current {
            return Ok(self.index.as_ref());
        }

        let entries = store.scan_embeddings().await?;
        let index = IvfIndex::build(entries, dim)?;
        let nlist = index.nlist() as i64;
        // The meta row is written only after the new structure is built,
        // so a failed rebuild leaves the previous row intact.
        store
            .upsert_index_meta(&IndexMeta {
                index_name: self.index_name.clone(),
                mode: "ann".to_string(),
                row_count: live_count,
                threshold: self.threshold,
                nlist,
                embedding_dim: dim as i64,
                updated_at: Utc::now(),
            })
            .await?;
        info!(
            "Rebuilt ANN index over {} rows ({} partitions)",
            live_count, nlist
        );
        self.index = Some(index);
        Ok(self.index.as_ref())
    }
}

/// Probe for an ANN capability. The in-process IVF backend is always
/// compiled in, so the only unavailability condition is the
/// configuration switch; the error shape stays so callers treat a
/// future pluggable backend the same way.
fn detect_ann_backend(config: &Config) -> Result<()> {
    if !config.index.enabled {
        return Err(StoreError::BackendUnavailable);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vec: Vec<f32>) -> (String, Vec<f32>) {
        (id.to_string(), vec)
    }

    fn axis_corpus() -> Vec<(String, Vec<f32>)> {
        vec![
            entry("a0", vec![1.0, 0.0, 0.0, 0.0]),
            entry("a1", vec![0.9, 0.1, 0.0, 0.0]),
            entry("b0", vec![0.0, 1.0, 0.0, 0.0]),
            entry("b1", vec![0.1, 0.9, 0.0, 0.0]),
            entry("c0", vec![0.0, 0.0, 1.0, 0.0]),
            entry("c1", vec![0.0, 0.0, 0.9, 0.1]),
            entry("d0", vec![0.0, 0.0, 0.0, 1.0]),
            entry("d1", vec![0.0, 0.1, 0.0, 0.9]),
            entry("e0", vec![0.5, 0.5, 0.0, 0.0]),
        ]
    }

    #[test]
    fn test_nlist_heuristic_monotonic() {
        assert_eq!(IvfIndex::nlist_for(1), 1);
        assert_eq!(IvfIndex::nlist_for(4), 2);
        assert_eq!(IvfIndex::nlist_for(100), 10);
        let mut prev = 0;
        for n in [1usize, 10, 50, 100, 1000, 10_000] {
            let nlist = IvfIndex::nlist_for(n);
            assert!(nlist >= prev);
            prev = nlist;
        }
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(IvfIndex::build(Vec::new(), 4).is_err());
    }

    #[test]
    fn test_build_rejects_ragged_width() {
        let entries = vec![
            entry("a", vec![1.0, 0.0]),
            entry("b", vec![1.0, 0.0, 0.0]),
        ];
        let err = IvfIndex::build(entries, 2).unwrap_err();
        assert!(matches!(err, StoreError::Dimension { .. }));
    }

    #[test]
    fn test_search_finds_nearest_neighbor() {
        let index = IvfIndex::build(axis_corpus(), 4).unwrap();
        let hits = index
            .search(&[1.0, 0.0, 0.0, 0.0], 2, Some(index.nlist()))
            .unwrap();
        assert_eq!(hits[0].0, "a0");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_search_rejects_bad_width() {
        let index = IvfIndex::build(axis_corpus(), 4).unwrap();
        assert!(index.search(&[1.0, 0.0], 2, None).is_err());
    }

    #[test]
    fn test_search_tie_break_on_chunk_id() {
        let entries = vec![
            entry("zebra", vec![1.0, 0.0]),
            entry("apple", vec![1.0, 0.0]),
        ];
        let index = IvfIndex::build(entries, 2).unwrap();
        let hits = index.search(&[1.0, 0.0], 2, Some(index.nlist())).unwrap();
        assert_eq!(hits[0].0, "apple");
        assert_eq!(hits[1].0, "zebra");
    }

    #[test]
    fn test_full_probe_matches_exhaustive_ranking() {
        let corpus = axis_corpus();
        let index = IvfIndex::build(corpus.clone(), 4).unwrap();
        let query = [0.3, 0.7, 0.0, 0.0];

        let mut exhaustive: Vec<(String, f32)> = corpus
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(&query, v)))
            .collect();
        exhaustive.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let hits = index.search(&query, 3, Some(index.nlist())).unwrap();
        let expected: Vec<&str> = exhaustive.iter().take(3).map(|(id, _)| id.as_str()).collect();
        let got: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_build_deterministic() {
        let a = IvfIndex::build(axis_corpus(), 4).unwrap();
        let b = IvfIndex::build(axis_corpus(), 4).unwrap();
        let query = [0.2, 0.1, 0.6, 0.1];
        let hits_a = a.search(&query, 5, None).unwrap();
        let hits_b = b.search(&query, 5, None).unwrap();
        assert_eq!(hits_a, hits_b);
    }
}
