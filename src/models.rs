//! Core data models for the retrieval engine.
//!
//! These types represent the chunks, search results, and store metadata
//! that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Partition of the corpus a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Post,
    Media,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Post => "post",
            DocumentType::Media => "media",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of retrieval: one embedded slice of a parent document.
///
/// Every row carries the full column set of the store schema. Post
/// fields are populated only for `document_type = post`, media fields
/// only for `document_type = media`; the rest stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-addressed identity: `{document_id}_{chunk_index}`.
    pub chunk_id: String,
    pub document_type: DocumentType,
    /// Stable identifier of the parent document (post slug or media UUID).
    pub document_id: String,
    pub post_slug: Option<String>,
    pub post_title: Option<String>,
    pub post_date: Option<NaiveDate>,
    pub media_uuid: Option<String>,
    pub media_type: Option<String>,
    pub media_path: Option<String>,
    pub original_filename: Option<String>,
    pub message_date: Option<DateTime<Utc>>,
    pub author_uuid: Option<String>,
    /// 0-based position of this chunk within its parent document.
    pub chunk_index: i64,
    pub content: String,
    /// Fixed-length embedding vector; dimensionality is a store-wide invariant.
    pub embedding: Vec<f32>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub category: Option<String>,
}

/// A chunk row paired with its query similarity, as returned by search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity to the query vector.
    pub similarity: f64,
}

/// Fingerprint of the backing database file as of the last write.
///
/// Detects out-of-band changes to the persisted file; it is not a
/// correctness oracle for the chunk table contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub mtime_ns: i64,
    pub size: i64,
    pub row_count: i64,
    pub checksum: Option<String>,
}

/// Persisted configuration of the currently-built ANN index.
///
/// Drives staleness detection: an index is trusted only while the live
/// row count and embedding dimensionality match what is recorded here.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub index_name: String,
    pub mode: String,
    pub row_count: i64,
    pub threshold: i64,
    pub nlist: i64,
    pub embedding_dim: i64,
    pub updated_at: DateTime<Utc>,
}

/// A `date_after` filter bound, accepted in any of the shapes callers
/// produce: a plain date, a naive datetime, a timezone-aware instant,
/// or the ISO-8601 string form of any of those.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateFilter {
    Date(NaiveDate),
    Naive(NaiveDateTime),
    Instant(DateTime<Utc>),
}

impl DateFilter {
    /// Parse an ISO-8601 string into a filter bound.
    ///
    /// Tries offset/`Z` datetimes first, then naive datetimes, then
    /// plain dates.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        let cleaned = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
            return Ok(DateFilter::Instant(dt.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S") {
            return Ok(DateFilter::Naive(naive));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%d %H:%M:%S") {
            return Ok(DateFilter::Naive(naive));
        }
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
            return Ok(DateFilter::Date(date));
        }
        Err(StoreError::InvalidParameter(format!(
            "invalid date_after value: {value:?}"
        )))
    }

    /// Normalize the bound to a single comparable UTC instant.
    ///
    /// Dates map to midnight UTC; naive datetimes are taken as UTC.
    pub fn as_utc(&self) -> DateTime<Utc> {
        match self {
            DateFilter::Date(d) => Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)),
            DateFilter::Naive(dt) => Utc.from_utc_datetime(dt),
            DateFilter::Instant(dt) => *dt,
        }
    }
}

impl From<NaiveDate> for DateFilter {
    fn from(d: NaiveDate) -> Self {
        DateFilter::Date(d)
    }
}

impl From<NaiveDateTime> for DateFilter {
    fn from(dt: NaiveDateTime) -> Self {
        DateFilter::Naive(dt)
    }
}

impl From<DateTime<Utc>> for DateFilter {
    fn from(dt: DateTime<Utc>) -> Self {
        DateFilter::Instant(dt)
    }
}

impl std::str::FromStr for DateFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateFilter::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_date_filter_plain_date() {
        let f = DateFilter::parse("2024-01-01").unwrap();
        assert_eq!(
            f.as_utc(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_date_filter_naive_datetime() {
        let f = DateFilter::parse("2024-01-01T12:30:00").unwrap();
        assert_eq!(
            f.as_utc(),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_date_filter_aware_instant() {
        let f = DateFilter::parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(
            f.as_utc(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_date_filter_offset_normalizes_to_utc() {
        // Midnight in UTC-5 is 05:00 UTC the same day.
        let f = DateFilter::parse("2024-01-01T00:00:00-05:00").unwrap();
        assert_eq!(
            f.as_utc(),
            Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_date_filter_equivalent_instants_agree() {
        let via_date = DateFilter::from(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let via_string = DateFilter::parse("2024-01-01T00:00:00Z").unwrap();
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let aware = offset.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let via_instant = DateFilter::from(aware.with_timezone(&Utc));
        assert_eq!(via_date.as_utc(), via_string.as_utc());
        // 02:00 at +02:00 is the same instant as midnight UTC.
        assert_eq!(via_date.as_utc(), via_instant.as_utc());
    }

    #[test]
    fn test_date_filter_year_boundary() {
        let before = DateFilter::parse("2023-12-31").unwrap();
        let bound = DateFilter::parse("2024-01-01").unwrap();
        assert!(before.as_utc() < bound.as_utc());
    }

    #[test]
    fn test_date_filter_rejects_garbage() {
        assert!(DateFilter::parse("not-a-date").is_err());
    }
}
