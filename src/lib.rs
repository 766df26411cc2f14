//! # Recall Store
//!
//! An embedded semantic retrieval engine over SQLite.
//!
//! Recall Store persists pre-embedded text chunks in a schema-enforced
//! SQLite table and answers similarity queries over them, either through
//! an in-process ANN index or an exact cosine scan. It is the retrieval
//! substrate for pipelines that chunk and embed documents upstream:
//! posts and media enrichments go in as parallel chunk/embedding lists,
//! ranked and deduplicated hits come back out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐
//! │ Ingestion    │──▶│ ChunkStore  │──▶│  SQLite    │
//! │ post / media │   │ schema gate │   │ chunks     │
//! └──────────────┘   └──────┬──────┘   └─────┬─────┘
//!                           │                │
//!                           ▼                ▼
//!                    ┌─────────────┐   ┌───────────┐
//!                    │ IndexManager│◀──│ Retriever  │
//!                    │ IVF / exact │   │ rank+dedup │
//!                    └─────────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`schema`] | Column contract and row batches |
//! | [`embedding`] | Embedder abstraction and vector math |
//! | [`store`] | Chunk persistence and dataset metadata |
//! | [`index`] | IVF index build and lifecycle |
//! | [`search`] | Similarity search, filters, dedup |
//! | [`ingest`] | Post and media ingestion helpers |
//! | [`db`] | Database connection |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod schema;
pub mod search;
pub mod store;

pub use config::Config;
pub use embedding::Embedder;
pub use error::{Result, StoreError};
pub use ingest::{index_media_enrichment, index_post, MediaDocument, PostDocument};
pub use models::{Chunk, DateFilter, DocumentType, SearchHit};
pub use schema::RowBatch;
pub use search::{QueryOptions, Retriever, SearchMode, SearchOptions};
pub use store::ChunkStore;
