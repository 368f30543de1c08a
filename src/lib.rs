//! Logical page reconciliation for paginated documents.
//!
//! Extracted page text carries printed page numbers that rarely match the
//! physical page order: front matter, merged scans, and per-section numbering
//! all shift them. This crate recovers the printed ("logical") number of each
//! physical page from footer patterns, repairs gaps from neighboring pages,
//! maps retrieval chunks and their sentences onto pages, and answers runtime
//! "which page is this sentence on" queries with a bounded cache.
//!
//! The main entry points are [`ingest::ingest_document`] for the offline
//! pipeline and [`locate::PageLocator`] for runtime citation lookup.

pub mod cache;
pub mod ingest;
pub mod locate;
pub mod mapping;
pub mod model;
pub mod reconcile;
pub mod resolver;
pub mod source;
pub mod store;
pub mod text;
pub mod util;

pub use ingest::{IngestConfig, backfill_document, fixed_window_chunks, ingest_all, ingest_document};
pub use locate::{LocatorConfig, PageLocator};
pub use mapping::{MapperConfig, locate_in_chunk, map_chunk, map_sentences};
pub use model::{
    Chunk, ChunkPlacement, ChunkRecord, Document, IngestReport, IngestSummary, Page,
    PageAssignment, PageRecord, PatternKind, PlacementMethod, SentenceAssignment, SentenceMethod,
};
pub use reconcile::Reconciler;
pub use resolver::{ResolveContext, Resolver, ResolverConfig};
pub use source::{DocumentPages, MemorySource, PageTextSource, PdftotextSource};
pub use store::{ChunkStore, SqliteChunkStore, StoreConfig};
