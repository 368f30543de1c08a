//! Document ingestion pipeline.
//!
//! Pulls page text out of a source, reconciles printed page numbers, cuts
//! the concatenated text into fixed windows, maps every chunk and sentence
//! onto a page, and writes the result through the chunk store. A failed page
//! extraction degrades to an empty page and a warning; a failed document
//! open aborts that document only.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::mapping::{MapperConfig, map_chunk, map_sentences};
use crate::model::{
    Chunk, ChunkRecord, Document, FailedDocument, IngestReport, IngestSummary, Page,
    PatternKind, PlacementMethod, SentenceMethod,
};
use crate::reconcile::Reconciler;
use crate::resolver::ResolverConfig;
use crate::source::{DocumentPages, PageTextSource};
use crate::store::ChunkStore;
use crate::util::{now_utc_string, stable_doc_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Worker threads for page text extraction.
    pub extract_parallelism: usize,
    /// Window length of a retrieval chunk, in characters.
    pub chunk_chars: usize,
    /// Overlap between consecutive chunk windows, in characters.
    pub overlap_chars: usize,
    pub resolver: ResolverConfig,
    pub mapper: MapperConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            extract_parallelism: 4,
            chunk_chars: 1000,
            overlap_chars: 200,
            resolver: ResolverConfig::default(),
            mapper: MapperConfig::default(),
        }
    }
}

/// `[start, end)` byte windows of `chunk_chars` characters stepped by
/// `chunk_chars - overlap_chars`, always cut on character boundaries.
pub fn fixed_window_chunks(
    content: &str,
    chunk_chars: usize,
    overlap_chars: usize,
) -> Vec<(usize, usize)> {
    let chunk_chars = chunk_chars.max(1);
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);

    let mut boundaries = content
        .char_indices()
        .map(|(offset, _)| offset)
        .collect::<Vec<usize>>();
    boundaries.push(content.len());
    let total_chars = boundaries.len() - 1;

    let mut windows = Vec::<(usize, usize)>::new();
    let mut start_char = 0usize;
    while start_char < total_chars {
        let end_char = (start_char + chunk_chars).min(total_chars);
        windows.push((boundaries[start_char], boundaries[end_char]));
        if end_char == total_chars {
            break;
        }
        start_char += step;
    }
    windows
}

/// Extract every page of an opened document, in parallel. Extraction
/// failures become empty pages so one bad page never sinks the document.
fn extract_pages(
    document: &dyn DocumentPages,
    parallelism: usize,
    warnings: &mut Vec<String>,
) -> Result<Vec<String>> {
    let page_count = document.page_count();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()
        .context("failed to build extraction thread pool")?;

    let mut results = pool.install(|| {
        (1..=page_count)
            .into_par_iter()
            .map(|physical_index| (physical_index, document.page_text(physical_index)))
            .collect::<Vec<(u32, Result<String>)>>()
    });
    results.sort_by_key(|(physical_index, _)| *physical_index);

    let mut texts = Vec::<String>::with_capacity(page_count as usize);
    for (physical_index, result) in results {
        match result {
            Ok(text) => texts.push(text),
            Err(error) => {
                warn!(physical_index, error = %error, "page extraction failed");
                warnings.push(format!("page {physical_index} extraction failed: {error:#}"));
                texts.push(String::new());
            }
        }
    }
    Ok(texts)
}

/// Build the page table for a document: running byte offsets into the
/// concatenated text stream. Pages are joined by a single newline owned by
/// the page it follows, so page ranges tile the stream with no gaps.
fn build_pages(page_texts: Vec<String>) -> (Vec<Page>, String) {
    let page_count = page_texts.len();
    let mut pages = Vec::<Page>::with_capacity(page_count);
    let mut full_text = String::new();
    let mut cursor = 0usize;

    for (index, text) in page_texts.into_iter().enumerate() {
        full_text.push_str(&text);
        let mut page = Page::new(index as u32 + 1, text, cursor);
        if index + 1 < page_count {
            full_text.push('\n');
            page.end_offset += 1;
        }
        cursor = page.end_offset;
        pages.push(page);
    }

    (pages, full_text)
}

fn count_resolution_kinds(pages: &[Page], report: &mut IngestReport) {
    for page in pages {
        match page.pattern_kind {
            PatternKind::Fraction
            | PatternKind::Of
            | PatternKind::Labelled
            | PatternKind::BareDigit => report.pages_resolved_by_pattern += 1,
            PatternKind::ContextEstimate => report.pages_resolved_by_context += 1,
            PatternKind::PhysicalFallback => report.pages_unresolved += 1,
        }
    }
}

/// Ingest one document end to end and persist the result. Replaces any
/// previous rows for the same document.
pub fn ingest_document<S: ChunkStore>(
    source: &dyn PageTextSource,
    store: &mut S,
    document_ref: &str,
    config: &IngestConfig,
) -> Result<IngestReport> {
    let doc_id = stable_doc_id(document_ref);
    let mut report = IngestReport {
        doc_id: doc_id.clone(),
        source_ref: document_ref.to_string(),
        started_at: now_utc_string(),
        ..IngestReport::default()
    };

    let document = source
        .open(document_ref)
        .with_context(|| format!("failed to open document {document_ref}"))?;
    report.page_count = document.page_count();

    let mut warnings = Vec::<String>::new();
    let page_texts = extract_pages(document.as_ref(), config.extract_parallelism, &mut warnings)?;
    report.extraction_failures = warnings.len();
    report.warnings = warnings;

    let (mut pages, full_text) = build_pages(page_texts);

    let reconciler = Reconciler::new(config.resolver.clone())?;
    reconciler.resolve_document(&mut pages);
    count_resolution_kinds(&pages, &mut report);

    let mut records = Vec::<ChunkRecord>::new();
    for (index, (start, end)) in
        fixed_window_chunks(&full_text, config.chunk_chars, config.overlap_chars)
            .into_iter()
            .enumerate()
    {
        let chunk = Chunk {
            chunk_id: format!("{doc_id}:chunk:{index:04}"),
            doc_id: doc_id.clone(),
            content: full_text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
        };
        records.push(map_chunk_to_record(&chunk, &pages, &config.mapper, &mut report));
    }

    store.delete_document(&doc_id)?;
    store.upsert_document(&Document {
        doc_id: doc_id.clone(),
        source_ref: document_ref.to_string(),
        page_count: report.page_count,
    })?;
    store.upsert_pages(&doc_id, &pages)?;
    report.batches_written = store.upsert_chunks(&records)?;

    report.completed_at = now_utc_string();
    info!(
        doc_id,
        pages = report.page_count,
        chunks = report.chunks_total,
        resolved_by_pattern = report.pages_resolved_by_pattern,
        resolved_by_context = report.pages_resolved_by_context,
        "document ingested"
    );
    Ok(report)
}

/// Map one chunk and its sentences onto pages and fold the outcome into the
/// running report.
fn map_chunk_to_record(
    chunk: &Chunk,
    pages: &[Page],
    mapper: &MapperConfig,
    report: &mut IngestReport,
) -> ChunkRecord {
    report.chunks_total += 1;

    let placement = map_chunk(
        chunk.start_offset,
        chunk.end_offset,
        pages,
        &chunk.content,
        mapper,
    );
    let (page, method) = match placement {
        Some(placement) => (placement.page, placement.method),
        // Only an empty page table produces no placement at all.
        None => (
            crate::model::PageAssignment {
                physical_page: 1,
                logical_number: 1,
            },
            PlacementMethod::LastPageFallback,
        ),
    };
    match method {
        PlacementMethod::SoleCandidate | PlacementMethod::ContentScore => {
            report.chunks_mapped_by_content += 1
        }
        _ => report.chunks_mapped_by_offset += 1,
    }

    let assignments = map_sentences(chunk, page, pages, mapper);
    let mut sentences = Vec::<String>::with_capacity(assignments.len());
    let mut sentence_page_map = std::collections::BTreeMap::<u32, u32>::new();
    for assignment in &assignments {
        report.sentences_total += 1;
        match assignment.method {
            SentenceMethod::Offset => report.sentences_mapped_by_offset += 1,
            SentenceMethod::PageScan => report.sentences_mapped_by_scan += 1,
            SentenceMethod::Inherited => report.sentences_inherited += 1,
        }
        sentences.push(assignment.text.clone());
        sentence_page_map.insert(assignment.sentence_index as u32, assignment.physical_page);
    }

    ChunkRecord {
        chunk_id: chunk.chunk_id.clone(),
        doc_id: chunk.doc_id.clone(),
        content: chunk.content.clone(),
        start_offset: chunk.start_offset,
        end_offset: chunk.end_offset,
        physical_page: page.physical_page,
        logical_number: page.logical_number,
        sentences,
        sentence_page_map,
        updated_at: now_utc_string(),
    }
}

/// Re-run page reconciliation and chunk/sentence mapping for a document that
/// is already in the store, without re-chunking. Chunk contents and offsets
/// are kept; only page assignments move. Running this over an already
/// consistent document changes nothing.
pub fn backfill_document<S: ChunkStore>(
    source: &dyn PageTextSource,
    store: &mut S,
    document_ref: &str,
    config: &IngestConfig,
) -> Result<IngestReport> {
    let doc_id = stable_doc_id(document_ref);
    let mut report = IngestReport {
        doc_id: doc_id.clone(),
        source_ref: document_ref.to_string(),
        started_at: now_utc_string(),
        ..IngestReport::default()
    };

    let stored_pages = store.pages_for_document(&doc_id)?;
    if stored_pages.is_empty() {
        anyhow::bail!("document {document_ref} has not been ingested");
    }

    let document = source
        .open(document_ref)
        .with_context(|| format!("failed to open document {document_ref}"))?;
    report.page_count = document.page_count();

    // Raw page text is not persisted, so backfill re-reads it to give the
    // resolver something to repair from.
    let mut warnings = Vec::<String>::new();
    let page_texts = extract_pages(document.as_ref(), config.extract_parallelism, &mut warnings)?;
    report.extraction_failures = warnings.len();
    report.warnings = warnings;

    let mut pages = Vec::<Page>::with_capacity(stored_pages.len());
    for record in &stored_pages {
        let text_index = record.physical_index as usize - 1;
        let raw_text = page_texts.get(text_index).cloned().unwrap_or_default();
        pages.push(Page {
            physical_index: record.physical_index,
            logical_number: record.logical_number,
            raw_text,
            start_offset: record.start_offset,
            end_offset: record.end_offset,
            pattern_kind: record.pattern_kind,
            confidence: record.confidence,
        });
    }

    let reconciler = Reconciler::new(config.resolver.clone())?;
    reconciler.backfill(&mut pages);
    count_resolution_kinds(&pages, &mut report);
    store.upsert_pages(&doc_id, &pages)?;

    let mut records = Vec::<ChunkRecord>::new();
    for stored in store.chunks_for_document(&doc_id)? {
        let chunk = Chunk {
            chunk_id: stored.chunk_id,
            doc_id: stored.doc_id,
            content: stored.content,
            start_offset: stored.start_offset,
            end_offset: stored.end_offset,
        };
        records.push(map_chunk_to_record(&chunk, &pages, &config.mapper, &mut report));
    }
    report.batches_written = store.upsert_chunks(&records)?;

    report.completed_at = now_utc_string();
    info!(doc_id, chunks = report.chunks_total, "document backfilled");
    Ok(report)
}

/// Ingest several documents, one at a time. A document that fails is
/// recorded and skipped; committed documents are never affected.
pub fn ingest_all<S: ChunkStore>(
    source: &dyn PageTextSource,
    store: &mut S,
    document_refs: &[String],
    config: &IngestConfig,
) -> IngestSummary {
    let mut summary = IngestSummary::default();

    for document_ref in document_refs {
        match ingest_document(source, store, document_ref, config) {
            Ok(report) => summary.completed.push(report),
            Err(ingest_error) => {
                error!(document_ref, error = %ingest_error, "document ingestion failed");
                summary.failed.push(FailedDocument {
                    source_ref: document_ref.clone(),
                    error: format!("{ingest_error:#}"),
                });
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::sync::Once;

    use super::*;
    use crate::source::MemorySource;
    use crate::store::{SqliteChunkStore, StoreConfig};

    static TRACING: Once = Once::new();

    fn init_tracing() {
        TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }

    fn test_store() -> SqliteChunkStore {
        init_tracing();
        SqliteChunkStore::open_in_memory(StoreConfig::default()).expect("store opens")
    }

    fn manual_source() -> MemorySource {
        let mut source = MemorySource::default();
        source.add_document(
            "manual.pdf",
            vec![
                "Safety Manual. Cover page without any printed number.".to_string(),
                "Revision history table lives here, also unnumbered.".to_string(),
                "Introduction to the safety manual. Everything begins here.\n1/3"
                    .to_string(),
                "Second body page talks about hazard analysis in detail.\n2/3"
                    .to_string(),
                "Final body page closes with residual risk evaluation notes.\n3/3"
                    .to_string(),
            ],
        );
        source
    }

    #[test]
    fn fixed_windows_cover_content_with_overlap() {
        let content = "abcdefghij".repeat(30);
        let windows = fixed_window_chunks(&content, 100, 20);

        assert_eq!(windows[0], (0, 100));
        assert_eq!(windows[1].0, 80);
        assert_eq!(windows.last().map(|(_, end)| *end), Some(content.len()));
        for pair in windows.windows(2) {
            assert!(pair[1].0 < pair[0].1, "windows must overlap");
        }
    }

    #[test]
    fn fixed_windows_respect_multibyte_boundaries() {
        let content = "안전 매뉴얼 내용이 여기에 계속 이어집니다".repeat(10);
        for (start, end) in fixed_window_chunks(&content, 50, 10) {
            assert!(content.is_char_boundary(start));
            assert!(content.is_char_boundary(end));
        }
    }

    #[test]
    fn page_offsets_tile_the_concatenated_stream() {
        let (pages, full_text) = build_pages(vec![
            "first page body".to_string(),
            "second page body".to_string(),
            "third page body".to_string(),
        ]);

        assert_eq!(pages[0].start_offset, 0);
        for pair in pages.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(pages.last().map(|page| page.end_offset), Some(full_text.len()));

        // Every offset in the stream belongs to exactly one page, the
        // joining newlines included.
        for offset in 0..full_text.len() {
            let owners = pages
                .iter()
                .filter(|page| page.contains_offset(offset))
                .count();
            assert_eq!(owners, 1, "offset {offset} owned by {owners} pages");
        }
        for page in &pages {
            assert!(full_text[page.start_offset..page.end_offset].starts_with(&page.raw_text));
        }
    }

    #[test]
    fn ingestion_persists_resolved_pages_and_mapped_chunks() {
        let source = manual_source();
        let mut store = test_store();
        let config = IngestConfig {
            chunk_chars: 80,
            overlap_chars: 20,
            ..IngestConfig::default()
        };

        let report =
            ingest_document(&source, &mut store, "manual.pdf", &config).expect("ingest");
        assert_eq!(report.page_count, 5);
        assert_eq!(report.pages_resolved_by_pattern, 3);
        // The two front-matter pages have nothing to resolve and no valid
        // neighbor continuation (it would run below 1).
        assert_eq!(report.pages_unresolved, 2);
        assert!(report.chunks_total > 0);
        assert!(report.sentences_total > 0);

        let pages = store.pages_for_document(&report.doc_id).expect("pages");
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[2].logical_number, 1);
        assert_eq!(pages[4].logical_number, 3);

        let chunks = store.chunks_for_document(&report.doc_id).expect("chunks");
        assert_eq!(chunks.len(), report.chunks_total);
        for chunk in &chunks {
            assert!(chunk.physical_page >= 1 && chunk.physical_page <= 5);
            assert!(!chunk.sentences.is_empty());
        }
    }

    #[test]
    fn reingest_replaces_rather_than_duplicates() {
        let source = manual_source();
        let mut store = test_store();
        let config = IngestConfig::default();

        let first = ingest_document(&source, &mut store, "manual.pdf", &config).expect("first");
        let second =
            ingest_document(&source, &mut store, "manual.pdf", &config).expect("second");
        assert_eq!(first.chunks_total, second.chunks_total);

        let chunks = store.chunks_for_document(&first.doc_id).expect("chunks");
        assert_eq!(chunks.len(), first.chunks_total);
    }

    #[test]
    fn extraction_failure_degrades_to_empty_page() {
        let mut source = MemorySource::default();
        source.add_document_with_failures(
            "flaky.pdf",
            vec![
                "First page resolves its own number cleanly.\nPage 4".to_string(),
                "this text is never served".to_string(),
                "Third page also resolves on its own.\nPage 6".to_string(),
            ],
            vec![2],
        );
        let mut store = test_store();

        let report = ingest_document(&source, &mut store, "flaky.pdf", &IngestConfig::default())
            .expect("ingest");
        assert_eq!(report.extraction_failures, 1);
        assert_eq!(report.warnings.len(), 1);

        let pages = store.pages_for_document(&report.doc_id).expect("pages");
        // The blank middle page is repaired from its neighbors.
        assert_eq!(pages[1].logical_number, 5);
    }

    #[test]
    fn backfill_is_idempotent_over_a_consistent_document() {
        let source = manual_source();
        let mut store = test_store();
        let config = IngestConfig::default();

        let report = ingest_document(&source, &mut store, "manual.pdf", &config).expect("ingest");
        let before = store.chunks_for_document(&report.doc_id).expect("chunks");

        backfill_document(&source, &mut store, "manual.pdf", &config).expect("backfill");
        let after = store.chunks_for_document(&report.doc_id).expect("chunks");

        assert_eq!(before.len(), after.len());
        for (left, right) in before.iter().zip(after.iter()) {
            assert_eq!(left.physical_page, right.physical_page);
            assert_eq!(left.logical_number, right.logical_number);
            assert_eq!(left.content, right.content);
        }
    }

    #[test]
    fn backfill_of_unknown_document_fails() {
        let source = manual_source();
        let mut store = test_store();
        let result =
            backfill_document(&source, &mut store, "missing.pdf", &IngestConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn one_failed_document_does_not_stop_the_run() {
        let mut source = manual_source();
        source.add_unopenable("broken.pdf");
        let mut store = test_store();

        let refs = vec!["manual.pdf".to_string(), "broken.pdf".to_string()];
        let summary = ingest_all(&source, &mut store, &refs, &IngestConfig::default());

        assert_eq!(summary.completed.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].source_ref, "broken.pdf");
    }
}
