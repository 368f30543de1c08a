use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A document as seen by the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub source_ref: String,
    pub page_count: u32,
}

/// Pattern family that produced a logical page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Fraction,
    Of,
    Labelled,
    BareDigit,
    ContextEstimate,
    PhysicalFallback,
}

impl PatternKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Fraction => "fraction",
            PatternKind::Of => "of",
            PatternKind::Labelled => "labelled",
            PatternKind::BareDigit => "bare_digit",
            PatternKind::ContextEstimate => "context_estimate",
            PatternKind::PhysicalFallback => "physical_fallback",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "fraction" => PatternKind::Fraction,
            "of" => PatternKind::Of,
            "labelled" => PatternKind::Labelled,
            "bare_digit" => PatternKind::BareDigit,
            "context_estimate" => PatternKind::ContextEstimate,
            _ => PatternKind::PhysicalFallback,
        }
    }
}

/// One strategy's proposal for a page's printed number. Transient: candidates
/// never outlive a single resolution call.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub value: u32,
    pub confidence: f64,
    pub kind: PatternKind,
}

/// The resolver's final answer for one page.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub logical_number: u32,
    pub confidence: f64,
    pub kind: PatternKind,
}

/// One physical page with its recovered printed number and its character
/// range in the document's concatenated text stream.
///
/// `physical_index` is 1-based viewer order and always trustworthy.
/// `logical_number == physical_index` encodes "unresolved, fell back to the
/// physical index": a printed number equal to the physical index carries no
/// information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub physical_index: u32,
    pub logical_number: u32,
    pub raw_text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub pattern_kind: PatternKind,
    pub confidence: f64,
}

impl Page {
    pub fn new(physical_index: u32, raw_text: String, start_offset: usize) -> Self {
        let end_offset = start_offset + raw_text.len();
        Page {
            physical_index,
            logical_number: physical_index,
            raw_text,
            start_offset,
            end_offset,
            pattern_kind: PatternKind::PhysicalFallback,
            confidence: 0.0,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.logical_number != self.physical_index
    }

    /// Whether `offset` falls inside this page's half-open character range.
    pub fn contains_offset(&self, offset: usize) -> bool {
        offset >= self.start_offset && offset < self.end_offset
    }

    /// Whether `[start, end)` intersects this page's range.
    pub fn intersects(&self, start: usize, end: usize) -> bool {
        start < self.end_offset && end > self.start_offset
    }
}

/// A retrieval chunk: a window over the document's concatenated text stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// The physical/logical page pair assigned to a chunk or sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAssignment {
    pub physical_page: u32,
    pub logical_number: u32,
}

/// How a chunk ended up on its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMethod {
    SoleCandidate,
    ContentScore,
    StartOffset,
    EndOffset,
    LargestOverlap,
    LastPageFallback,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkPlacement {
    pub page: PageAssignment,
    pub method: PlacementMethod,
}

/// How a sentence ended up on its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceMethod {
    Offset,
    PageScan,
    Inherited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceAssignment {
    pub sentence_index: usize,
    pub text: String,
    pub physical_page: u32,
    pub method: SentenceMethod,
}

/// The persisted shape of a mapped chunk at the store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub physical_page: u32,
    pub logical_number: u32,
    pub sentences: Vec<String>,
    pub sentence_page_map: BTreeMap<u32, u32>,
    pub updated_at: String,
}

/// The persisted shape of one page-table row. Raw page text is not persisted;
/// backfill re-reads it from the text source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub doc_id: String,
    pub physical_index: u32,
    pub logical_number: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub pattern_kind: PatternKind,
    pub confidence: f64,
}

/// Per-document ingestion outcome, serializable alongside run logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub source_ref: String,
    pub page_count: u32,
    pub extraction_failures: usize,
    pub pages_resolved_by_pattern: usize,
    pub pages_resolved_by_context: usize,
    pub pages_unresolved: usize,
    pub chunks_total: usize,
    pub chunks_mapped_by_content: usize,
    pub chunks_mapped_by_offset: usize,
    pub sentences_total: usize,
    pub sentences_mapped_by_offset: usize,
    pub sentences_mapped_by_scan: usize,
    pub sentences_inherited: usize,
    pub batches_written: usize,
    pub warnings: Vec<String>,
    pub started_at: String,
    pub completed_at: String,
}

/// Outcome of a document-sequential ingestion run over several documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub completed: Vec<IngestReport>,
    pub failed: Vec<FailedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDocument {
    pub source_ref: String,
    pub error: String,
}
