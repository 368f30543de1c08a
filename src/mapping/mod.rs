//! Chunk and sentence to page assignment.
//!
//! Chunks are placed by a hybrid of character-offset overlap and normalized
//! content matching; sentences refine the chunk's placement per sentence.
//! Both mappers are pure functions over the finished page table and are fully
//! re-computable at any time.

mod chunk;
mod sentence;

pub use chunk::map_chunk;
pub use sentence::{locate_in_chunk, map_sentences};

use serde::{Deserialize, Serialize};

/// Scoring weights and thresholds for the chunk/sentence mappers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Below this many normalized characters, content scoring is skipped and
    /// placement is purely offset-based.
    pub min_content_chars: usize,
    /// Minimum content score required to trust a content-based placement.
    pub content_accept_score: f64,
    /// Bonus when a page contains the whole normalized chunk verbatim.
    pub verbatim_bonus: f64,
    /// Bonus when a page contains the normalized chunk's prefix.
    pub prefix_bonus: f64,
    /// Prefix length (characters) used for the prefix containment probe.
    pub prefix_chars: usize,
    /// Weight applied to the chunk-range overlap ratio.
    pub overlap_weight: f64,
    /// Bonus when the chunk's start offset falls inside the page.
    pub start_bonus: f64,
    /// Normalized prefix length used to locate sentences.
    pub sentence_prefix_chars: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            min_content_chars: 15,
            content_accept_score: 50.0,
            verbatim_bonus: 100.0,
            prefix_bonus: 50.0,
            prefix_chars: 100,
            overlap_weight: 30.0,
            start_bonus: 10.0,
            sentence_prefix_chars: 30,
        }
    }
}
