//! Runtime citation-to-page locator.
//!
//! Given a cited sentence and the stored page estimate, re-derives the
//! precise physical page by scanning a three-page neighborhood of the live
//! document and scoring token overlap. The locator never raises: backend
//! failures, short inputs and scan timeouts all degrade to the stored
//! fallback page. Decisions go through a bounded process-local cache.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::BoundedCache;
use crate::source::{DocumentPages, PageTextSource};
use crate::text::{
    longest_ordered_run, normalize_for_match, token_overlap, tokenize_significant, truncate_chars,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Entries held by the decision cache.
    pub cache_capacity: usize,
    /// Hard deadline for the neighborhood scan, in milliseconds. Pages that
    /// do not report in time are skipped.
    pub scan_timeout_ms: u64,
    /// Cited-sentence prefix length used in cache keys.
    pub cache_key_chars: usize,
    /// Normalized sentences shorter than this are not worth scanning.
    pub min_sentence_chars: usize,
    /// Bonus when a page contains the whole normalized sentence verbatim.
    pub verbatim_bonus: i64,
    /// Bonus for three or more consecutive query tokens found in order.
    pub ordered_run_bonus: i64,
    /// Tie-break bonus toward the stored fallback page.
    pub fallback_page_bonus: i64,
    /// Minimum word ratio for accepting the best candidate outright.
    pub min_word_ratio: f64,
    /// Score that accepts the best candidate even under the ratio floor.
    pub min_accept_score: i64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        LocatorConfig {
            cache_capacity: 200,
            scan_timeout_ms: 3_000,
            cache_key_chars: 100,
            min_sentence_chars: 10,
            verbatim_bonus: 500,
            ordered_run_bonus: 100,
            fallback_page_bonus: 30,
            min_word_ratio: 0.2,
            min_accept_score: 100,
        }
    }
}

/// Tiered bonus by matched-word ratio. Monotone in the ratio, so with equal
/// secondary bonuses a better-matching page can never score lower.
fn ratio_tier(word_ratio: f64) -> i64 {
    if word_ratio >= 0.8 {
        1000
    } else if word_ratio >= 0.6 {
        500
    } else if word_ratio >= 0.4 {
        200
    } else if word_ratio >= 0.2 {
        50
    } else {
        0
    }
}

pub struct PageLocator {
    config: LocatorConfig,
    cache: Mutex<BoundedCache<(String, String), u32>>,
}

impl PageLocator {
    pub fn new(config: LocatorConfig) -> Self {
        let cache = Mutex::new(BoundedCache::new(config.cache_capacity));
        PageLocator { config, cache }
    }

    /// Re-derive the physical page for a cited sentence near `fallback_page`.
    /// Worst case this is a no-op returning the input fallback.
    pub fn locate(
        &self,
        source: &dyn PageTextSource,
        document_ref: &str,
        cited_sentence: &str,
        fallback_page: u32,
    ) -> u32 {
        let normalized = normalize_for_match(cited_sentence);
        if normalized.chars().count() < self.config.min_sentence_chars {
            return fallback_page;
        }

        let cache_key = (
            document_ref.to_string(),
            truncate_chars(&normalized, self.config.cache_key_chars).to_string(),
        );
        if let Ok(cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&cache_key) {
                debug!(document = document_ref, page = *cached, "locator cache hit");
                return *cached;
            }
        }

        let document = match source.open(document_ref) {
            Ok(document) => document,
            Err(error) => {
                warn!(document = document_ref, error = %error, "locator backend unavailable");
                return fallback_page;
            }
        };

        let page_count = document.page_count();
        if page_count == 0 {
            return fallback_page;
        }

        let query_tokens = tokenize_significant(cited_sentence);
        if query_tokens.is_empty() {
            return fallback_page;
        }

        let centered = fallback_page.clamp(1, page_count);
        let window_start = centered.saturating_sub(1).max(1);
        let window_end = (centered + 1).min(page_count);

        let scanned = self.scan_window(Arc::clone(&document), window_start, window_end);

        let mut best: Option<(i64, f64, u32)> = None;
        for (physical_index, text) in scanned {
            let (score, word_ratio) = score_page(
                &query_tokens,
                &normalized,
                &text,
                physical_index == fallback_page,
                &self.config,
            );
            if best.map_or(true, |(best_score, _, _)| score > best_score) {
                best = Some((score, word_ratio, physical_index));
            }
        }

        let located = match best {
            Some((score, word_ratio, physical_index))
                if word_ratio >= self.config.min_word_ratio
                    || score >= self.config.min_accept_score =>
            {
                debug!(
                    document = document_ref,
                    page = physical_index,
                    score,
                    word_ratio,
                    "locator accepted scanned page"
                );
                physical_index
            }
            _ => fallback_page,
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(cache_key, located);
        }
        located
    }

    /// Fetch the window pages concurrently, honoring the scan deadline.
    /// Per-page failures and stragglers are skipped, never raised.
    fn scan_window(
        &self,
        document: Arc<dyn DocumentPages>,
        window_start: u32,
        window_end: u32,
    ) -> Vec<(u32, String)> {
        let (sender, receiver) = mpsc::channel();
        let mut expected = 0usize;

        for physical_index in window_start..=window_end {
            let document = Arc::clone(&document);
            let sender = sender.clone();
            expected += 1;
            thread::spawn(move || {
                let result = document.page_text(physical_index);
                // Receiver may be gone after a timeout; nothing to do then.
                let _ = sender.send((physical_index, result));
            });
        }
        drop(sender);

        let deadline = Instant::now() + Duration::from_millis(self.config.scan_timeout_ms);
        let mut scanned = Vec::<(u32, String)>::new();

        for _ in 0..expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok((physical_index, Ok(text))) => scanned.push((physical_index, text)),
                Ok((physical_index, Err(error))) => {
                    warn!(page = physical_index, error = %error, "page scan failed");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("page scan deadline exceeded, degrading to received pages");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        scanned.sort_by_key(|(physical_index, _)| *physical_index);
        scanned
    }
}

fn score_page(
    query_tokens: &[String],
    normalized_sentence: &str,
    page_text: &str,
    is_fallback_page: bool,
    config: &LocatorConfig,
) -> (i64, f64) {
    let page_tokens = tokenize_significant(page_text);
    let (_, word_ratio) = token_overlap(query_tokens, &page_tokens);

    let mut score = ratio_tier(word_ratio);
    if normalize_for_match(page_text).contains(normalized_sentence) {
        score += config.verbatim_bonus;
    }
    if longest_ordered_run(query_tokens, &page_tokens) >= 3 {
        score += config.ordered_run_bonus;
    }
    if is_fallback_page {
        score += config.fallback_page_bonus;
    }

    (score, word_ratio)
}
