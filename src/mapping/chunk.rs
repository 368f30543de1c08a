use tracing::debug;

use crate::model::{ChunkPlacement, Page, PageAssignment, PlacementMethod};
use crate::text::{normalize_for_match, truncate_chars};

use super::MapperConfig;

fn placement(page: &Page, method: PlacementMethod) -> ChunkPlacement {
    ChunkPlacement {
        page: PageAssignment {
            physical_page: page.physical_index,
            logical_number: page.logical_number,
        },
        method,
    }
}

/// Fraction of the chunk's offset range covered by the page.
fn overlap_ratio(page: &Page, start: usize, end: usize) -> f64 {
    if end <= start {
        return 0.0;
    }
    let overlap_start = start.max(page.start_offset);
    let overlap_end = end.min(page.end_offset);
    if overlap_end <= overlap_start {
        return 0.0;
    }
    (overlap_end - overlap_start) as f64 / (end - start) as f64
}

/// Assign a chunk to one physical/logical page pair.
///
/// Candidates are the pages whose ranges intersect `[start, end)`. A single
/// candidate wins outright. Among several, normalized content containment is
/// scored first; pure offset logic decides when content evidence is weak.
/// Returns `None` only for an empty page table.
pub fn map_chunk(
    start: usize,
    end: usize,
    pages: &[Page],
    content: &str,
    config: &MapperConfig,
) -> Option<ChunkPlacement> {
    let candidates = pages
        .iter()
        .filter(|page| page.intersects(start, end))
        .collect::<Vec<&Page>>();

    if candidates.is_empty() {
        let last = pages.last()?;
        debug!(start, end, "chunk intersects no page, falling back to last");
        return Some(placement(last, PlacementMethod::LastPageFallback));
    }
    if candidates.len() == 1 {
        return Some(placement(candidates[0], PlacementMethod::SoleCandidate));
    }

    let chunk_norm = normalize_for_match(content);
    if chunk_norm.chars().count() >= config.min_content_chars {
        let mut best: Option<(f64, &Page)> = None;

        for &page in &candidates {
            let page_norm = normalize_for_match(&page.raw_text);
            let mut score = 0.0;

            if page_norm.contains(&chunk_norm) {
                score += config.verbatim_bonus;
            } else {
                let prefix = truncate_chars(&chunk_norm, config.prefix_chars);
                if !prefix.is_empty() && page_norm.contains(prefix) {
                    score += config.prefix_bonus;
                }
            }
            score += overlap_ratio(page, start, end) * config.overlap_weight;
            if page.contains_offset(start) {
                score += config.start_bonus;
            }

            // Strictly-greater keeps the earliest page on equal scores.
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, page));
            }
        }

        if let Some((score, page)) = best {
            if score >= config.content_accept_score {
                return Some(placement(page, PlacementMethod::ContentScore));
            }
        }
    }

    if let Some(page) = candidates
        .iter()
        .copied()
        .find(|page| page.contains_offset(start))
    {
        return Some(placement(page, PlacementMethod::StartOffset));
    }
    if end > 0 {
        if let Some(page) = candidates
            .iter()
            .copied()
            .find(|page| page.contains_offset(end - 1))
        {
            return Some(placement(page, PlacementMethod::EndOffset));
        }
    }

    let widest = candidates.iter().copied().max_by(|left, right| {
        overlap_ratio(left, start, end).total_cmp(&overlap_ratio(right, start, end))
    })?;
    Some(placement(widest, PlacementMethod::LargestOverlap))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_text(physical_index: u32, start: usize, text: &str) -> Page {
        let mut page = Page::new(physical_index, text.to_string(), start);
        page.logical_number = physical_index.saturating_sub(3).max(1);
        page
    }

    fn config() -> MapperConfig {
        MapperConfig::default()
    }

    #[test]
    fn sole_intersecting_page_wins_without_scoring() {
        // Chunk [500, 700) wholly inside page range [400, 800).
        let pages = vec![
            page_with_text(1, 0, &"a".repeat(400)),
            page_with_text(2, 400, &"b".repeat(400)),
        ];

        let result = map_chunk(500, 700, &pages, "gibberish not on any page", &config())
            .expect("placement");
        assert_eq!(result.page.physical_page, 2);
        assert_eq!(result.method, PlacementMethod::SoleCandidate);
    }

    #[test]
    fn empty_candidate_set_falls_back_to_last_page() {
        let pages = vec![
            page_with_text(1, 0, "first page text"),
            page_with_text(2, 15, "second page text"),
        ];

        let result = map_chunk(5000, 5100, &pages, "anything", &config()).expect("placement");
        assert_eq!(result.page.physical_page, 2);
        assert_eq!(result.method, PlacementMethod::LastPageFallback);
    }

    #[test]
    fn content_match_overrides_offset_overlap() {
        // The chunk's offsets lean into page 1, but its text sits verbatim on
        // page 2 (overlap windows shift offsets like this all the time).
        let page_one_text = "x".repeat(100);
        let page_two_text = "Here lives the full chunk content we are looking for, verbatim.";
        let pages = vec![
            page_with_text(1, 0, &page_one_text),
            page_with_text(2, 100, page_two_text),
        ];

        let content = "the full chunk content we are looking for";
        let result = map_chunk(40, 110, &pages, content, &config()).expect("placement");
        assert_eq!(result.page.physical_page, 2);
        assert_eq!(result.method, PlacementMethod::ContentScore);
    }

    #[test]
    fn short_content_uses_pure_offset_logic() {
        let pages = vec![
            page_with_text(1, 0, &"a".repeat(100)),
            page_with_text(2, 100, &"b".repeat(100)),
        ];

        // Content under 15 chars: the page containing the start offset wins.
        let result = map_chunk(80, 130, &pages, "tiny", &config()).expect("placement");
        assert_eq!(result.page.physical_page, 1);
        assert_eq!(result.method, PlacementMethod::StartOffset);
    }

    #[test]
    fn low_scores_fall_through_to_offset_logic() {
        let pages = vec![
            page_with_text(1, 0, &"a".repeat(100)),
            page_with_text(2, 100, &"b".repeat(100)),
        ];

        // Long content found on neither page: scores stay under 50.
        let content = "this content appears nowhere in the page table at all";
        let result = map_chunk(90, 130, &pages, content, &config()).expect("placement");
        assert_eq!(result.page.physical_page, 1);
        assert_eq!(result.method, PlacementMethod::StartOffset);
    }

    #[test]
    fn assigned_page_is_always_among_the_candidates() {
        let pages = vec![
            page_with_text(1, 0, &"a".repeat(50)),
            page_with_text(2, 50, &"b".repeat(50)),
            page_with_text(3, 100, &"c".repeat(50)),
        ];

        for (start, end) in [(0, 10), (45, 55), (40, 160), (99, 101), (120, 150)] {
            let result =
                map_chunk(start, end, &pages, "chunk body content for the probe", &config())
                    .expect("placement");
            let assigned = pages
                .iter()
                .find(|page| page.physical_index == result.page.physical_page)
                .expect("page exists");
            assert!(
                assigned.intersects(start, end),
                "chunk [{start},{end}) got non-intersecting page {}",
                assigned.physical_index
            );
        }
    }

    #[test]
    fn mapping_is_idempotent() {
        let pages = vec![
            page_with_text(1, 0, &"a".repeat(100)),
            page_with_text(2, 100, &"b".repeat(100)),
        ];
        let content = "a stable chunk body for the idempotence probe";

        let first = map_chunk(80, 140, &pages, content, &config()).expect("placement");
        let second = map_chunk(80, 140, &pages, content, &config()).expect("placement");
        assert_eq!(first.page, second.page);
        assert_eq!(first.method, second.method);
    }

    #[test]
    fn empty_page_table_yields_nothing() {
        assert!(map_chunk(0, 10, &[], "content", &config()).is_none());
    }
}
