use tracing::debug;

use crate::model::{Chunk, Page, PageAssignment, SentenceAssignment, SentenceMethod};
use crate::text::{normalize_for_match, split_sentences, truncate_chars};

use super::MapperConfig;

/// Locate a sentence inside chunk content: exact substring search first, then
/// a normalized partial match of the sentence's prefix slid over the chunk's
/// word boundaries. Returns the byte offset within the content.
pub fn locate_in_chunk(content: &str, sentence: &str, prefix_chars: usize) -> Option<usize> {
    if let Some(offset) = content.find(sentence) {
        return Some(offset);
    }

    let needle = normalize_for_match(truncate_chars(sentence, prefix_chars));
    if needle.is_empty() {
        return None;
    }

    // Window twice the prefix length absorbs whitespace and punctuation that
    // normalization collapses away.
    let window_chars = prefix_chars * 2;
    let mut word_starts = vec![0usize];
    let mut in_whitespace = false;
    for (index, character) in content.char_indices() {
        if character.is_whitespace() {
            in_whitespace = true;
        } else if in_whitespace {
            word_starts.push(index);
            in_whitespace = false;
        }
    }

    for start in word_starts {
        let window = truncate_chars(&content[start..], window_chars);
        if normalize_for_match(window).contains(&needle) {
            return Some(start);
        }
    }

    None
}

/// Assign each sentence of a chunk to a page, refining on top of the chunk's
/// own placement. Direct evidence (offset lookup, then page-text scan) may
/// override the parent page; otherwise the sentence inherits it.
pub fn map_sentences(
    chunk: &Chunk,
    chunk_page: PageAssignment,
    pages: &[Page],
    config: &MapperConfig,
) -> Vec<SentenceAssignment> {
    split_sentences(&chunk.content)
        .into_iter()
        .enumerate()
        .map(|(sentence_index, span)| {
            if let Some(in_chunk) =
                locate_in_chunk(&chunk.content, &span.text, config.sentence_prefix_chars)
            {
                let absolute = chunk.start_offset + in_chunk;
                if let Some(page) = pages.iter().find(|page| page.contains_offset(absolute)) {
                    return SentenceAssignment {
                        sentence_index,
                        text: span.text,
                        physical_page: page.physical_index,
                        method: SentenceMethod::Offset,
                    };
                }
            }

            let prefix = normalize_for_match(truncate_chars(
                &span.text,
                config.sentence_prefix_chars,
            ));
            if !prefix.is_empty() {
                if let Some(page) = pages
                    .iter()
                    .find(|page| normalize_for_match(&page.raw_text).contains(&prefix))
                {
                    debug!(
                        chunk = %chunk.chunk_id,
                        sentence = sentence_index,
                        page = page.physical_index,
                        "sentence placed by page-text scan"
                    );
                    return SentenceAssignment {
                        sentence_index,
                        text: span.text,
                        physical_page: page.physical_index,
                        method: SentenceMethod::PageScan,
                    };
                }
            }

            SentenceAssignment {
                sentence_index,
                text: span.text,
                physical_page: chunk_page.physical_page,
                method: SentenceMethod::Inherited,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, start_offset: usize) -> Chunk {
        Chunk {
            chunk_id: "doc-1:chunk:001".to_string(),
            doc_id: "doc-1".to_string(),
            content: content.to_string(),
            start_offset,
            end_offset: start_offset + content.len(),
        }
    }

    fn page(physical_index: u32, start: usize, text: &str) -> Page {
        Page::new(physical_index, text.to_string(), start)
    }

    fn assignment(physical_page: u32) -> PageAssignment {
        PageAssignment {
            physical_page,
            logical_number: physical_page,
        }
    }

    #[test]
    fn sentences_resolve_across_a_page_boundary() {
        let page_one = "This opening sentence lives on page one entirely. ";
        let page_two = "And this closing sentence lives on page two instead.";
        let pages = vec![page(1, 0, page_one), page(2, page_one.len(), page_two)];

        let content = format!("{page_one}{page_two}");
        let chunk = chunk(&content, 0);
        let assignments =
            map_sentences(&chunk, assignment(1), &pages, &MapperConfig::default());

        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].physical_page, 1);
        assert_eq!(assignments[0].method, SentenceMethod::Offset);
        assert_eq!(assignments[1].physical_page, 2);
        assert_eq!(assignments[1].method, SentenceMethod::Offset);
    }

    #[test]
    fn out_of_range_offsets_fall_back_to_page_scan() {
        // The chunk's offsets point past the page table, but the sentence is
        // findable on a page by its normalized prefix.
        let pages = vec![page(3, 0, "Some page body. The wandering sentence sits right here.")];
        let chunk = chunk("The wandering sentence sits right here.", 10_000);

        let assignments =
            map_sentences(&chunk, assignment(1), &pages, &MapperConfig::default());
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].physical_page, 3);
        assert_eq!(assignments[0].method, SentenceMethod::PageScan);
    }

    #[test]
    fn unlocatable_sentences_inherit_the_chunk_page() {
        let pages = vec![page(1, 0, "entirely unrelated page text")];
        let chunk = chunk("A sentence that exists nowhere in the table.", 10_000);

        let assignments =
            map_sentences(&chunk, assignment(7), &pages, &MapperConfig::default());
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].physical_page, 7);
        assert_eq!(assignments[0].method, SentenceMethod::Inherited);
    }

    #[test]
    fn short_fragments_are_not_assigned() {
        let pages = vec![page(1, 0, "page text body here")];
        let chunk = chunk("Tiny. Bit.", 0);

        let assignments =
            map_sentences(&chunk, assignment(1), &pages, &MapperConfig::default());
        assert!(assignments.is_empty());
    }

    #[test]
    fn locate_in_chunk_finds_exact_then_normalized_partial() {
        let content = "Lead-in words.   The   TARGET sentence, with (markup) inside it, continues here.";

        let exact = locate_in_chunk(content, "The   TARGET sentence", 30);
        assert_eq!(exact, Some(content.find("The   TARGET").unwrap()));

        // Different whitespace defeats the exact search; the normalized
        // partial match still lands on a word boundary at or shortly before
        // the sentence (the window absorbs up to twice the prefix length).
        let partial = locate_in_chunk(content, "The TARGET sentence, with markup inside", 30);
        let offset = partial.expect("normalized partial match");
        let target = content.find("The   TARGET").unwrap();
        assert!(offset <= target);
        assert!(target - offset <= 60);
    }

    #[test]
    fn locate_in_chunk_misses_cleanly() {
        assert!(locate_in_chunk("some chunk content", "absent sentence text", 30).is_none());
    }
}
