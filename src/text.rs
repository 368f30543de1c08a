//! Normalization, tokenization and sentence-splitting primitives shared by
//! the resolver, the chunk/sentence mappers and the runtime locator.

/// Collapse all whitespace runs to single spaces.
pub fn condense_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Normalize text for containment comparison: keep word characters and a
/// small punctuation set, collapse whitespace, lowercase.
pub fn normalize_for_match(input: &str) -> String {
    let kept = input
        .chars()
        .map(|character| {
            if character.is_alphanumeric()
                || character.is_whitespace()
                || matches!(character, '.' | ',' | '-' | '/')
            {
                character
            } else {
                ' '
            }
        })
        .collect::<String>();

    condense_whitespace(&kept).to_lowercase()
}

/// Truncate at a char boundary, keeping at most `max_chars` characters.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((index, _)) => &input[..index],
        None => input,
    }
}

/// Function words excluded from token-overlap scoring. Mixed English/Korean
/// because footers and cited sentences come from both.
const SIGNIFICANT_TOKEN_STOPWORDS: &[&str] = &[
    "about", "and", "are", "but", "for", "from", "has", "have", "its", "not", "that", "the",
    "this", "was", "were", "with", "그리고", "그러나", "대한", "또는", "있는", "있다", "하는",
    "하지만", "한다",
];

/// Split into significant words: lowercase alphanumeric runs of at least two
/// characters, stopwords removed, original order kept, duplicates dropped.
pub fn tokenize_significant(value: &str) -> Vec<String> {
    let lowered = value.to_lowercase();
    let mut tokens = Vec::<String>::new();

    for raw in lowered.split(|character: char| !character.is_alphanumeric()) {
        if raw.chars().count() < 2 {
            continue;
        }
        if SIGNIFICANT_TOKEN_STOPWORDS
            .iter()
            .any(|stopword| *stopword == raw)
        {
            continue;
        }
        if tokens.iter().any(|existing| existing == raw) {
            continue;
        }
        tokens.push(raw.to_string());
    }

    tokens
}

/// Loose token equivalence: exact match or either token containing the other.
/// Catches inflections and OCR joins without a stemmer.
pub fn tokens_match(left: &str, right: &str) -> bool {
    left == right || left.contains(right) || right.contains(left)
}

/// Count of query tokens found among the page tokens, and the matched ratio.
pub fn token_overlap(query_tokens: &[String], page_tokens: &[String]) -> (usize, f64) {
    if query_tokens.is_empty() {
        return (0, 0.0);
    }

    let matched = query_tokens
        .iter()
        .filter(|query_token| {
            page_tokens
                .iter()
                .any(|page_token| tokens_match(query_token, page_token))
        })
        .count();

    (matched, matched as f64 / query_tokens.len() as f64)
}

/// Length of the longest run of consecutive query tokens that appears in the
/// page token sequence in order (as a subsequence).
pub fn longest_ordered_run(query_tokens: &[String], page_tokens: &[String]) -> usize {
    let mut longest = 0usize;

    for start in 0..query_tokens.len() {
        let mut page_cursor = 0usize;
        let mut run = 0usize;

        for query_token in &query_tokens[start..] {
            let found = page_tokens[page_cursor..]
                .iter()
                .position(|page_token| tokens_match(query_token, page_token));
            match found {
                Some(offset) => {
                    page_cursor += offset + 1;
                    run += 1;
                }
                None => break,
            }
        }

        longest = longest.max(run);
        if longest >= query_tokens.len() - start {
            break;
        }
    }

    longest
}

/// A sentence extracted from chunk content, trimmed, with its byte range in
/// the original content.
#[derive(Debug, Clone)]
pub struct SentenceSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

const SENTENCE_MIN_CHARS: usize = 10;

fn is_sentence_terminator(character: char) -> bool {
    matches!(character, '.' | '!' | '?' | '。' | '\n')
}

/// Split chunk content on sentence terminators (`. ! ? 。` and newlines),
/// keeping only sentences of at least ten characters.
pub fn split_sentences(content: &str) -> Vec<SentenceSpan> {
    let mut spans = Vec::<SentenceSpan>::new();
    let mut start = 0usize;

    let mut push_span = |raw_start: usize, raw_end: usize, spans: &mut Vec<SentenceSpan>| {
        let slice = content.get(raw_start..raw_end).unwrap_or_default();
        let trimmed = slice.trim();
        if trimmed.chars().count() < SENTENCE_MIN_CHARS {
            return;
        }
        let leading = slice.len() - slice.trim_start().len();
        spans.push(SentenceSpan {
            start: raw_start + leading,
            end: raw_start + leading + trimmed.len(),
            text: trimmed.to_string(),
        });
    };

    for (index, character) in content.char_indices() {
        if !is_sentence_terminator(character) {
            continue;
        }
        let end = index + character.len_utf8();
        push_span(start, end, &mut spans);
        start = end;
    }

    if start < content.len() {
        push_span(start, content.len(), &mut spans);
    }

    spans
}
