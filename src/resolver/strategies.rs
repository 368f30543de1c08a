use anyhow::{Context, Result};
use regex::Regex;

use crate::model::{Candidate, PatternKind};

/// Short lines are almost always running footers; a hit there is worth the
/// strategy's top confidence.
const FOOTER_LINE_MAX_CHARS: usize = 24;

/// One declarative pattern strategy: a regex, its confidence tier, and the
/// line constraints under which a match is considered.
pub struct PatternStrategy {
    pub kind: PatternKind,
    pattern: Regex,
    confidence: f64,
    footer_confidence: f64,
    requires_denominator: bool,
    /// `Some(n)`: only probe the last `n` non-empty lines of the page.
    pub tail_lines: Option<usize>,
    /// `Some(n)`: only probe lines of at most `n` characters.
    pub max_line_chars: Option<usize>,
}

impl PatternStrategy {
    /// Extract a candidate from one line, or `None` when the pattern does not
    /// apply. Uses the last match on the line since footers sit at line ends.
    pub fn candidate_on_line(&self, line: &str) -> Option<Candidate> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(max_chars) = self.max_line_chars {
            if trimmed.chars().count() > max_chars {
                return None;
            }
        }

        let captures = self.pattern.captures_iter(trimmed).last()?;
        let value = captures.name("num")?.as_str().parse::<u32>().ok()?;

        if self.requires_denominator {
            let denominator = captures.name("den")?.as_str().parse::<u32>().ok()?;
            if value > denominator {
                return None;
            }
        }

        let confidence = if trimmed.chars().count() <= FOOTER_LINE_MAX_CHARS {
            self.footer_confidence
        } else {
            self.confidence
        };

        Some(Candidate {
            value,
            confidence,
            kind: self.kind,
        })
    }
}

/// The ordered strategy table, highest confidence family first. The order is
/// the resolution order; each entry can be unit-tested on its own.
pub fn build_strategies() -> Result<Vec<PatternStrategy>> {
    let compile = |pattern: &str| {
        Regex::new(pattern).with_context(|| format!("failed to compile pattern: {pattern}"))
    };

    Ok(vec![
        // "53/124", "53 / 124"
        PatternStrategy {
            kind: PatternKind::Fraction,
            pattern: compile(r"(?:^|[^0-9])(?P<num>[0-9]{1,3})\s*/\s*(?P<den>[0-9]{1,4})(?:[^0-9]|$)")?,
            confidence: 0.95,
            footer_confidence: 0.98,
            requires_denominator: true,
            tail_lines: None,
            max_line_chars: None,
        },
        // "53 of 124", "-- 53 of 124 --"
        PatternStrategy {
            kind: PatternKind::Of,
            pattern: compile(r"(?i)\b(?P<num>[0-9]{1,3})\s+of\s+(?P<den>[0-9]{1,4})\b")?,
            confidence: 0.90,
            footer_confidence: 0.98,
            requires_denominator: true,
            tail_lines: None,
            max_line_chars: None,
        },
        // "페이지 53", "Page 53"
        PatternStrategy {
            kind: PatternKind::Labelled,
            pattern: compile(r"(?i)(?:페이지|page)\s*\.?\s*(?P<num>[0-9]{1,3})\b")?,
            confidence: 0.80,
            footer_confidence: 0.85,
            requires_denominator: false,
            tail_lines: None,
            max_line_chars: None,
        },
        // "p. 53", "p.53"
        PatternStrategy {
            kind: PatternKind::Labelled,
            pattern: compile(r"(?i)\bp\.?\s*(?P<num>[0-9]{1,3})\b")?,
            confidence: 0.75,
            footer_confidence: 0.80,
            requires_denominator: false,
            tail_lines: None,
            max_line_chars: None,
        },
        // Bare digit: last resort, body-text numbers are frequent false
        // positives, so the match is restricted to short trailing lines and
        // further gated by strict validation in the resolver.
        PatternStrategy {
            kind: PatternKind::BareDigit,
            pattern: compile(r"^(?P<num>[0-9]{1,3})$")?,
            confidence: 0.40,
            footer_confidence: 0.50,
            requires_denominator: false,
            tail_lines: Some(2),
            max_line_chars: Some(5),
        },
    ])
}
