//! Logical page number recovery for a single page.
//!
//! An ordered set of pattern strategies probes the trailing lines of a page's
//! raw text, expanding the probe window before moving to the next, lower
//! confidence strategy. Every candidate passes bounds and direction
//! validation; on total failure the resolver degrades to a contextual
//! estimate and finally to the physical index. `resolve` never fails.

mod strategies;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Candidate, PatternKind, Resolution};
use strategies::{PatternStrategy, build_strategies};

/// Thresholds for candidate validation and window expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Trailing non-empty line window sizes, probed in order per strategy.
    pub window_sizes: Vec<usize>,
    /// Upper bound on printed page numbers.
    pub max_logical: u32,
    /// Physical/logical distance bound for fraction and "of" candidates.
    pub max_diff_strong: u32,
    /// Physical/logical distance bound for every other pattern.
    pub max_diff_weak: u32,
    /// How far a printed number may exceed the physical index. Front matter
    /// consumes physical pages, so logical numbers almost never run ahead.
    pub forward_slack: u32,
    /// Tolerance band around `neighbor ± 1` when resolving with context.
    pub context_band: u32,
    /// A bare digit on a late page must be at least this fraction of the
    /// physical index; rules out small body-text numbers.
    pub bare_digit_min_ratio: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            window_sizes: vec![5, 10, 15, 20, 30, 50],
            max_logical: 999,
            max_diff_strong: 100,
            max_diff_weak: 30,
            forward_slack: 5,
            context_band: 5,
            bare_digit_min_ratio: 0.2,
        }
    }
}

/// Already-resolved neighbor values, extrapolated to adjacency by the
/// reconciler: `previous` is the logical number the page directly before this
/// one would carry, `next` the one directly after.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext {
    pub previous: Option<u32>,
    pub next: Option<u32>,
}

pub struct Resolver {
    config: ResolverConfig,
    strategies: Vec<PatternStrategy>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let strategies = build_strategies()?;
        Ok(Resolver { config, strategies })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Recover the printed page number from one page's raw text.
    ///
    /// Always returns a value; the physical index stands in when nothing can
    /// be recovered (`kind == PhysicalFallback`, confidence zero).
    pub fn resolve(
        &self,
        page_text: &str,
        physical_index: u32,
        context: Option<&ResolveContext>,
    ) -> Resolution {
        let lines = page_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<&str>>();

        for strategy in &self.strategies {
            if let Some(candidate) = self.probe_strategy(strategy, &lines, physical_index, context)
            {
                debug!(
                    physical = physical_index,
                    logical = candidate.value,
                    kind = candidate.kind.as_str(),
                    "resolved printed page number"
                );
                return Resolution {
                    logical_number: candidate.value,
                    confidence: candidate.confidence,
                    kind: candidate.kind,
                };
            }
        }

        if let Some(estimate) = self.contextual_estimate(physical_index, context) {
            return estimate;
        }

        Resolution {
            logical_number: physical_index,
            confidence: 0.0,
            kind: PatternKind::PhysicalFallback,
        }
    }

    /// Probe one strategy over expanding trailing-line windows, bottom line
    /// first. Tail-restricted strategies (bare digit) see a single fixed
    /// window instead.
    fn probe_strategy(
        &self,
        strategy: &PatternStrategy,
        lines: &[&str],
        physical_index: u32,
        context: Option<&ResolveContext>,
    ) -> Option<Candidate> {
        let tail_window;
        let windows: &[usize] = match strategy.tail_lines {
            Some(tail) => {
                tail_window = [tail];
                &tail_window
            }
            None => &self.config.window_sizes,
        };
        let mut probed = 0usize;

        for &window in windows {
            let take = window.min(lines.len());
            // Expanding a window only adds earlier lines; rescan just those.
            let fresh = &lines[lines.len() - take..lines.len() - probed];
            for line in fresh.iter().rev() {
                let Some(candidate) = strategy.candidate_on_line(line) else {
                    continue;
                };
                if self.validate(&candidate, physical_index, context) {
                    return Some(candidate);
                }
            }

            probed = take;
            if probed == lines.len() {
                break;
            }
        }

        None
    }

    /// Bounds and direction checks applied to every candidate, tightened to a
    /// band around the expected neighbor continuation when context is known.
    fn validate(
        &self,
        candidate: &Candidate,
        physical_index: u32,
        context: Option<&ResolveContext>,
    ) -> bool {
        let value = candidate.value;
        if value == physical_index {
            return false;
        }
        if value < 1 || value > self.config.max_logical {
            return false;
        }

        if candidate.kind == PatternKind::BareDigit {
            if value >= physical_index {
                return false;
            }
            if (value as f64) < physical_index as f64 * self.config.bare_digit_min_ratio {
                return false;
            }
        }

        // With a known neighbor continuation, the band around it supersedes
        // the physical-index distance heuristics: the neighbor is a far
        // stronger reference than the physical index.
        if let Some(context) = context {
            let band = self.config.context_band;
            let near_previous = context
                .previous
                .map(|previous| value.abs_diff(previous.saturating_add(1)) <= band);
            let near_next = context
                .next
                .map(|next| value.abs_diff(next.saturating_sub(1)) <= band);
            match (near_previous, near_next) {
                (None, None) => {}
                (previous, next) => {
                    return previous.unwrap_or(false) || next.unwrap_or(false);
                }
            }
        }

        let diff = value.abs_diff(physical_index);
        let max_diff = match candidate.kind {
            PatternKind::Fraction | PatternKind::Of => self.config.max_diff_strong,
            _ => self.config.max_diff_weak,
        };
        if diff > max_diff {
            return false;
        }
        if value > physical_index && diff > self.config.forward_slack {
            return false;
        }

        true
    }

    /// Same-source estimate from a resolved neighbor: `neighbor ± 1`.
    fn contextual_estimate(
        &self,
        physical_index: u32,
        context: Option<&ResolveContext>,
    ) -> Option<Resolution> {
        let context = context?;
        let value = match (context.previous, context.next) {
            (Some(previous), _) => previous.saturating_add(1),
            (None, Some(next)) => next.saturating_sub(1),
            (None, None) => return None,
        };

        if value < 1 || value > self.config.max_logical || value == physical_index {
            return None;
        }

        debug!(
            physical = physical_index,
            logical = value,
            "estimated printed page number from neighbor"
        );
        Some(Resolution {
            logical_number: value,
            confidence: 0.6,
            kind: PatternKind::ContextEstimate,
        })
    }
}
