//! Whole-document reconciliation of printed page numbers.
//!
//! After an initial context-free resolver pass, pages that fell back to their
//! physical index are revisited with their nearest resolved neighbors as
//! context. Repair runs in fixed-size windows while walking the document and
//! once more over the whole table at the end, so a page resolved late can
//! retroactively repair earlier neighbors. Repair only ever touches
//! unresolved pages, which makes the pass idempotent. Bulk ingest and
//! incremental backfill share this module; both entry points funnel into the
//! same passes.

use anyhow::Result;
use tracing::debug;

use crate::model::Page;
use crate::resolver::{ResolveContext, Resolver, ResolverConfig};

/// Pages per repair window while walking the document.
const REPAIR_WINDOW: usize = 15;

pub struct Reconciler {
    resolver: Resolver,
}

impl Reconciler {
    pub fn new(config: ResolverConfig) -> Result<Self> {
        Ok(Reconciler {
            resolver: Resolver::new(config)?,
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Resolve every page of a document in place: initial pass, windowed
    /// repair, final whole-document repair.
    pub fn resolve_document(&self, pages: &mut [Page]) {
        for page in pages.iter_mut() {
            let resolution = self.resolver.resolve(&page.raw_text, page.physical_index, None);
            page.logical_number = resolution.logical_number;
            page.pattern_kind = resolution.kind;
            page.confidence = resolution.confidence;
        }

        let mut window_start = 0usize;
        while window_start < pages.len() {
            let window_end = (window_start + REPAIR_WINDOW).min(pages.len());
            self.repair_range(pages, window_start, window_end);
            window_start = window_end;
        }

        self.repair_range(pages, 0, pages.len());
    }

    /// Incremental backfill over an existing page table. Identical semantics
    /// to the tail of `resolve_document`: only unresolved pages are touched,
    /// so re-running over a fully-resolved table changes nothing.
    pub fn backfill(&self, pages: &mut [Page]) {
        let mut window_start = 0usize;
        while window_start < pages.len() {
            let window_end = (window_start + REPAIR_WINDOW).min(pages.len());
            self.repair_range(pages, window_start, window_end);
            window_start = window_end;
        }

        self.repair_range(pages, 0, pages.len());
    }

    /// Re-resolve unresolved pages in `[start, end)` with neighbor context
    /// drawn from the whole table.
    fn repair_range(&self, pages: &mut [Page], start: usize, end: usize) {
        for index in start..end {
            if pages[index].is_resolved() {
                continue;
            }

            let context = self.neighbor_context(pages, index);
            if context.previous.is_none() && context.next.is_none() {
                continue;
            }

            let page = &pages[index];
            let resolution =
                self.resolver
                    .resolve(&page.raw_text, page.physical_index, Some(&context));
            if resolution.logical_number != page.physical_index {
                debug!(
                    physical = page.physical_index,
                    logical = resolution.logical_number,
                    kind = resolution.kind.as_str(),
                    "repaired page from neighbor context"
                );
                let page = &mut pages[index];
                page.logical_number = resolution.logical_number;
                page.pattern_kind = resolution.kind;
                page.confidence = resolution.confidence;
            }
        }
    }

    /// Nearest resolved predecessor and successor, each extrapolated to the
    /// page directly adjacent to `index` so the resolver can treat them as
    /// immediate neighbors.
    fn neighbor_context(&self, pages: &[Page], index: usize) -> ResolveContext {
        let previous = pages[..index]
            .iter()
            .rev()
            .enumerate()
            .find(|(_, page)| page.is_resolved())
            .map(|(distance, page)| page.logical_number.saturating_add(distance as u32));

        let next = pages[index + 1..]
            .iter()
            .enumerate()
            .find(|(_, page)| page.is_resolved())
            .map(|(distance, page)| page.logical_number.saturating_sub(distance as u32));

        ResolveContext { previous, next }
    }
}
