//! Page text source boundary.
//!
//! The engine treats text extraction as a black box that can fail: a missing
//! file, a corrupt document, an unavailable backend. Open failures are the
//! only ones a caller sees; per-page failures degrade at the call site.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};

/// Opens documents by reference and yields page-addressable text.
pub trait PageTextSource: Send + Sync {
    fn open(&self, document_ref: &str) -> Result<Arc<dyn DocumentPages>>;
}

/// One opened document. Pages are addressed by 1-based physical index.
pub trait DocumentPages: Send + Sync {
    fn page_count(&self) -> u32;
    fn page_text(&self, physical_index: u32) -> Result<String>;
}

/// Production source shelling out to `pdftotext`. Document references are
/// filesystem paths to PDFs.
pub struct PdftotextSource;

impl PageTextSource for PdftotextSource {
    fn open(&self, document_ref: &str) -> Result<Arc<dyn DocumentPages>> {
        let path = Path::new(document_ref);
        if !path.exists() {
            bail!("document not found: {document_ref}");
        }

        let output = Command::new("pdftotext")
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .output()
            .with_context(|| format!("failed to execute pdftotext for {document_ref}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdftotext returned non-zero exit status for {}: {}",
                document_ref,
                stderr.trim()
            );
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let mut pages = raw
            .split('\u{000C}')
            .map(|page| page.replace('\u{0000}', ""))
            .collect::<Vec<String>>();

        while let Some(last_page) = pages.last() {
            if last_page.trim().is_empty() {
                pages.pop();
                continue;
            }
            break;
        }

        Ok(Arc::new(ExtractedDocument { pages }))
    }
}

struct ExtractedDocument {
    pages: Vec<String>,
}

impl DocumentPages for ExtractedDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, physical_index: u32) -> Result<String> {
        let index = physical_index
            .checked_sub(1)
            .map(|index| index as usize)
            .filter(|index| *index < self.pages.len());
        match index {
            Some(index) => Ok(self.pages[index].clone()),
            None => bail!(
                "page {} out of range (document has {} pages)",
                physical_index,
                self.pages.len()
            ),
        }
    }
}

/// Scripted in-memory source used by tests: per-page failure injection, an
/// open failure switch, and a fetch counter for cache probes.
#[derive(Default)]
pub struct MemorySource {
    documents: HashMap<String, Arc<MemoryDocument>>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn add_document(&mut self, document_ref: &str, pages: Vec<String>) -> Arc<MemoryDocument> {
        let document = Arc::new(MemoryDocument {
            pages,
            failing_pages: Vec::new(),
            fail_open: false,
            fetch_count: AtomicUsize::new(0),
        });
        self.documents
            .insert(document_ref.to_string(), Arc::clone(&document));
        document
    }

    pub fn add_document_with_failures(
        &mut self,
        document_ref: &str,
        pages: Vec<String>,
        failing_pages: Vec<u32>,
    ) -> Arc<MemoryDocument> {
        let document = Arc::new(MemoryDocument {
            pages,
            failing_pages,
            fail_open: false,
            fetch_count: AtomicUsize::new(0),
        });
        self.documents
            .insert(document_ref.to_string(), Arc::clone(&document));
        document
    }

    pub fn add_unopenable(&mut self, document_ref: &str) {
        let document = Arc::new(MemoryDocument {
            pages: Vec::new(),
            failing_pages: Vec::new(),
            fail_open: true,
            fetch_count: AtomicUsize::new(0),
        });
        self.documents.insert(document_ref.to_string(), document);
    }
}

impl PageTextSource for MemorySource {
    fn open(&self, document_ref: &str) -> Result<Arc<dyn DocumentPages>> {
        let document = self
            .documents
            .get(document_ref)
            .with_context(|| format!("document not found: {document_ref}"))?;
        if document.fail_open {
            bail!("scripted open failure for {document_ref}");
        }
        Ok(Arc::clone(document) as Arc<dyn DocumentPages>)
    }
}

pub struct MemoryDocument {
    pages: Vec<String>,
    failing_pages: Vec<u32>,
    fail_open: bool,
    fetch_count: AtomicUsize,
}

impl MemoryDocument {
    /// Number of `page_text` calls served so far, failing ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl DocumentPages for MemoryDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, physical_index: u32) -> Result<String> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        if self.failing_pages.contains(&physical_index) {
            bail!("scripted extraction failure on page {physical_index}");
        }
        let index = physical_index
            .checked_sub(1)
            .map(|index| index as usize)
            .filter(|index| *index < self.pages.len());
        match index {
            Some(index) => Ok(self.pages[index].clone()),
            None => bail!(
                "page {} out of range (document has {} pages)",
                physical_index,
                self.pages.len()
            ),
        }
    }
}
