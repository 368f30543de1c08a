//! Persistent store boundary.
//!
//! The reconciliation engine only produces records for this store; it does
//! not define the store's consistency model. Writes are batched inside
//! transactions with bounded retry, and every write path is scoped to one
//! document so a failed ingestion never corrupts committed documents.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{ChunkRecord, Document, Page, PageRecord, PatternKind};
use crate::util::now_utc_string;

/// Batched upsert and query-by-document access to the document/chunk store.
pub trait ChunkStore {
    fn upsert_document(&mut self, document: &Document) -> Result<()>;
    fn upsert_pages(&mut self, doc_id: &str, pages: &[Page]) -> Result<()>;
    /// Write chunk records in fixed-size transactional batches. Returns the
    /// number of batches committed.
    fn upsert_chunks(&mut self, records: &[ChunkRecord]) -> Result<usize>;
    fn pages_for_document(&self, doc_id: &str) -> Result<Vec<PageRecord>>;
    fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<ChunkRecord>>;
    /// Remove every row belonging to `doc_id`. Used before re-ingesting a
    /// document so a partial earlier run leaves no stale rows behind.
    fn delete_document(&mut self, doc_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub batch_size: usize,
    pub retry_attempts: usize,
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            batch_size: 64,
            retry_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

pub struct SqliteChunkStore {
    connection: Connection,
    config: StoreConfig,
}

impl SqliteChunkStore {
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_connection(connection, config)
    }

    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::from_connection(connection, config)
    }

    fn from_connection(connection: Connection, config: StoreConfig) -> Result<Self> {
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(SqliteChunkStore { connection, config })
    }

    /// Run `operation` up to the configured attempt count with linear
    /// backoff. Transient storage errors are the expected caller here.
    fn with_retry<T>(
        &mut self,
        label: &str,
        mut operation: impl FnMut(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match operation(&mut self.connection) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!(attempt, error = %error, "{label} failed");
                    if attempt < attempts {
                        thread::sleep(Duration::from_millis(
                            self.config.retry_backoff_ms * attempt as u64,
                        ));
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("{label} failed without an error"))
            .context(format!("{label} exhausted {attempts} attempts")))
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS docs (
              doc_id TEXT PRIMARY KEY,
              source_ref TEXT NOT NULL,
              page_count INTEGER NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pages (
              doc_id TEXT NOT NULL,
              physical_index INTEGER NOT NULL,
              logical_number INTEGER NOT NULL,
              start_offset INTEGER NOT NULL,
              end_offset INTEGER NOT NULL,
              pattern_kind TEXT NOT NULL,
              confidence REAL NOT NULL,
              PRIMARY KEY (doc_id, physical_index),
              FOREIGN KEY (doc_id) REFERENCES docs(doc_id)
            );

            CREATE TABLE IF NOT EXISTS chunks (
              chunk_id TEXT PRIMARY KEY,
              doc_id TEXT NOT NULL,
              content TEXT NOT NULL,
              start_offset INTEGER NOT NULL,
              end_offset INTEGER NOT NULL,
              physical_page INTEGER NOT NULL,
              logical_number INTEGER NOT NULL,
              sentences TEXT NOT NULL,
              sentence_page_map TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              FOREIGN KEY (doc_id) REFERENCES docs(doc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);
            ",
        )
        .context("failed to ensure store schema")
}

impl ChunkStore for SqliteChunkStore {
    fn upsert_document(&mut self, document: &Document) -> Result<()> {
        let document = document.clone();
        self.with_retry("document upsert", move |connection| {
            connection.execute(
                "
                INSERT INTO docs (doc_id, source_ref, page_count, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(doc_id) DO UPDATE SET
                  source_ref = excluded.source_ref,
                  page_count = excluded.page_count,
                  updated_at = excluded.updated_at
                ",
                params![
                    document.doc_id,
                    document.source_ref,
                    document.page_count,
                    now_utc_string()
                ],
            )?;
            Ok(())
        })
    }

    fn upsert_pages(&mut self, doc_id: &str, pages: &[Page]) -> Result<()> {
        let doc_id = doc_id.to_string();
        let pages = pages.to_vec();
        self.with_retry("page table upsert", move |connection| {
            let transaction = connection.transaction()?;
            {
                let mut statement = transaction.prepare(
                    "
                    INSERT INTO pages
                      (doc_id, physical_index, logical_number, start_offset,
                       end_offset, pattern_kind, confidence)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(doc_id, physical_index) DO UPDATE SET
                      logical_number = excluded.logical_number,
                      start_offset = excluded.start_offset,
                      end_offset = excluded.end_offset,
                      pattern_kind = excluded.pattern_kind,
                      confidence = excluded.confidence
                    ",
                )?;
                for page in &pages {
                    statement.execute(params![
                        doc_id,
                        page.physical_index,
                        page.logical_number,
                        page.start_offset as i64,
                        page.end_offset as i64,
                        page.pattern_kind.as_str(),
                        page.confidence
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
    }

    fn upsert_chunks(&mut self, records: &[ChunkRecord]) -> Result<usize> {
        let batch_size = self.config.batch_size.max(1);
        let mut batches_written = 0usize;

        for batch in records.chunks(batch_size) {
            let batch = batch.to_vec();
            self.with_retry("chunk batch upsert", move |connection| {
                let transaction = connection.transaction()?;
                {
                    let mut statement = transaction.prepare(
                        "
                        INSERT INTO chunks
                          (chunk_id, doc_id, content, start_offset, end_offset,
                           physical_page, logical_number, sentences,
                           sentence_page_map, updated_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                        ON CONFLICT(chunk_id) DO UPDATE SET
                          content = excluded.content,
                          start_offset = excluded.start_offset,
                          end_offset = excluded.end_offset,
                          physical_page = excluded.physical_page,
                          logical_number = excluded.logical_number,
                          sentences = excluded.sentences,
                          sentence_page_map = excluded.sentence_page_map,
                          updated_at = excluded.updated_at
                        ",
                    )?;
                    for record in &batch {
                        let sentences = serde_json::to_string(&record.sentences)
                            .context("failed to serialize sentences")?;
                        let sentence_page_map =
                            serde_json::to_string(&record.sentence_page_map)
                                .context("failed to serialize sentence page map")?;
                        statement.execute(params![
                            record.chunk_id,
                            record.doc_id,
                            record.content,
                            record.start_offset as i64,
                            record.end_offset as i64,
                            record.physical_page,
                            record.logical_number,
                            sentences,
                            sentence_page_map,
                            record.updated_at
                        ])?;
                    }
                }
                transaction.commit()?;
                Ok(())
            })?;
            batches_written += 1;
        }

        Ok(batches_written)
    }

    fn pages_for_document(&self, doc_id: &str) -> Result<Vec<PageRecord>> {
        let mut statement = self.connection.prepare(
            "
            SELECT doc_id, physical_index, logical_number, start_offset,
                   end_offset, pattern_kind, confidence
            FROM pages
            WHERE doc_id = ?1
            ORDER BY physical_index ASC
            ",
        )?;

        let mut rows = statement.query([doc_id])?;
        let mut records = Vec::<PageRecord>::new();
        while let Some(row) = rows.next()? {
            records.push(PageRecord {
                doc_id: row.get(0)?,
                physical_index: row.get(1)?,
                logical_number: row.get(2)?,
                start_offset: row.get::<_, i64>(3)? as usize,
                end_offset: row.get::<_, i64>(4)? as usize,
                pattern_kind: PatternKind::from_db(&row.get::<_, String>(5)?),
                confidence: row.get(6)?,
            });
        }
        Ok(records)
    }

    fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<ChunkRecord>> {
        let mut statement = self.connection.prepare(
            "
            SELECT chunk_id, doc_id, content, start_offset, end_offset,
                   physical_page, logical_number, sentences, sentence_page_map,
                   updated_at
            FROM chunks
            WHERE doc_id = ?1
            ORDER BY start_offset ASC, chunk_id ASC
            ",
        )?;

        let mut rows = statement.query([doc_id])?;
        let mut records = Vec::<ChunkRecord>::new();
        while let Some(row) = rows.next()? {
            let sentences_json = row.get::<_, String>(7)?;
            let sentence_map_json = row.get::<_, String>(8)?;
            records.push(ChunkRecord {
                chunk_id: row.get(0)?,
                doc_id: row.get(1)?,
                content: row.get(2)?,
                start_offset: row.get::<_, i64>(3)? as usize,
                end_offset: row.get::<_, i64>(4)? as usize,
                physical_page: row.get(5)?,
                logical_number: row.get(6)?,
                sentences: serde_json::from_str(&sentences_json)
                    .context("failed to parse stored sentences")?,
                sentence_page_map: serde_json::from_str(&sentence_map_json)
                    .context("failed to parse stored sentence page map")?,
                updated_at: row.get(9)?,
            });
        }
        Ok(records)
    }

    fn delete_document(&mut self, doc_id: &str) -> Result<()> {
        let doc_id = doc_id.to_string();
        self.with_retry("document delete", move |connection| {
            let transaction = connection.transaction()?;
            transaction.execute("DELETE FROM chunks WHERE doc_id = ?1", [doc_id.as_str()])?;
            transaction.execute("DELETE FROM pages WHERE doc_id = ?1", [doc_id.as_str()])?;
            transaction.execute("DELETE FROM docs WHERE doc_id = ?1", [doc_id.as_str()])?;
            transaction.commit()?;
            Ok(())
        })
    }
}

impl SqliteChunkStore {
    /// Stored page count for a document, if it has been ingested.
    pub fn document_page_count(&self, doc_id: &str) -> Result<Option<u32>> {
        let count = self
            .connection
            .query_row(
                "SELECT page_count FROM docs WHERE doc_id = ?1",
                [doc_id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn store() -> SqliteChunkStore {
        SqliteChunkStore::open_in_memory(StoreConfig::default()).expect("store opens")
    }

    fn insert_document(store: &mut SqliteChunkStore, doc_id: &str) {
        store
            .upsert_document(&Document {
                doc_id: doc_id.to_string(),
                source_ref: format!("{doc_id}.pdf"),
                page_count: 6,
            })
            .expect("doc upsert");
    }

    fn sample_record(chunk_id: &str, doc_id: &str, start: usize) -> ChunkRecord {
        let mut sentence_page_map = BTreeMap::new();
        sentence_page_map.insert(0u32, 4u32);
        sentence_page_map.insert(1u32, 5u32);
        ChunkRecord {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            content: "First stored sentence. Second stored sentence.".to_string(),
            start_offset: start,
            end_offset: start + 46,
            physical_page: 4,
            logical_number: 1,
            sentences: vec![
                "First stored sentence.".to_string(),
                "Second stored sentence.".to_string(),
            ],
            sentence_page_map,
            updated_at: now_utc_string(),
        }
    }

    #[test]
    fn chunk_records_round_trip_with_sentence_maps() {
        let mut store = store();
        store
            .upsert_document(&Document {
                doc_id: "doc-a".to_string(),
                source_ref: "a.pdf".to_string(),
                page_count: 6,
            })
            .expect("doc upsert");
        assert_eq!(store.document_page_count("doc-a").expect("count"), Some(6));
        assert_eq!(store.document_page_count("doc-z").expect("count"), None);

        let records = vec![sample_record("doc-a:chunk:001", "doc-a", 0)];
        let batches = store.upsert_chunks(&records).expect("chunk upsert");
        assert_eq!(batches, 1);

        let loaded = store.chunks_for_document("doc-a").expect("query");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].sentences.len(), 2);
        assert_eq!(loaded[0].sentence_page_map.get(&1), Some(&5));
        assert_eq!(loaded[0].physical_page, 4);
    }

    #[test]
    fn upserts_update_in_place_without_duplicating() {
        let mut store = store();
        insert_document(&mut store, "doc-a");
        let mut record = sample_record("doc-a:chunk:001", "doc-a", 0);
        store.upsert_chunks(&[record.clone()]).expect("first write");

        record.physical_page = 9;
        store.upsert_chunks(&[record]).expect("second write");

        let loaded = store.chunks_for_document("doc-a").expect("query");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].physical_page, 9);
    }

    #[test]
    fn batching_splits_large_writes() {
        let config = StoreConfig {
            batch_size: 2,
            ..StoreConfig::default()
        };
        let mut store = SqliteChunkStore::open_in_memory(config).expect("store opens");
        insert_document(&mut store, "doc-a");

        let records = (0..5)
            .map(|index| sample_record(&format!("doc-a:chunk:{index:03}"), "doc-a", index * 100))
            .collect::<Vec<ChunkRecord>>();
        let batches = store.upsert_chunks(&records).expect("upsert");
        assert_eq!(batches, 3);
        assert_eq!(store.chunks_for_document("doc-a").expect("query").len(), 5);
    }

    #[test]
    fn page_table_round_trips() {
        let mut store = store();
        insert_document(&mut store, "doc-a");
        let mut page = Page::new(3, "page text".to_string(), 100);
        page.logical_number = 1;
        page.pattern_kind = PatternKind::Fraction;
        page.confidence = 0.98;

        store.upsert_pages("doc-a", &[page]).expect("page upsert");
        let loaded = store.pages_for_document("doc-a").expect("query");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].physical_index, 3);
        assert_eq!(loaded[0].logical_number, 1);
        assert_eq!(loaded[0].pattern_kind, PatternKind::Fraction);
        assert_eq!(loaded[0].start_offset, 100);
    }

    #[test]
    fn deleting_one_document_leaves_others_untouched() {
        let mut store = store();
        insert_document(&mut store, "doc-a");
        insert_document(&mut store, "doc-b");
        store
            .upsert_chunks(&[
                sample_record("doc-a:chunk:001", "doc-a", 0),
                sample_record("doc-b:chunk:001", "doc-b", 0),
            ])
            .expect("upsert");

        store.delete_document("doc-a").expect("delete");
        assert!(store.chunks_for_document("doc-a").expect("query").is_empty());
        assert_eq!(store.chunks_for_document("doc-b").expect("query").len(), 1);
    }
}
