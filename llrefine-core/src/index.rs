//! # Vector Index
//!
//! A persisted, flat embedding index over a [`CorpusRecord`] set.
//!
//! The index is written once: entries first, manifest last, so a manifest on
//! disk always means a complete index. When a manifest exists the index is
//! loaded verbatim and nothing is embedded or written.

use crate::corpus::{self, CorpusRecord};
use crate::error::{Error, ErrorKind, Result};
use crate::provider::Embedder;
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

const MANIFEST_KEY: &str = "manifest";
const ENTRIES_KEY: &str = "entries";
const FORMAT_VERSION: u32 = 1;

/// One embedded corpus row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub row: usize,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub vector: Vec<f32>,
}

/// Description of a persisted index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub collection: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub entries: usize,
    pub text_column: String,
    pub source: String,
}

/// Where to build an index from when none is persisted
#[derive(Debug, Clone)]
pub struct CorpusSource {
    pub path: PathBuf,
    pub text_column: String,
}

impl CorpusSource {
    pub fn new(path: impl Into<PathBuf>, text_column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text_column: text_column.into(),
        }
    }
}

/// Whether `open_or_build` embedded the corpus or reused a persisted index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    Loaded,
}

/// An entry paired with its similarity to a query
#[derive(Debug, Clone, Copy)]
pub struct ScoredEntry<'a> {
    pub entry: &'a IndexEntry,
    pub score: f32,
}

/// In-memory view of a persisted index
#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Load the persisted index, or build it from `source` if there is none.
    pub async fn open_or_build<E: Embedder>(
        store: &mut Store,
        embedder: &E,
        source: &CorpusSource,
    ) -> Result<(Self, BuildOutcome)> {
        if let Some(index) = Self::load(store)? {
            tracing::info!(
                location = %store.location(),
                entries = index.len(),
                "loaded persisted index"
            );
            return Ok((index, BuildOutcome::Loaded));
        }

        if !source.path.exists() {
            return Err(Error::index_missing(
                store.location(),
                format!("no persisted index and no corpus at {}", source.path.display()),
            )
            .with_operation("index::open_or_build"));
        }

        let records = corpus::load_csv(&source.path, &source.text_column)?;
        let index = Self::build(store, embedder, &records, source).await?;
        Ok((index, BuildOutcome::Built))
    }

    /// Wipe the collection and build again from `source`.
    pub async fn rebuild<E: Embedder>(
        store: &mut Store,
        embedder: &E,
        source: &CorpusSource,
    ) -> Result<Self> {
        let records = corpus::load_csv(&source.path, &source.text_column)?;
        store.clear()?;
        Self::build(store, embedder, &records, source).await
    }

    /// Read a persisted index. `Ok(None)` when no manifest exists.
    pub fn load(store: &Store) -> Result<Option<Self>> {
        if !store.exists(MANIFEST_KEY) {
            return Ok(None);
        }

        let manifest: IndexManifest = read_required(store, MANIFEST_KEY)?;
        let entries: Vec<IndexEntry> = read_required(store, ENTRIES_KEY)?;

        if entries.len() != manifest.entries {
            return Err(Error::storage_failed(format!(
                "manifest lists {} entries, found {}",
                manifest.entries,
                entries.len()
            ))
            .with_operation("index::load")
            .with_context("location", store.location()));
        }

        Ok(Some(Self { manifest, entries }))
    }

    /// Embed every record and persist the result.
    pub async fn build<E: Embedder>(
        store: &mut Store,
        embedder: &E,
        records: &[CorpusRecord],
        source: &CorpusSource,
    ) -> Result<Self> {
        let start = std::time::Instant::now();
        let mut entries = Vec::with_capacity(records.len());
        let mut dimensions = None;

        for record in records {
            let vector = embedder
                .embed(&record.text)
                .await
                .map_err(|e| e.into_error("index::embed").with_context("row", record.id()))?;

            let expected = *dimensions.get_or_insert(vector.len());
            if vector.is_empty() || vector.len() != expected {
                return Err(Error::inference_failed(format!(
                    "embedding for row {} has {} dimensions, expected {}",
                    record.row,
                    vector.len(),
                    expected
                ))
                .with_operation("index::embed"));
            }

            entries.push(IndexEntry {
                id: record.id(),
                row: record.row,
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                vector,
            });
        }

        let manifest = IndexManifest {
            version: FORMAT_VERSION,
            collection: store.collection().to_string(),
            embedding_model: embedder.embedding_model().to_string(),
            dimensions: dimensions.unwrap_or(0),
            entries: entries.len(),
            text_column: source.text_column.clone(),
            source: source.path.display().to_string(),
        };

        store.set_typed(ENTRIES_KEY, &entries)?;
        store.set_typed(MANIFEST_KEY, &manifest)?;

        tracing::info!(
            location = %store.location(),
            entries = entries.len(),
            dimensions = manifest.dimensions,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built index"
        );

        Ok(Self { manifest, entries })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// At most `k` entries by descending cosine similarity, ties by row.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEntry<'_>>> {
        if !self.is_empty() && query.len() != self.manifest.dimensions {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "query has {} dimensions, index has {}",
                    query.len(),
                    self.manifest.dimensions
                ),
            )
            .with_operation("index::search")
            .with_context("embedding_model", self.manifest.embedding_model.clone()));
        }

        let mut scored: Vec<ScoredEntry<'_>> = self
            .entries
            .iter()
            .map(|entry| ScoredEntry {
                entry,
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.entry.row.cmp(&b.entry.row))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

fn read_required<T: for<'de> Deserialize<'de>>(store: &Store, key: &str) -> Result<T> {
    store.get_typed(key)?.ok_or_else(|| {
        Error::storage_failed(format!("index manifest present but {} is missing", key))
            .with_operation("index::load")
            .with_context("location", store.location())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::KeywordEmbedder;

    const LAPTOPS: &str = "title,rating\n\
        UltraBook Air 13 lightweight laptop,4.7\n\
        Gaming tower desktop,4.1\n\
        Budget laptop,3.2\n\
        Wireless mouse,4.0\n";

    fn write_corpus(dir: &std::path::Path) -> CorpusSource {
        let path = dir.join("corpus.csv");
        std::fs::write(&path, LAPTOPS).unwrap();
        CorpusSource::new(path, "title")
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_build_then_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path());
        let db = dir.path().join("vector_db");
        let embedder = KeywordEmbedder::new();

        let mut store = Store::file(&db, "reviews");
        let (index, outcome) = VectorIndex::open_or_build(&mut store, &embedder, &source)
            .await
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Built);
        assert_eq!(index.len(), 4);
        assert_eq!(index.manifest().embedding_model, "keyword");
        assert_eq!(embedder.calls(), 4);
        assert_eq!(store.writes(), 2);

        // Second open: no embedding calls, no writes, same content
        let mut store = Store::file(&db, "reviews");
        let (reloaded, outcome) = VectorIndex::open_or_build(&mut store, &embedder, &source)
            .await
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Loaded);
        assert_eq!(embedder.calls(), 4);
        assert_eq!(store.writes(), 0);
        assert_eq!(reloaded.entries(), index.entries());
        assert_eq!(reloaded.manifest(), index.manifest());
    }

    #[tokio::test]
    async fn test_persisted_index_reused_without_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path());
        let embedder = KeywordEmbedder::new();
        let mut store = Store::file(dir.path().join("db"), "reviews");
        VectorIndex::open_or_build(&mut store, &embedder, &source).await.unwrap();

        std::fs::remove_file(&source.path).unwrap();
        let mut store = Store::file(dir.path().join("db"), "reviews");
        let (_, outcome) = VectorIndex::open_or_build(&mut store, &embedder, &source)
            .await
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Loaded);
    }

    #[tokio::test]
    async fn test_missing_index_and_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::file(dir.path().join("db"), "reviews");
        let source = CorpusSource::new(dir.path().join("absent.csv"), "title");
        let err = VectorIndex::open_or_build(&mut store, &KeywordEmbedder::new(), &source)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexMissing);
        assert!(err.message().contains("absent.csv"));
    }

    #[tokio::test]
    async fn test_manifest_without_entries_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path());
        let db = dir.path().join("db");
        let mut store = Store::file(&db, "reviews");
        VectorIndex::open_or_build(&mut store, &KeywordEmbedder::new(), &source).await.unwrap();

        std::fs::remove_file(db.join("reviews.entries.json")).unwrap();
        let store = Store::file(&db, "reviews");
        let err = VectorIndex::load(&store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailed);
        assert!(err.message().contains("entries is missing"));
    }

    #[tokio::test]
    async fn test_rebuild_replaces_entries() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path());
        let embedder = KeywordEmbedder::new();
        let mut store = Store::memory("reviews");
        VectorIndex::open_or_build(&mut store, &embedder, &source).await.unwrap();

        std::fs::write(&source.path, "title\nOnly laptop\n").unwrap();
        let index = VectorIndex::rebuild(&mut store, &embedder, &source).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(VectorIndex::load(&store).unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path());
        let embedder = KeywordEmbedder::new();
        let mut store = Store::memory("reviews");
        let (index, _) = VectorIndex::open_or_build(&mut store, &embedder, &source)
            .await
            .unwrap();

        let query = embedder.vector("best lightweight laptop");
        let hits = index.search(&query, 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].entry.text, "UltraBook Air 13 lightweight laptop");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let all = index.search(&query, 10).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_ties_break_by_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.csv");
        std::fs::write(&path, "title\nmouse\nmouse\nmouse\n").unwrap();
        let source = CorpusSource::new(path, "title");
        let embedder = KeywordEmbedder::new();
        let mut store = Store::memory("reviews");
        let (index, _) = VectorIndex::open_or_build(&mut store, &embedder, &source)
            .await
            .unwrap();

        let hits = index.search(&embedder.vector("mouse"), 2).unwrap();
        let rows: Vec<usize> = hits.iter().map(|h| h.entry.row).collect();
        assert_eq!(rows, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_corpus(dir.path());
        let mut store = Store::memory("reviews");
        let (index, _) = VectorIndex::open_or_build(&mut store, &KeywordEmbedder::new(), &source)
            .await
            .unwrap();
        let err = index.search(&[1.0, 2.0], 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
