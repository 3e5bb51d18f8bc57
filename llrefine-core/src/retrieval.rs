//! Top-k retrieval over a [`VectorIndex`].

use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::provider::Embedder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default number of records returned per query
pub const DEFAULT_K: usize = 3;

/// One nearest-neighbor result, produced fresh per query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedRecord {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub score: f32,
}

impl fmt::Display for RetrievedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.text)?;
        if !self.metadata.is_empty() {
            let fields: Vec<String> = self
                .metadata
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        write!(f, " score={:.3}", self.score)
    }
}

/// Embeds queries and looks them up in an index
pub struct Retriever<E: Embedder> {
    embedder: E,
    index: VectorIndex,
    k: usize,
}

impl<E: Embedder> Retriever<E> {
    pub fn new(embedder: E, index: VectorIndex) -> Self {
        Self {
            embedder,
            index,
            k: DEFAULT_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::invalid_argument("k must be at least 1").with_operation("retriever::with_k"));
        }
        self.k = k;
        Ok(self)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Records most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedRecord>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| e.into_error("retriever::embed"))?;

        let hits = self.index.search(&vector, self.k)?;
        tracing::debug!(query_chars = query.len(), hits = hits.len(), "retrieved records");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedRecord {
                id: hit.entry.id.clone(),
                text: hit.entry.text.clone(),
                metadata: hit.entry.metadata.clone(),
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CorpusSource;
    use crate::storage::Store;
    use crate::testing::KeywordEmbedder;
    use llrefine_error::ErrorKind;

    async fn build_retriever(csv: &str) -> (tempfile::TempDir, Retriever<KeywordEmbedder>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        std::fs::write(&path, csv).unwrap();
        let embedder = KeywordEmbedder::new();
        let mut store = Store::memory("reviews");
        let (index, _) = VectorIndex::open_or_build(&mut store, &embedder, &CorpusSource::new(path, "title"))
            .await
            .unwrap();
        (dir, Retriever::new(embedder, index))
    }

    #[tokio::test]
    async fn test_best_lightweight_laptop() {
        let (_dir, retriever) = build_retriever(
            "title,rating\n\
             Gaming tower desktop,4.1\n\
             UltraBook Air 13 lightweight laptop,4.7\n\
             Budget laptop,3.2\n\
             Wireless mouse,4.0\n\
             Gaming laptop,3.9\n",
        )
        .await;

        let records = retriever.retrieve("best lightweight laptop").await.unwrap();
        assert_eq!(records.len(), DEFAULT_K);
        assert_eq!(records[0].text, "UltraBook Air 13 lightweight laptop");
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].metadata.get("rating").map(String::as_str), Some("4.7"));
        assert!(records.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_k_limits_results() {
        let (_dir, retriever) = build_retriever("title\nlaptop\nmouse\n").await;
        let retriever = retriever.with_k(1).unwrap();
        assert_eq!(retriever.retrieve("laptop").await.unwrap().len(), 1);

        let (_dir, retriever) = build_retriever("title\nlaptop\n").await;
        let err = retriever.with_k(0).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_display() {
        let record = RetrievedRecord {
            id: "0".into(),
            text: "UltraBook Air 13".into(),
            metadata: BTreeMap::from([("rating".to_string(), "N/A".to_string())]),
            score: 0.5,
        };
        assert_eq!(record.to_string(), "[0] UltraBook Air 13 (rating=N/A) score=0.500");
    }
}
