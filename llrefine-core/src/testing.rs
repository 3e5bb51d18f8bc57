//! Deterministic in-process backends for unit tests.

use crate::provider::{Embedder, ProviderError};
use std::sync::atomic::{AtomicUsize, Ordering};

const VOCABULARY: &[&str] = &[
    "laptop", "lightweight", "ultrabook", "air", "gaming", "desktop", "tower", "budget", "mouse",
    "wireless", "best",
];

/// Bag-of-words embedder over a fixed vocabulary
#[derive(Debug, Default)]
pub(crate) struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; VOCABULARY.len()];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .map(|t| t.to_lowercase())
        {
            if let Some(slot) = VOCABULARY.iter().position(|w| *w == token) {
                vector[slot] += 1.0;
            }
        }
        vector
    }
}

impl Embedder for KeywordEmbedder {
    fn embedding_model(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }
}
