//! Tabular corpus loading.
//!
//! Each CSV row becomes one [`CorpusRecord`]: the designated text column is the
//! retrievable text and every other column is carried as metadata.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Metadata value used when the corpus has no `rating` column
pub const MISSING_RATING: &str = "N/A";

/// One row of the source table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    /// Zero-based data row index
    pub row: usize,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl CorpusRecord {
    /// Stable id used in the index
    pub fn id(&self) -> String {
        self.row.to_string()
    }
}

/// Load every row of a CSV file with a header row.
pub fn load_csv(path: impl AsRef<Path>, text_column: &str) -> Result<Vec<CorpusRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        Error::from(e)
            .with_operation("corpus::load")
            .with_context("path", path.display().to_string())
    })?;
    let records = read_csv(file, text_column)
        .map_err(|e| e.with_context("path", path.display().to_string()))?;

    tracing::debug!(path = %path.display(), rows = records.len(), "corpus loaded");
    Ok(records)
}

/// Parse CSV from any reader.
pub fn read_csv<R: Read>(reader: R, text_column: &str) -> Result<Vec<CorpusRecord>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| csv_error("failed to read header row", e))?
        .clone();
    let text_index = headers.iter().position(|h| h == text_column).ok_or_else(|| {
        Error::corpus_invalid(format!(
            "text column '{}' not found (columns: {})",
            text_column,
            headers.iter().collect::<Vec<_>>().join(", ")
        ))
        .with_operation("corpus::load")
    })?;
    let has_rating = headers.iter().any(|h| h == "rating");

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| csv_error(&format!("malformed row {}", row), e))?;

        let mut metadata = BTreeMap::new();
        for (i, (name, value)) in headers.iter().zip(record.iter()).enumerate() {
            if i != text_index {
                metadata.insert(name.to_string(), value.to_string());
            }
        }
        if !has_rating {
            metadata.insert("rating".to_string(), MISSING_RATING.to_string());
        }

        records.push(CorpusRecord {
            row,
            text: record.get(text_index).unwrap_or_default().to_string(),
            metadata,
        });
    }

    Ok(records)
}

fn csv_error(what: &str, err: csv::Error) -> Error {
    Error::corpus_invalid(format!("{}: {}", what, err))
        .with_operation("corpus::load")
        .set_source(err)
}
