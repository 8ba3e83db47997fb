use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::models::StationMetadataRow;
use crate::utils::normalize_id;

/// Bulk lookup of station metadata by id.
///
/// Ids the store does not know are simply absent from the result.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn bulk_fetch(&self, ids: &[String]) -> Result<Vec<StationMetadataRow>>;
}

/// Station table kept as a CSV file with `station_id,lon,lat,elevation` columns.
///
/// The file is re-read on every fetch so edits are picked up without a restart.
pub struct CsvMetadataStore {
    path: PathBuf,
    delimiter: u8,
}

impl CsvMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every row of the table; rows that do not deserialize are skipped.
    pub fn parse_rows(&self, text: &str) -> Result<Vec<StationMetadataRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for (line, result) in reader.deserialize::<StationMetadataRow>().enumerate() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => debug!(line = line + 2, error = %e, "Skipping malformed station row"),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl MetadataStore for CsvMetadataStore {
    async fn bulk_fetch(&self, ids: &[String]) -> Result<Vec<StationMetadataRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let text = tokio::fs::read_to_string(&self.path).await?;
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let rows: Vec<StationMetadataRow> = self
            .parse_rows(&text)?
            .into_iter()
            .filter(|row| {
                normalize_id(&row.station_id)
                    .map(|id| wanted.contains(id.as_str()))
                    .unwrap_or(false)
            })
            .collect();

        debug!(
            path = %self.path.display(),
            requested = ids.len(),
            returned = rows.len(),
            "Fetched station metadata"
        );
        Ok(rows)
    }
}
