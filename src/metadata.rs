use crate::error::{FinderError, Result};
use crate::title::{file_name, parse_title};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Columns every metadata table must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["image_path", "artist", "genre", "title"];

/// Catalog entry for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub image_path: String,
    pub artist: String,
    pub genre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl MetadataRecord {
    /// The stored title if it has any content, otherwise one parsed from the file name.
    #[must_use]
    pub fn display_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_owned(),
            _ => parse_title(file_name(&self.image_path)),
        }
    }
}

/// Read a CSV metadata table with a header row.
///
/// Every column in [`REQUIRED_COLUMNS`] must be present, otherwise the whole table
/// is rejected. Extra columns are ignored and blank titles become `None`.
pub fn read_metadata_table(path: impl AsRef<Path>) -> Result<Vec<MetadataRecord>> {
    let path = path.as_ref();
    info!("Reading metadata CSV: {}", path.display());
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(FinderError::MissingColumns(missing));
    }

    let mut rows = Vec::new();
    for record in reader.deserialize::<MetadataRecord>() {
        let mut record = record?;
        if record.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            record.title = None;
        }
        rows.push(record);
    }
    info!("Total rows in CSV: {}", rows.len());
    Ok(rows)
}
