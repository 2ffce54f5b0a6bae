//! # Catalog loader
//!
//! Turns the raw anime catalog CSV into the processed CSV the index is built from.
//!
//! Each surviving row becomes a [`ProcessedRecord`] whose `combined_info` reads
//! `Title: … Overview: … Genres: …` with all whitespace runs collapsed. Rows without
//! a usable title or synopsis are dropped. The output is fully determined by the
//! input, so running the loader twice yields byte-identical files.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

// The public anime dataset uses this sentence for titles without a synopsis.
static PLACEHOLDER_SYNOPSIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^no synopsis (information )?(has been added|yet)").expect("valid regex"));

/// Header names accepted for each required column, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct ColumnNames {
    pub title: Vec<String>,
    pub synopsis: Vec<String>,
    pub genres: Vec<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            title: owned(&["Name", "title", "English name"]),
            // "sypnopsis" is how the upstream dataset spells it.
            synopsis: owned(&["sypnopsis", "synopsis", "overview"]),
            genres: owned(&["Genres", "genre"]),
        }
    }
}

/// One cleaned catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub title: String,
    pub combined_info: String,
}

impl ProcessedRecord {
    /// Build a record from raw fields, or `None` when the row is unusable.
    pub fn from_fields(title: &str, synopsis: &str, genres: &str) -> Option<Self> {
        let title = normalize(title);
        let synopsis = normalize(synopsis);
        if title.is_empty() || synopsis.is_empty() || PLACEHOLDER_SYNOPSIS.is_match(&synopsis) {
            return None;
        }
        let genres = match normalize(genres) {
            g if g.is_empty() => "Unknown".to_string(),
            g => g,
        };

        let combined_info = format!("Title: {title} Overview: {synopsis} Genres: {genres}");
        Some(Self {
            title,
            combined_info,
        })
    }
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Loader for one raw catalog file.
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    raw_path: PathBuf,
    out_path: PathBuf,
    columns: ColumnNames,
}

impl CatalogLoader {
    pub fn new(raw_path: impl Into<PathBuf>, out_path: impl Into<PathBuf>) -> Self {
        Self {
            raw_path: raw_path.into(),
            out_path: out_path.into(),
            columns: ColumnNames::default(),
        }
    }

    pub fn with_columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }

    /// Read the raw catalog, clean it and overwrite the processed file.
    ///
    /// # Returns
    /// The path of the processed file.
    ///
    /// # Errors
    /// [`Error::DataLoad`] if the input is missing, not valid CSV, or lacks a
    /// required column; also when the output cannot be written.
    pub fn load_and_process(&self) -> Result<PathBuf> {
        info!("Loading raw catalog from {}", self.raw_path.display());
        let records = self.read_records().inspect_err(|e| error!("{e}"))?;
        self.write_records(&records).inspect_err(|e| error!("{e}"))?;
        info!(
            "Wrote {} processed records to {}",
            records.len(),
            self.out_path.display()
        );
        Ok(self.out_path.clone())
    }

    fn read_records(&self) -> Result<Vec<ProcessedRecord>> {
        let file = File::open(&self.raw_path).map_err(|e| Error::data_load(&self.raw_path, e))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| Error::data_load(&self.raw_path, e))?
            .clone();
        let find = |candidates: &[String], what: &str| {
            headers
                .iter()
                .position(|h| candidates.iter().any(|c| c.eq_ignore_ascii_case(h.trim())))
                .ok_or_else(|| {
                    Error::data_load(&self.raw_path, format!("missing {what} column"))
                })
        };
        let title_col = find(&self.columns.title, "title")?;
        let synopsis_col = find(&self.columns.synopsis, "synopsis")?;
        let genres_col = find(&self.columns.genres, "genres")?;
        debug!(title_col, synopsis_col, genres_col, "Resolved catalog columns");

        let mut records = Vec::new();
        let mut dropped = 0usize;
        for row in reader.records() {
            let row = row.map_err(|e| Error::data_load(&self.raw_path, e))?;
            let field = |i: usize| row.get(i).unwrap_or_default();
            match ProcessedRecord::from_fields(field(title_col), field(synopsis_col), field(genres_col)) {
                Some(record) => records.push(record),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("Dropped {dropped} rows without a usable title or synopsis");
        }
        Ok(records)
    }

    fn write_records(&self, records: &[ProcessedRecord]) -> Result<()> {
        let parent = match self.out_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| Error::data_load(&self.out_path, e))?;

        let tmp = NamedTempFile::new_in(&parent).map_err(|e| Error::data_load(&self.out_path, e))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            for record in records {
                writer
                    .serialize(record)
                    .map_err(|e| Error::data_load(&self.out_path, e))?;
            }
            // An empty catalog still gets a header row.
            if records.is_empty() {
                writer
                    .write_record(["title", "combined_info"])
                    .map_err(|e| Error::data_load(&self.out_path, e))?;
            }
            writer.flush().map_err(|e| Error::data_load(&self.out_path, e))?;
        }
        // Temp files are owner-only; the published catalog is world-readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))
                .map_err(|e| Error::data_load(&self.out_path, e))?;
        }
        tmp.persist(&self.out_path)
            .map_err(|e| Error::data_load(&self.out_path, e.error))?;
        Ok(())
    }
}

/// Convenience wrapper: `load_and_process(raw_path, out_path) -> out_path`.
pub fn load_and_process(raw_path: impl AsRef<Path>, out_path: impl AsRef<Path>) -> Result<PathBuf> {
    CatalogLoader::new(raw_path.as_ref(), out_path.as_ref()).load_and_process()
}

/// Read a processed catalog back, in file order.
pub fn read_processed(path: &Path) -> std::result::Result<Vec<ProcessedRecord>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    reader.deserialize().collect()
}
