//! Data loaders for capacity exports and GeoJSON collaborators.
//!
//! This module provides readers for:
//! - Delimited capacity exports with a header row (one connection point per row)
//! - GeoJSON feature collections of OpenStreetMap substations and lines
//!
//! Loaders only read; schema validation and typing happen in
//! [`crate::processors::ingestion`] and [`crate::processors::infrastructure`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, StringRecord};
use log::debug;
use serde::Deserialize;
use thiserror::Error;

/// A required column or property is absent. Fatal for the affected dataset only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("not a GeoJSON FeatureCollection")]
    NotFeatureCollection,
}

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid delimiter {0:?}: must be a single-byte character")]
    InvalidDelimiter(char),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Raw rows of a capacity export, headers kept as written.
#[derive(Debug, Clone)]
pub struct CapacityTable {
    /// Header names, trimmed
    pub headers: Vec<String>,
    /// Data rows in file order
    pub rows: Vec<StringRecord>,
    /// File name used to tag records when several exports are combined
    pub source: Option<String>,
}

impl CapacityTable {
    /// Index of the column with the given header, if present.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        let wanted = header.trim();
        self.headers.iter().position(|h| h == wanted)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn delimiter_byte(delimiter: char) -> Result<u8> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(LoaderError::InvalidDelimiter(delimiter))
    }
}

/// Decode a field as UTF-8, or as Latin-1 when it is not valid UTF-8.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn decode_record(record: ByteRecord) -> StringRecord {
    match StringRecord::from_byte_record(record) {
        Ok(decoded) => decoded,
        Err(e) => {
            let bytes = e.into_byte_record();
            let mut decoded: StringRecord = bytes.iter().map(decode_field).collect();
            decoded.set_position(bytes.position().cloned());
            debug!(
                "Line {}: non UTF-8 field read as Latin-1",
                bytes.position().map_or(0, |p| p.line())
            );
            decoded
        }
    }
}

/// Read a capacity table from any reader.
///
/// Headers must be UTF-8. Data fields that are not are read as Latin-1, the
/// usual encoding of spreadsheet exports, so one such row never fails the
/// table. Returns an empty table (no error) when the input has no data rows;
/// use [`load_capacity_csv`] for file inputs, which rejects empty files.
pub fn read_capacity_table<R: Read>(reader: R, delimiter: char) -> Result<CapacityTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter_byte(delimiter)?)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let name = if i == 0 { name.trim_start_matches('\u{feff}') } else { name };
            name.trim().to_string()
        })
        .collect();

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = decode_record(result?);
        // Trailing blank lines show up as single empty fields
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        rows.push(record);
    }

    Ok(CapacityTable {
        headers,
        rows,
        source: None,
    })
}

/// Load a capacity export from a delimited text file.
///
/// # Errors
///
/// Returns [`LoaderError::EmptyFile`] when the file has no header or no data
/// rows, and IO/CSV errors when it cannot be read.
pub fn load_capacity_csv<P: AsRef<Path>>(path: P, delimiter: char) -> Result<CapacityTable> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut table = read_capacity_table(BufReader::new(file), delimiter)?;

    if table.headers.iter().all(|h| h.is_empty()) || table.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    table.source = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string());

    Ok(table)
}

/// Geometry object as written in the collaborator file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGeometry {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub coordinates: serde_json::Value,
}

/// Feature as written in the collaborator file; nothing is validated yet.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RawFeatureCollection {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    features: Option<Vec<RawFeature>>,
}

/// Parse a GeoJSON FeatureCollection from a string.
pub fn parse_feature_collection(content: &str) -> Result<Vec<RawFeature>> {
    let collection: RawFeatureCollection = serde_json::from_str(content)?;

    match (collection.kind.as_deref(), collection.features) {
        (Some("FeatureCollection"), Some(features)) => Ok(features),
        _ => Err(SchemaError::NotFeatureCollection.into()),
    }
}

/// Load a GeoJSON FeatureCollection from a file.
pub fn load_feature_collection<P: AsRef<Path>>(path: P) -> Result<Vec<RawFeature>> {
    let content = std::fs::read_to_string(path)?;
    parse_feature_collection(&content)
}
