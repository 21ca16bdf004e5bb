//! Transformer layer from a grid model export.
//!
//! Each row carries a WKT `LINESTRING` between the two buses of the
//! transformer; the marker sits halfway between its first and last vertex.
//! Exports written without quoting split the WKT text over the following
//! unnamed columns, which are joined back before parsing.

use std::path::Path;
use std::sync::OnceLock;

use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{InputConfig, TransformerColumns};
use crate::core::loaders::{self, CapacityTable, SchemaError};
use crate::core::records::{GeoPoint, TransformerRecord};

use super::ingestion::{required_number, DecimalSeparator, DropReport, RowError};

/// Selection over a transformer set. Empty criteria select everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformerFilter {
    /// Case-insensitive substring of the transformer ID
    #[serde(default)]
    pub id_contains: Option<String>,

    /// Keep transformers with either bus at one of these levels, in kV
    #[serde(default)]
    pub voltages_kv: Vec<f64>,

    /// Minimum rating in MVA; unrated transformers fail it
    #[serde(default)]
    pub min_rating_mva: Option<f64>,
}

impl TransformerFilter {
    pub fn matches(&self, record: &TransformerRecord) -> bool {
        let id_ok = match self.id_contains.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => record
                .transformer_id
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        };

        let voltage_ok = self.voltages_kv.is_empty()
            || self.voltages_kv.iter().any(|&kv| record.has_voltage(kv));

        let rating_ok = match self.min_rating_mva {
            Some(min) => record.s_nom_mva.is_some_and(|mva| mva >= min),
            None => true,
        };

        id_ok && voltage_ok && rating_ok
    }
}

/// Outcome of one transformer file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformerReport {
    /// Records that survived ingestion, before filtering
    pub loaded: usize,
    pub dropped: DropReport,
    /// Distinct bus voltages of the loaded records, ascending
    pub voltage_levels: Vec<f64>,
}

/// A transformer ready to be drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformerMarker {
    pub position: GeoPoint,
    pub transformer_id: String,
    /// Tooltip text
    pub tooltip: String,
    /// Multi-line popup text
    pub label: String,
    pub voltage_bus0_kv: Option<f64>,
    pub voltage_bus1_kv: Option<f64>,
    pub s_nom_mva: Option<f64>,
}

fn linestring_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^\s*LINESTRING\s*(?:Z\s*)?\(\s*(.*?)\s*\)\s*$").expect("valid WKT pattern")
    })
}

/// Vertices of a WKT `LINESTRING`, or `None` when it is malformed, has
/// fewer than two vertices or leaves the WGS84 ranges.
///
/// Surrounding quotes are ignored.
pub fn parse_wkt_linestring(text: &str) -> Option<Vec<GeoPoint>> {
    let unquoted = text.trim().trim_matches(|c| c == '\'' || c == '"');
    let body = linestring_pattern().captures(unquoted)?.get(1)?.as_str();

    let vertices = body
        .split(',')
        .map(|pair| {
            let mut parts = pair.split_whitespace();
            let lon: f64 = parts.next()?.parse().ok()?;
            let lat: f64 = parts.next()?.parse().ok()?;
            let point = GeoPoint::new(lat, lon);
            point.is_valid().then_some(point)
        })
        .collect::<Option<Vec<_>>>()?;

    (vertices.len() >= 2).then_some(vertices)
}

fn is_continuation(headers: &[String], index: usize, continuation: &str) -> bool {
    match headers.get(index) {
        None => true,
        Some(header) => {
            header.is_empty() || header == continuation || header.starts_with("Unnamed:")
        }
    }
}

/// Geometry cell joined with the unnamed cells it was split into.
fn geometry_text(
    table: &CapacityTable,
    record: &csv::StringRecord,
    geometry_idx: usize,
    continuation: &str,
) -> String {
    let mut text = record.get(geometry_idx).unwrap_or("").to_string();
    let mut index = geometry_idx.saturating_add(1);

    while !text.contains(')') && index < record.len() && is_continuation(&table.headers, index, continuation)
    {
        text.push(',');
        text.push_str(record.get(index).unwrap_or(""));
        index += 1;
    }

    text
}

fn optional_text(record: &csv::StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn optional_number(
    record: &csv::StringRecord,
    index: Option<usize>,
    decimal: DecimalSeparator,
    line: u64,
    field: &'static str,
) -> Result<Option<f64>, RowError> {
    optional_text(record, index)
        .map(|value| required_number(&value, decimal, line, field))
        .transpose()
}

struct ColumnIndices {
    id: Option<usize>,
    geometry: usize,
    bus0: Option<usize>,
    bus1: Option<usize>,
    voltage_bus0: Option<usize>,
    voltage_bus1: Option<usize>,
    s_nom: Option<usize>,
}

fn parse_transformer_row(
    table: &CapacityTable,
    record: &csv::StringRecord,
    line: u64,
    indices: &ColumnIndices,
    columns: &TransformerColumns,
    decimal: DecimalSeparator,
) -> Result<TransformerRecord, RowError> {
    let wkt = geometry_text(table, record, indices.geometry, &columns.geometry_continuation);
    let vertices = parse_wkt_linestring(&wkt).ok_or_else(|| RowError::InvalidGeometry {
        line,
        value: wkt.trim().to_string(),
    })?;

    Ok(TransformerRecord {
        transformer_id: optional_text(record, indices.id).unwrap_or_default(),
        bus0: optional_text(record, indices.bus0),
        bus1: optional_text(record, indices.bus1),
        voltage_bus0_kv: optional_number(record, indices.voltage_bus0, decimal, line, "voltage_bus0")?,
        voltage_bus1_kv: optional_number(record, indices.voltage_bus1, decimal, line, "voltage_bus1")?,
        s_nom_mva: optional_number(record, indices.s_nom, decimal, line, "s_nom")?,
        start: vertices[0],
        end: vertices[vertices.len() - 1],
        line,
    })
}

/// Type every row of a transformer table.
///
/// # Errors
///
/// [`SchemaError::MissingColumns`] when the ID or geometry column is absent.
/// Rows with a bad geometry or a non-numeric voltage or rating are dropped
/// and counted.
pub fn ingest_transformers(
    table: &CapacityTable,
    columns: &TransformerColumns,
    input: &InputConfig,
) -> Result<(Vec<TransformerRecord>, DropReport), SchemaError> {
    let missing: Vec<String> = [&columns.transformer_id, &columns.geometry]
        .iter()
        .filter(|name| table.column_index(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing));
    }

    let indices = ColumnIndices {
        id: table.column_index(&columns.transformer_id),
        geometry: table.column_index(&columns.geometry).unwrap_or(usize::MAX),
        bus0: table.column_index(&columns.bus0),
        bus1: table.column_index(&columns.bus1),
        voltage_bus0: table.column_index(&columns.voltage_bus0),
        voltage_bus1: table.column_index(&columns.voltage_bus1),
        s_nom: table.column_index(&columns.s_nom),
    };

    let mut records = Vec::with_capacity(table.len());
    let mut dropped = DropReport::default();

    for (i, record) in table.rows.iter().enumerate() {
        let line = record.position().map_or(i as u64 + 2, |p| p.line());

        match parse_transformer_row(table, record, line, &indices, columns, input.decimal_separator) {
            Ok(transformer) => records.push(transformer),
            Err(e) => dropped.record(&e, input.max_drop_samples),
        }
    }

    Ok((records, dropped))
}

/// Load and type a transformer export.
pub fn load_transformers<P: AsRef<Path>>(
    path: P,
    columns: &TransformerColumns,
    input: &InputConfig,
) -> loaders::Result<(Vec<TransformerRecord>, DropReport)> {
    let path = path.as_ref();
    let table = loaders::load_capacity_csv(path, input.delimiter)?;
    let (records, dropped) = ingest_transformers(&table, columns, input)?;

    info!(
        "{}: {} transformers, {} rows dropped",
        path.display(),
        records.len(),
        dropped.total()
    );

    Ok((records, dropped))
}

/// Distinct bus voltages, ascending.
pub fn voltage_levels(records: &[TransformerRecord]) -> Vec<f64> {
    let mut levels: Vec<f64> = records
        .iter()
        .flat_map(|r| [r.voltage_bus0_kv, r.voltage_bus1_kv])
        .flatten()
        .collect();
    levels.sort_by(f64::total_cmp);
    levels.dedup();
    levels
}

/// Keep the transformers matching the filter, in input order.
pub fn filter_transformers(
    records: &[TransformerRecord],
    filter: &TransformerFilter,
) -> Vec<TransformerRecord> {
    records.iter().filter(|r| filter.matches(r)).cloned().collect()
}

fn or_na<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

/// Popup text of one transformer.
pub fn transformer_label(record: &TransformerRecord) -> String {
    [
        format!("Transformer ID: {}", record.transformer_id),
        format!(
            "Bus0: {} ({} kV)",
            or_na(record.bus0.as_deref()),
            or_na(record.voltage_bus0_kv)
        ),
        format!(
            "Bus1: {} ({} kV)",
            or_na(record.bus1.as_deref()),
            or_na(record.voltage_bus1_kv)
        ),
        format!("Rating: {} MVA", or_na(record.s_nom_mva)),
    ]
    .join("\n")
}

pub fn build_transformer_marker(record: &TransformerRecord) -> TransformerMarker {
    let tooltip = if record.transformer_id.is_empty() {
        "Transformer".to_string()
    } else {
        record.transformer_id.clone()
    };

    TransformerMarker {
        position: record.position(),
        transformer_id: record.transformer_id.clone(),
        tooltip,
        label: transformer_label(record),
        voltage_bus0_kv: record.voltage_bus0_kv,
        voltage_bus1_kv: record.voltage_bus1_kv,
        s_nom_mva: record.s_nom_mva,
    }
}
