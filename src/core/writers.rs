//! Data writers for map layer outputs.
//!
//! This module provides functions for writing session results:
//! - A single JSON document with the map centre, tile layers and one
//!   GeoJSON FeatureCollection per layer
//! - CSV with one row per capacity marker

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{json, Value};
use thiserror::Error;

use super::records::InfrastructureFeature;
use crate::processors::infrastructure::substation_label;
use crate::processors::markers::MarkerDescriptor;
use crate::processors::pipeline::{MapLayers, StyledLine};
use crate::processors::transformers::TransformerMarker;

/// Marker colour with usable capacity left.
const MARKER_COLOR: &str = "red";

/// Marker colour when no usable capacity is left.
const EXHAUSTED_MARKER_COLOR: &str = "darkred";

const SUBSTATION_COLOR: &str = "blue";

const TRANSFORMER_COLOR: &str = "purple";

/// Output failure, with the path involved.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("JSON write error for '{path}': {source}")]
    JsonError {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn feature_collection(features: Vec<Value>) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

fn marker_feature(marker: &MarkerDescriptor) -> Value {
    let color = if marker.exhausted {
        EXHAUSTED_MARKER_COLOR
    } else {
        MARKER_COLOR
    };

    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": marker.position.to_lon_lat(),
        },
        "properties": {
            "name": marker.name,
            "label": marker.label,
            "voltage_kv": marker.voltage_kv,
            "available_capacity_mw": marker.available_capacity_mw,
            "occupied_capacity_mw": marker.occupied_capacity_mw,
            "utilization_pct": marker.utilization_pct,
            "exhausted": marker.exhausted,
            "source": marker.source,
            "color": color,
        },
    })
}

fn substation_feature(feature: &InfrastructureFeature) -> Value {
    let coordinates = feature.point().map(|p| p.to_lon_lat());

    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": coordinates,
        },
        "properties": {
            "name": feature.name,
            "label": substation_label(feature),
            "voltage": feature.voltage_raw,
            "voltage_kv": feature.voltage_kv,
            "operator": feature.operator,
            "osm_id": feature.osm_id,
            "color": SUBSTATION_COLOR,
        },
    })
}

fn line_feature(line: &StyledLine) -> Value {
    let coordinates: Vec<[f64; 2]> = line
        .feature
        .positions()
        .iter()
        .map(|p| p.to_lon_lat())
        .collect();

    json!({
        "type": "Feature",
        "geometry": {
            "type": "LineString",
            "coordinates": coordinates,
        },
        "properties": {
            "name": line.feature.name,
            "label": line.label,
            "voltage": line.feature.voltage_raw,
            "voltage_kv": line.feature.voltage_kv,
            "color": line.style.color,
            "weight": line.style.weight,
            "opacity": line.style.opacity,
        },
    })
}

fn transformer_feature(transformer: &TransformerMarker) -> Value {
    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": transformer.position.to_lon_lat(),
        },
        "properties": {
            "transformer_id": transformer.transformer_id,
            "tooltip": transformer.tooltip,
            "label": transformer.label,
            "voltage_bus0_kv": transformer.voltage_bus0_kv,
            "voltage_bus1_kv": transformer.voltage_bus1_kv,
            "s_nom_mva": transformer.s_nom_mva,
            "color": TRANSFORMER_COLOR,
        },
    })
}

/// Build the map document of a session.
///
/// The document holds `center`, `tiles`, one collection per layer and the
/// layer errors of the run.
pub fn map_document(layers: &MapLayers) -> Value {
    let errors: Vec<String> = layers.errors.iter().map(|e| e.to_string()).collect();

    json!({
        "center": layers.center,
        "tiles": layers.tiles,
        "markers": feature_collection(layers.markers.iter().map(marker_feature).collect()),
        "substations": feature_collection(layers.substations.iter().map(substation_feature).collect()),
        "lines": feature_collection(layers.lines.iter().map(line_feature).collect()),
        "transformers": feature_collection(layers.transformers.iter().map(transformer_feature).collect()),
        "errors": errors,
    })
}

/// Write the map document of a session as pretty-printed JSON.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `layers` - Layers built by [`crate::processors::pipeline::run_session`]
///
/// # Example
///
/// ```no_run
/// use grid_screening::config::PipelineConfig;
/// use grid_screening::core::writers::write_map_json;
/// use grid_screening::processors::pipeline::{run_session, Session};
/// use std::path::Path;
///
/// let layers = run_session(&Session::default(), &PipelineConfig::default());
/// write_map_json(Path::new("map.json"), &layers).unwrap();
/// ```
pub fn write_map_json(path: &Path, layers: &MapLayers) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    serde_json::to_writer_pretty(&mut writer, &map_document(layers)).map_err(|e| {
        WriteError::JsonError {
            path: path_str.clone(),
            source: e,
        }
    })?;

    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

fn optional_number(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_default()
}

/// Write markers to CSV, one row per marker.
///
/// Columns: name, latitude, longitude, voltage_kv, available_capacity_mw,
/// occupied_capacity_mw, utilization_pct, exhausted, source. Unknown values
/// are left empty.
pub fn write_markers_csv(path: &Path, markers: &[MarkerDescriptor]) -> Result<()> {
    ensure_parent_dirs(path)?;

    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();

    csv_writer
        .write_record([
            "name",
            "latitude",
            "longitude",
            "voltage_kv",
            "available_capacity_mw",
            "occupied_capacity_mw",
            "utilization_pct",
            "exhausted",
            "source",
        ])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for marker in markers {
        csv_writer
            .write_record(&[
                marker.name.clone(),
                format!("{:.6}", marker.position.latitude),
                format!("{:.6}", marker.position.longitude),
                marker.voltage_kv.to_string(),
                format!("{:.3}", marker.available_capacity_mw),
                optional_number(marker.occupied_capacity_mw, 3),
                optional_number(marker.utilization_pct, 1),
                marker.exhausted.to_string(),
                marker.source.clone().unwrap_or_default(),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
