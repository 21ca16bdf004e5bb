//! Display-ready marker descriptors for capacity records.

use serde::Serialize;
use thiserror::Error;

use crate::core::records::{CapacityRecord, GeoPoint};

/// A record that should never have left ingestion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MissingFieldError {
    #[error("line {line}: {field} is not a finite number")]
    NonFinite { line: u64, field: &'static str },

    #[error("line {line}: substation name is empty")]
    EmptyName { line: u64 },
}

/// Everything a map surface needs to draw one connection point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDescriptor {
    pub position: GeoPoint,
    /// Tooltip text
    pub name: String,
    /// Multi-line popup text
    pub label: String,
    pub voltage_kv: f64,
    pub available_capacity_mw: f64,
    pub occupied_capacity_mw: Option<f64>,
    /// `occupied / (occupied + available) * 100`, when occupancy is known
    pub utilization_pct: Option<f64>,
    /// No usable capacity left
    pub exhausted: bool,
    pub source: Option<String>,
}

fn check_finite(value: f64, line: u64, field: &'static str) -> Result<f64, MissingFieldError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MissingFieldError::NonFinite { line, field })
    }
}

/// Utilization in percent. Zero when the total is not positive.
pub fn utilization_pct(available_mw: f64, occupied_mw: Option<f64>) -> Option<f64> {
    occupied_mw.map(|occupied| {
        let total = occupied + available_mw;
        if total > 0.0 {
            occupied / total * 100.0
        } else {
            0.0
        }
    })
}

fn format_label(record: &CapacityRecord, utilization: Option<f64>, exhausted: bool) -> String {
    let mut lines = vec![record.substation_name.clone()];

    let location: Vec<&str> = [record.province.as_deref(), record.municipality.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !location.is_empty() {
        lines.push(location.join(", "));
    }

    lines.push(format!("Voltage level: {} kV", record.voltage_kv));

    let mut available = format!("Available capacity: {:.1} MW", record.available_capacity_mw);
    if exhausted {
        available.push_str(" (no usable capacity)");
    }
    lines.push(available);

    lines.push(match record.occupied_capacity_mw {
        Some(mw) => format!("Occupied capacity: {:.1} MW", mw),
        None => "Occupied capacity: N/A".to_string(),
    });
    lines.push(match utilization {
        Some(pct) => format!("Utilization: {:.1}%", pct),
        None => "Utilization: N/A".to_string(),
    });

    if let Some(source) = &record.source {
        lines.push(format!("Source: {}", source));
    }

    lines.join("\n")
}

/// Build the marker of one record.
///
/// # Errors
///
/// [`MissingFieldError`] if a required numeric field is not finite or the
/// name is empty. Ingestion rules this out, so an error here is a defect.
pub fn build_marker(record: &CapacityRecord) -> Result<MarkerDescriptor, MissingFieldError> {
    let line = record.line;

    if record.substation_name.trim().is_empty() {
        return Err(MissingFieldError::EmptyName { line });
    }

    let voltage_kv = check_finite(record.voltage_kv, line, "voltage")?;
    let available = check_finite(record.available_capacity_mw, line, "available capacity")?;
    let occupied = record
        .occupied_capacity_mw
        .map(|mw| check_finite(mw, line, "occupied capacity"))
        .transpose()?;
    check_finite(record.latitude, line, "latitude")?;
    check_finite(record.longitude, line, "longitude")?;

    let utilization = utilization_pct(available, occupied);
    let exhausted = available <= 0.0;

    Ok(MarkerDescriptor {
        position: record.position(),
        name: record.substation_name.clone(),
        label: format_label(record, utilization, exhausted),
        voltage_kv,
        available_capacity_mw: available,
        occupied_capacity_mw: occupied,
        utilization_pct: utilization,
        exhausted,
        source: record.source.clone(),
    })
}

/// Build the markers of a whole record set, stopping at the first defect.
pub fn build_markers(records: &[CapacityRecord]) -> Result<Vec<MarkerDescriptor>, MissingFieldError> {
    records.iter().map(build_marker).collect()
}
