//! Inclusive range filtering of capacity records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::records::CapacityRecord;

/// Errors that can occur when building filter ranges.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Inverted range: min {min} is greater than max {max}")]
    InvertedRange { min: f64, max: f64 },

    #[error("Range bound is not a number")]
    NotANumber,
}

/// Unchecked bounds as written in a configuration file.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RangeBounds {
    pub min: f64,
    pub max: f64,
}

impl TryFrom<RangeBounds> for NumericRange {
    type Error = FilterError;

    fn try_from(bounds: RangeBounds) -> Result<Self, Self::Error> {
        NumericRange::new(bounds.min, bounds.max)
    }
}

/// Closed interval `[min, max]`.
///
/// Deserialization goes through [`NumericRange::new`], so an inverted range
/// in a configuration file is rejected when the file is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RangeBounds")]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    /// Create a range, rejecting NaN bounds and `min > max`.
    pub fn new(min: f64, max: f64) -> Result<Self, FilterError> {
        if min.is_nan() || max.is_nan() {
            return Err(FilterError::NotANumber);
        }
        if min > max {
            return Err(FilterError::InvertedRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Range that contains every finite value.
    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// Both bounds are inclusive.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    /// Replace the bounds that are given, keeping the others.
    pub fn with_bounds(&self, min: Option<f64>, max: Option<f64>) -> Result<Self, FilterError> {
        Self::new(min.unwrap_or(self.min), max.unwrap_or(self.max))
    }
}

/// Voltage and available-capacity ranges applied together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterRanges {
    pub voltage_kv: NumericRange,
    pub available_capacity_mw: NumericRange,
}

impl Default for FilterRanges {
    fn default() -> Self {
        Self {
            voltage_kv: NumericRange::unbounded(),
            available_capacity_mw: NumericRange::unbounded(),
        }
    }
}

impl FilterRanges {
    /// The domain spanned by a record set: `[floor(min), ceil(max)]` for
    /// each field. `None` for an empty set.
    pub fn spanning(records: &[CapacityRecord]) -> Option<Self> {
        let first = records.first()?;

        let mut voltage = (first.voltage_kv, first.voltage_kv);
        let mut capacity = (first.available_capacity_mw, first.available_capacity_mw);

        for record in &records[1..] {
            voltage.0 = voltage.0.min(record.voltage_kv);
            voltage.1 = voltage.1.max(record.voltage_kv);
            capacity.0 = capacity.0.min(record.available_capacity_mw);
            capacity.1 = capacity.1.max(record.available_capacity_mw);
        }

        Some(Self {
            voltage_kv: NumericRange {
                min: voltage.0.floor(),
                max: voltage.1.ceil(),
            },
            available_capacity_mw: NumericRange {
                min: capacity.0.floor(),
                max: capacity.1.ceil(),
            },
        })
    }

    /// Configured ranges where given, the spanning domain elsewhere.
    pub fn resolve(
        voltage_kv: Option<NumericRange>,
        available_capacity_mw: Option<NumericRange>,
        records: &[CapacityRecord],
    ) -> Self {
        let spanning = Self::spanning(records).unwrap_or_default();

        Self {
            voltage_kv: voltage_kv.unwrap_or(spanning.voltage_kv),
            available_capacity_mw: available_capacity_mw.unwrap_or(spanning.available_capacity_mw),
        }
    }

    #[inline]
    pub fn contains(&self, record: &CapacityRecord) -> bool {
        self.voltage_kv.contains(record.voltage_kv)
            && self.available_capacity_mw.contains(record.available_capacity_mw)
    }
}

/// Keep the records inside both ranges, in input order.
pub fn filter_records(records: &[CapacityRecord], ranges: &FilterRanges) -> Vec<CapacityRecord> {
    records
        .iter()
        .filter(|record| ranges.contains(record))
        .cloned()
        .collect()
}
