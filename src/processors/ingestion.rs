//! Capacity row ingestion: schema validation, typing and reprojection.
//!
//! Loosely typed spreadsheet columns are mapped through a [`ColumnMapping`]
//! into [`CapacityRecord`]s before any downstream logic runs. Missing
//! required columns fail the whole dataset; a bad cell or coordinate only
//! drops its row.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ColumnMapping, InputConfig};
use crate::core::loaders::{self, CapacityTable, LoaderError, SchemaError};
use crate::core::records::CapacityRecord;
use crate::core::transforms::{utm30_to_wgs84, CoordinateError};

/// Row-level failure. The row is dropped and counted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("line {line}: {field} value {value:?} is not a finite number")]
    InvalidNumber {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: substation name is empty")]
    EmptyName { line: u64 },

    #[error("line {line}: geometry {value:?} is not a LINESTRING with two valid vertices")]
    InvalidGeometry { line: u64, value: String },

    #[error("line {line}: {source}")]
    Coordinate {
        line: u64,
        #[source]
        source: CoordinateError,
    },
}

/// Cells of one row selected by the column mapping, still untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: u64,
    pub source: Option<String>,
    pub projected_x: String,
    pub projected_y: String,
    pub substation_name: String,
    pub voltage_kv: String,
    pub available_capacity_mw: String,
    pub occupied_capacity_mw: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
}

/// A typed row before reprojection.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub line: u64,
    pub source: Option<String>,
    pub substation_name: String,
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub voltage_kv: f64,
    pub available_capacity_mw: f64,
    pub occupied_capacity_mw: Option<f64>,
    pub projected_x: f64,
    pub projected_y: f64,
}

/// Counts of rows dropped during ingestion, with a bounded sample of reasons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DropReport {
    /// Rows whose coordinates or geometry could not be placed
    pub coordinate: usize,
    /// Rows with a non-numeric required cell or a blank name
    pub invalid_field: usize,
    /// First messages, up to the configured sample size
    pub samples: Vec<String>,
}

impl DropReport {
    /// Total number of dropped rows.
    #[inline]
    pub fn total(&self) -> usize {
        self.coordinate + self.invalid_field
    }

    pub(crate) fn record(&mut self, error: &RowError, max_samples: usize) {
        match error {
            RowError::InvalidNumber { .. } | RowError::EmptyName { .. } => self.invalid_field += 1,
            RowError::Coordinate { .. } | RowError::InvalidGeometry { .. } => self.coordinate += 1,
        }
        if self.samples.len() < max_samples {
            self.samples.push(error.to_string());
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: DropReport, max_samples: usize) {
        self.coordinate += other.coordinate;
        self.invalid_field += other.invalid_field;
        let room = max_samples.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
    }
}

/// Records of one or more capacity files plus everything that went wrong.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub records: Vec<CapacityRecord>,
    pub dropped: DropReport,
    /// Files that failed as a whole, as "name: reason"
    pub file_errors: Vec<String>,
}

/// Select the mapped columns of every row.
///
/// # Errors
///
/// [`SchemaError::MissingColumns`] listing every required header that is
/// absent. Optional headers that are absent produce `None` cells.
pub fn ingest_rows(
    table: &CapacityTable,
    mapping: &ColumnMapping,
) -> Result<Vec<RawRow>, SchemaError> {
    let required = [
        &mapping.projected_x,
        &mapping.projected_y,
        &mapping.substation_name,
        &mapping.voltage_kv,
        &mapping.available_capacity_mw,
    ];

    let missing: Vec<String> = required
        .iter()
        .filter(|name| table.column_index(name).is_none())
        .map(|name| name.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing));
    }

    // Presence was checked above
    let idx = |name: &str| table.column_index(name).unwrap_or(usize::MAX);
    let x_idx = idx(&mapping.projected_x);
    let y_idx = idx(&mapping.projected_y);
    let name_idx = idx(&mapping.substation_name);
    let volt_idx = idx(&mapping.voltage_kv);
    let avail_idx = idx(&mapping.available_capacity_mw);
    let occ_idx = table.column_index(&mapping.occupied_capacity_mw);
    let prov_idx = table.column_index(&mapping.province);
    let muni_idx = table.column_index(&mapping.municipality);

    let rows = table
        .rows
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let cell = |index: usize| record.get(index).unwrap_or("").trim().to_string();
            let optional = |index: Option<usize>| {
                index
                    .and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };

            RawRow {
                line: record.position().map_or(i as u64 + 2, |p| p.line()),
                source: table.source.clone(),
                projected_x: cell(x_idx),
                projected_y: cell(y_idx),
                substation_name: cell(name_idx),
                voltage_kv: cell(volt_idx),
                available_capacity_mw: cell(avail_idx),
                occupied_capacity_mw: optional(occ_idx),
                province: optional(prov_idx),
                municipality: optional(muni_idx),
            }
        })
        .collect();

    Ok(rows)
}

/// Decimal mark of numeric cells.
///
/// The other mark is taken as a thousands separator and must group digits
/// by three. Under `Auto`, a cell with both marks uses the last one as the
/// decimal mark, and a single `.` or `,` is always decimal: `"1.234"` reads
/// as 1.234, while `Comma` reads it as 1234.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalSeparator {
    #[default]
    Auto,
    Point,
    Comma,
}

impl DecimalSeparator {
    /// (decimal mark, grouping mark) for one cell.
    fn marks(self, cell: &str) -> (char, char) {
        match self {
            DecimalSeparator::Point => ('.', ','),
            DecimalSeparator::Comma => (',', '.'),
            DecimalSeparator::Auto => {
                match (cell.rfind('.'), cell.rfind(',')) {
                    (Some(point), Some(comma)) if comma > point => (',', '.'),
                    (Some(_), Some(_)) => ('.', ','),
                    (None, Some(_)) if cell.matches(',').count() > 1 => ('.', ','),
                    (None, Some(_)) => (',', '.'),
                    (Some(_), None) if cell.matches('.').count() > 1 => (',', '.'),
                    _ => ('.', ','),
                }
            }
        }
    }

    /// Parse a numeric cell. `None` for blank, non-numeric or non-finite cells.
    pub fn parse(self, raw: &str) -> Option<f64> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (decimal, group) = self.marks(trimmed);
        let (integer, fraction) = match trimmed.rfind(decimal) {
            Some(i) => (&trimmed[..i], Some(&trimmed[i + 1..])),
            None => (trimmed, None),
        };
        if integer.contains(decimal) || fraction.is_some_and(|f| f.contains(group)) {
            return None;
        }

        let mut groups = integer.split(group);
        let mut normalized = groups.next().unwrap_or_default().to_string();
        for digits in groups {
            if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            normalized.push_str(digits);
        }
        if let Some(fraction) = fraction {
            normalized.push('.');
            normalized.push_str(fraction);
        }

        let value: f64 = normalized.parse().ok()?;
        value.is_finite().then_some(value)
    }
}

/// Parse a numeric cell with [`DecimalSeparator::Auto`].
pub fn parse_number(raw: &str) -> Option<f64> {
    DecimalSeparator::Auto.parse(raw)
}

pub(crate) fn required_number(
    raw: &str,
    decimal: DecimalSeparator,
    line: u64,
    field: &'static str,
) -> Result<f64, RowError> {
    decimal.parse(raw).ok_or_else(|| RowError::InvalidNumber {
        line,
        field,
        value: raw.to_string(),
    })
}

/// Type the cells of one row.
///
/// A blank name or a non-numeric required cell rejects the row. Coordinates
/// are passed through unchecked so that non-finite or out-of-domain pairs
/// surface as coordinate drops during reprojection.
pub fn parse_row(raw: &RawRow, decimal: DecimalSeparator) -> Result<ParsedRow, RowError> {
    let line = raw.line;

    if raw.substation_name.trim().is_empty() {
        return Err(RowError::EmptyName { line });
    }

    let occupied_capacity_mw = match &raw.occupied_capacity_mw {
        Some(value) => Some(required_number(value, decimal, line, "occupied capacity")?),
        None => None,
    };

    Ok(ParsedRow {
        line,
        source: raw.source.clone(),
        substation_name: raw.substation_name.clone(),
        province: raw.province.clone(),
        municipality: raw.municipality.clone(),
        voltage_kv: required_number(&raw.voltage_kv, decimal, line, "voltage")?,
        available_capacity_mw: required_number(
            &raw.available_capacity_mw,
            decimal,
            line,
            "available capacity",
        )?,
        occupied_capacity_mw,
        projected_x: decimal.parse(&raw.projected_x).unwrap_or(f64::NAN),
        projected_y: decimal.parse(&raw.projected_y).unwrap_or(f64::NAN),
    })
}

fn reproject_row(row: ParsedRow) -> Result<CapacityRecord, RowError> {
    let position = utm30_to_wgs84(row.projected_x, row.projected_y).map_err(|source| {
        RowError::Coordinate {
            line: row.line,
            source,
        }
    })?;

    Ok(CapacityRecord {
        substation_name: row.substation_name,
        province: row.province,
        municipality: row.municipality,
        voltage_kv: row.voltage_kv,
        available_capacity_mw: row.available_capacity_mw,
        occupied_capacity_mw: row.occupied_capacity_mw,
        projected_x: row.projected_x,
        projected_y: row.projected_y,
        latitude: position.latitude,
        longitude: position.longitude,
        source: row.source,
        line: row.line,
    })
}

/// Type and reproject raw rows, dropping and counting the bad ones.
///
/// Rows are processed in parallel; surviving records keep input order.
pub fn reproject_rows(rows: &[RawRow], input: &InputConfig) -> (Vec<CapacityRecord>, DropReport) {
    let results: Vec<Result<CapacityRecord, RowError>> = rows
        .par_iter()
        .map(|raw| parse_row(raw, input.decimal_separator).and_then(reproject_row))
        .collect();

    let mut records = Vec::with_capacity(results.len());
    let mut report = DropReport::default();

    for result in results {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!("Dropping row: {}", e);
                report.record(&e, input.max_drop_samples);
            }
        }
    }

    (records, report)
}

/// Validate, type and reproject one loaded table.
pub fn ingest_table(
    table: &CapacityTable,
    mapping: &ColumnMapping,
    input: &InputConfig,
) -> Result<(Vec<CapacityRecord>, DropReport), SchemaError> {
    let rows = ingest_rows(table, mapping)?;
    Ok(reproject_rows(&rows, input))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Load and ingest several capacity files.
///
/// Each file is handled independently: a file that cannot be read or lacks
/// required columns is reported in `file_errors` and the others still load.
/// Records are concatenated in input order.
pub fn ingest_files(
    paths: &[PathBuf],
    mapping: &ColumnMapping,
    input: &InputConfig,
) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();

    for path in paths {
        let name = display_name(path);

        let loaded = loaders::load_capacity_csv(path, input.delimiter).and_then(|table| {
            ingest_table(&table, mapping, input).map_err(LoaderError::from)
        });

        match loaded {
            Ok((records, dropped)) => {
                info!(
                    "{}: {} records, {} rows dropped",
                    name,
                    records.len(),
                    dropped.total()
                );
                outcome.records.extend(records);
                outcome.dropped.merge(dropped, input.max_drop_samples);
            }
            Err(e) => {
                warn!("{}: {}", name, e);
                outcome.file_errors.push(format!("{}: {}", name, e));
            }
        }
    }

    if outcome.dropped.total() > 0 {
        warn!(
            "{} rows dropped ({} coordinate, {} invalid field)",
            outcome.dropped.total(),
            outcome.dropped.coordinate,
            outcome.dropped.invalid_field
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::read_capacity_table;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "Nombre Subestación,Provincia,Municipio,Nivel de Tensión (kV),\
Capacidad disponible (MW),Capacidad ocupada (MW),Coordenada UTM X,Coordenada UTM Y";

    fn table(body: &str) -> CapacityTable {
        let data = format!("{}\n{}", HEADER, body);
        read_capacity_table(data.as_bytes(), ',').unwrap()
    }

    fn input(max_drop_samples: usize) -> InputConfig {
        InputConfig {
            max_drop_samples,
            ..InputConfig::default()
        }
    }

    fn raw(x: &str, y: &str, voltage: &str, available: &str, occupied: Option<&str>) -> RawRow {
        RawRow {
            line: 2,
            source: None,
            projected_x: x.to_string(),
            projected_y: y.to_string(),
            substation_name: "ALMARAZ".to_string(),
            voltage_kv: voltage.to_string(),
            available_capacity_mw: available.to_string(),
            occupied_capacity_mw: occupied.map(str::to_string),
            province: None,
            municipality: None,
        }
    }

    #[test]
    fn test_ingest_rows_all_columns() {
        let t = table("ALMARAZ,Cáceres,Almaraz,400,50,150,440290.46,4474257.38\n");
        let rows = ingest_rows(&t, &ColumnMapping::default()).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].substation_name, "ALMARAZ");
        assert_eq!(rows[0].province.as_deref(), Some("Cáceres"));
        assert_eq!(rows[0].occupied_capacity_mw.as_deref(), Some("150"));
        assert_eq!(rows[0].line, 2);
    }

    #[test]
    fn test_ingest_rows_missing_required_columns() {
        let data = "Nombre Subestación,Coordenada UTM X\nA,1\n";
        let t = read_capacity_table(data.as_bytes(), ',').unwrap();

        match ingest_rows(&t, &ColumnMapping::default()) {
            Err(SchemaError::MissingColumns(missing)) => {
                assert_eq!(
                    missing,
                    vec![
                        "Coordenada UTM Y",
                        "Nivel de Tensión (kV)",
                        "Capacidad disponible (MW)"
                    ]
                );
            }
            other => panic!("Expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_ingest_rows_optional_columns_absent() {
        let data = "Nombre Subestación,Nivel de Tensión (kV),Capacidad disponible (MW),\
Coordenada UTM X,Coordenada UTM Y\nA,220,10,440000,4474000\n";
        let t = read_capacity_table(data.as_bytes(), ',').unwrap();
        let rows = ingest_rows(&t, &ColumnMapping::default()).unwrap();

        assert_eq!(rows[0].occupied_capacity_mw, None);
        assert_eq!(rows[0].province, None);
        assert_eq!(rows[0].municipality, None);
    }

    #[test]
    fn test_ingest_rows_blank_optional_cell() {
        let t = table("A,,Almaraz,400,50,,440000,4474000\n");
        let rows = ingest_rows(&t, &ColumnMapping::default()).unwrap();

        assert_eq!(rows[0].province, None);
        assert_eq!(rows[0].occupied_capacity_mw, None);
        assert_eq!(rows[0].municipality.as_deref(), Some("Almaraz"));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 220 "), Some(220.0));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("440290.46"), Some(440290.46));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_parse_number_grouped_thousands() {
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("440.290,46"), Some(440290.46));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("4.474.257"), Some(4474257.0));
        assert_eq!(parse_number("1,234,567"), Some(1234567.0));
        assert_eq!(parse_number("-1.234,5"), Some(-1234.5));

        assert_eq!(parse_number("1,2,3"), None);
        assert_eq!(parse_number("1.23,4.5"), None);
    }

    #[test]
    fn test_parse_number_single_point() {
        // A lone point is decimal unless the export is declared comma-decimal
        assert_eq!(parse_number("1.234"), Some(1.234));
        assert_eq!(DecimalSeparator::Comma.parse("1.234"), Some(1234.0));
        assert_eq!(DecimalSeparator::Comma.parse("12,5"), Some(12.5));
        assert_eq!(DecimalSeparator::Comma.parse("1.234,5"), Some(1234.5));
        assert_eq!(DecimalSeparator::Comma.parse("1,234.5"), None);

        assert_eq!(DecimalSeparator::Point.parse("1,234"), Some(1234.0));
        assert_eq!(DecimalSeparator::Point.parse("12,5"), None);
    }

    #[test]
    fn test_parse_row_empty_name() {
        let mut row = raw("440000", "4474000", "220", "10", None);
        row.substation_name = "   ".to_string();

        assert_eq!(
            parse_row(&row, DecimalSeparator::Auto),
            Err(RowError::EmptyName { line: 2 })
        );
    }

    #[test]
    fn test_blank_name_dropped_and_counted() {
        let t = table(
            "ALMARAZ,,,400,50,,440290.46,4474257.38\n\
             ,,,220,10,,500000,4427757.2187\n\
             BENEJAMA,,,220,0,150,500000,4427757.2187\n",
        );

        let (records, report) = ingest_table(&t, &ColumnMapping::default(), &input(10)).unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.substation_name.as_str()).collect();
        assert_eq!(names, vec!["ALMARAZ", "BENEJAMA"]);
        assert_eq!(report.invalid_field, 1);
        assert_eq!(report.coordinate, 0);
        assert_eq!(report.samples, vec!["line 3: substation name is empty"]);
    }

    #[test]
    fn test_comma_decimal_export() {
        let data = "Nombre Subestación;Nivel de Tensión (kV);Capacidad disponible (MW);\
Coordenada UTM X;Coordenada UTM Y\nALMARAZ;400;1.234,5;440.290,46;4.474.257,38\n";
        let t = read_capacity_table(data.as_bytes(), ';').unwrap();
        let config = InputConfig {
            decimal_separator: DecimalSeparator::Comma,
            ..InputConfig::default()
        };

        let (records, report) = ingest_table(&t, &ColumnMapping::default(), &config).unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(records[0].available_capacity_mw, 1234.5);
        assert!((records[0].latitude - 40.4168).abs() < 1e-5);
    }

    #[test]
    fn test_parse_row_invalid_voltage() {
        let result = parse_row(&raw("440000", "4474000", "abc", "10", None), DecimalSeparator::Auto);
        assert!(matches!(
            result,
            Err(RowError::InvalidNumber { field: "voltage", .. })
        ));
    }

    #[test]
    fn test_parse_row_invalid_occupied() {
        let result = parse_row(
            &raw("440000", "4474000", "220", "10", Some("x")),
            DecimalSeparator::Auto,
        );
        assert!(matches!(
            result,
            Err(RowError::InvalidNumber { field: "occupied capacity", .. })
        ));
    }

    #[test]
    fn test_reproject_rows_drops_and_counts() {
        let rows = vec![
            raw("440290.46", "4474257.38", "400", "50", None),
            raw("500000", "10600000", "220", "0", Some("150")),
            raw("", "4474000", "220", "0", None),
            raw("440000", "4474000", "?", "0", None),
            raw("500000", "4427757.2187", "132", "12,5", Some("7,5")),
        ];

        let (records, report) = reproject_rows(&rows, &input(10));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].voltage_kv, 400.0);
        assert!((records[0].latitude - 40.4168).abs() < 1e-5);
        assert!((records[0].longitude + 3.7038).abs() < 1e-5);
        assert_eq!(records[1].voltage_kv, 132.0);
        assert_eq!(records[1].available_capacity_mw, 12.5);
        assert_eq!(records[1].occupied_capacity_mw, Some(7.5));

        assert_eq!(report.coordinate, 2);
        assert_eq!(report.invalid_field, 1);
        assert_eq!(report.total(), 3);
        assert_eq!(report.samples.len(), 3);
    }

    #[test]
    fn test_drop_report_sample_limit() {
        let rows: Vec<RawRow> = (0..5)
            .map(|_| raw("500000", "10600000", "220", "0", None))
            .collect();

        let (records, report) = reproject_rows(&rows, &input(2));

        assert!(records.is_empty());
        assert_eq!(report.coordinate, 5);
        assert_eq!(report.samples.len(), 2);
    }

    #[test]
    fn test_ingest_files_isolates_bad_file() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.csv");
        let bad = dir.path().join("bad.csv");
        let missing = dir.path().join("missing.csv");

        fs::write(
            &good,
            format!("{}\nA,,,400,50,,440290.46,4474257.38\nB,,,220,0,150,500000,10600000\n", HEADER),
        )
        .unwrap();
        fs::write(&bad, "Nombre Subestación\nA\n").unwrap();

        let outcome = ingest_files(
            &[bad, good, missing],
            &ColumnMapping::default(),
            &InputConfig::default(),
        );

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].source.as_deref(), Some("good.csv"));
        assert_eq!(outcome.dropped.coordinate, 1);
        assert_eq!(outcome.file_errors.len(), 2);
        assert!(outcome.file_errors[0].starts_with("bad.csv: missing required columns"));
        assert!(outcome.file_errors[1].starts_with("missing.csv"));
    }
}
