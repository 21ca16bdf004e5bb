//! Map layer assembly for one screening session.
//!
//! A [`Session`] names the inputs and toggles of one run; [`run_session`]
//! builds every visible layer independently, so a broken collaborator file
//! costs only its own layer.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::config::{PipelineConfig, TileLayer};
use crate::core::loaders::load_feature_collection;
use crate::core::records::{GeoPoint, GeometryKind, InfrastructureFeature};

use super::filtering::{filter_records, FilterRanges, NumericRange};
use super::infrastructure::{line_label, line_style, load_features, FeatureReport, InclusionPolicy, LineStyle};
use super::ingestion::{ingest_files, DropReport};
use super::markers::{build_markers, MarkerDescriptor};
use super::transformers::{
    build_transformer_marker, filter_transformers, load_transformers, voltage_levels,
    TransformerFilter, TransformerMarker, TransformerReport,
};

/// Which layers are drawn. Hidden layers are not loaded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerVisibility {
    pub markers: bool,
    pub substations: bool,
    pub lines: bool,
    pub transformers: bool,
}

impl Default for LayerVisibility {
    fn default() -> Self {
        Self {
            markers: true,
            substations: true,
            lines: true,
            transformers: true,
        }
    }
}

/// Inputs and toggles of one screening run.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub capacity_files: Vec<PathBuf>,
    pub substations_path: Option<PathBuf>,
    pub lines_path: Option<PathBuf>,
    pub transformers_path: Option<PathBuf>,
    /// `None` spans the loaded data
    pub voltage_kv: Option<NumericRange>,
    /// `None` spans the loaded data
    pub available_capacity_mw: Option<NumericRange>,
    pub transformer_filter: TransformerFilter,
    pub visibility: LayerVisibility,
}

impl Session {
    /// Session over the given capacity files, with collaborator paths and
    /// filter ranges taken from the configuration.
    pub fn from_config(capacity_files: Vec<PathBuf>, config: &PipelineConfig) -> Self {
        Self {
            capacity_files,
            substations_path: Some(config.layers.substations_path.clone()),
            lines_path: Some(config.layers.lines_path.clone()),
            transformers_path: config.layers.transformers_path.clone(),
            voltage_kv: config.filter.voltage_kv,
            available_capacity_mw: config.filter.available_capacity_mw,
            transformer_filter: config.filter.transformers.clone(),
            visibility: LayerVisibility::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Markers,
    Substations,
    Lines,
    Transformers,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::Markers => "markers",
            LayerKind::Substations => "substations",
            LayerKind::Lines => "lines",
            LayerKind::Transformers => "transformers",
        };
        f.write_str(name)
    }
}

/// A failure confined to one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerError {
    pub layer: LayerKind,
    pub message: String,
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.layer, self.message)
    }
}

/// A transmission line with its stroke and popup text.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledLine {
    pub feature: InfrastructureFeature,
    pub style: LineStyle,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Records that survived ingestion, before filtering
    pub records_loaded: usize,
    pub dropped: DropReport,
    /// Ranges actually applied, `None` when no record was loaded
    pub ranges: Option<FilterRanges>,
    pub substations: Option<FeatureReport>,
    pub lines: Option<FeatureReport>,
    pub transformers: Option<TransformerReport>,
}

/// Everything a map surface needs for one session.
#[derive(Debug, Clone)]
pub struct MapLayers {
    pub markers: Vec<MarkerDescriptor>,
    pub substations: Vec<InfrastructureFeature>,
    pub lines: Vec<StyledLine>,
    pub transformers: Vec<TransformerMarker>,
    pub tiles: Vec<TileLayer>,
    pub center: GeoPoint,
    pub report: PipelineReport,
    pub errors: Vec<LayerError>,
}

/// Mean of all marker and substation positions, or `fallback` when empty.
pub fn compute_center(
    markers: &[MarkerDescriptor],
    substations: &[InfrastructureFeature],
    fallback: GeoPoint,
) -> GeoPoint {
    let positions: Vec<GeoPoint> = markers
        .iter()
        .map(|m| m.position)
        .chain(substations.iter().filter_map(|s| s.point()))
        .collect();

    if positions.is_empty() {
        return fallback;
    }

    let n = positions.len() as f64;
    let (lat_sum, lon_sum) = positions
        .iter()
        .fold((0.0, 0.0), |(lat, lon), p| (lat + p.latitude, lon + p.longitude));

    GeoPoint::new(lat_sum / n, lon_sum / n)
}

fn load_layer(
    path: &Path,
    kind: GeometryKind,
    policy: &InclusionPolicy,
) -> Result<(Vec<InfrastructureFeature>, FeatureReport), String> {
    let collection = load_feature_collection(path)
        .map_err(|e| format!("could not load {}: {}", path.display(), e))?;
    Ok(load_features(&collection, kind, policy))
}

/// Run one session end to end.
///
/// Never fails as a whole: per-file and per-layer failures are collected in
/// [`MapLayers::errors`] and the remaining layers are still built.
pub fn run_session(session: &Session, config: &PipelineConfig) -> MapLayers {
    let mut report = PipelineReport::default();
    let mut errors = Vec::new();

    let mut markers = Vec::new();
    if session.visibility.markers {
        let outcome = ingest_files(&session.capacity_files, &config.columns, &config.input);
        errors.extend(outcome.file_errors.into_iter().map(|message| LayerError {
            layer: LayerKind::Markers,
            message,
        }));

        report.records_loaded = outcome.records.len();
        report.dropped = outcome.dropped;

        if !outcome.records.is_empty() {
            let ranges = FilterRanges::resolve(
                session.voltage_kv,
                session.available_capacity_mw,
                &outcome.records,
            );
            let filtered = filter_records(&outcome.records, &ranges);
            report.ranges = Some(ranges);

            match build_markers(&filtered) {
                Ok(built) => markers = built,
                Err(e) => {
                    warn!("Marker layer aborted: {}", e);
                    errors.push(LayerError {
                        layer: LayerKind::Markers,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    let mut substations = Vec::new();
    if session.visibility.substations {
        if let Some(path) = &session.substations_path {
            match load_layer(path, GeometryKind::Point, &config.layers.substation_policy) {
                Ok((features, layer_report)) => {
                    substations = features;
                    report.substations = Some(layer_report);
                }
                Err(message) => {
                    warn!("{}", message);
                    errors.push(LayerError {
                        layer: LayerKind::Substations,
                        message,
                    });
                }
            }
        }
    }

    let mut lines = Vec::new();
    if session.visibility.lines {
        if let Some(path) = &session.lines_path {
            match load_layer(path, GeometryKind::LineString, &config.layers.line_policy) {
                Ok((features, layer_report)) => {
                    lines = features
                        .into_iter()
                        .map(|feature| StyledLine {
                            style: line_style(feature.voltage_kv, &config.style),
                            label: line_label(&feature),
                            feature,
                        })
                        .collect();
                    report.lines = Some(layer_report);
                }
                Err(message) => {
                    warn!("{}", message);
                    errors.push(LayerError {
                        layer: LayerKind::Lines,
                        message,
                    });
                }
            }
        }
    }

    let mut transformers = Vec::new();
    if session.visibility.transformers {
        if let Some(path) = &session.transformers_path {
            match load_transformers(path, &config.transformer_columns, &config.input) {
                Ok((records, dropped)) => {
                    transformers = filter_transformers(&records, &session.transformer_filter)
                        .iter()
                        .map(build_transformer_marker)
                        .collect();
                    report.transformers = Some(TransformerReport {
                        loaded: records.len(),
                        dropped,
                        voltage_levels: voltage_levels(&records),
                    });
                }
                Err(e) => {
                    let message = format!("could not load {}: {}", path.display(), e);
                    warn!("{}", message);
                    errors.push(LayerError {
                        layer: LayerKind::Transformers,
                        message,
                    });
                }
            }
        }
    }

    let [fallback_lat, fallback_lon] = config.layers.fallback_center;
    let center = compute_center(&markers, &substations, GeoPoint::new(fallback_lat, fallback_lon));

    info!(
        "Session built: {} markers, {} substations, {} lines, {} transformers, {} layer errors",
        markers.len(),
        substations.len(),
        lines.len(),
        transformers.len(),
        errors.len()
    );

    MapLayers {
        markers,
        substations,
        lines,
        transformers,
        tiles: config.tiles.clone(),
        center,
        report,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CAPACITY: &str = "Nombre Subestación,Provincia,Municipio,Nivel de Tensión (kV),\
Capacidad disponible (MW),Capacidad ocupada (MW),Coordenada UTM X,Coordenada UTM Y
NORTE,Madrid,Madrid,400,50,,440290.46,4474257.38
SUR,Toledo,,220,0,150,500000,4427757.2187
POLO,,,132,10,5,500000,10600000
";

    const SUBSTATIONS: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-3.5, 40.2]},
         "properties": {"name": "A", "voltage": "220000"}},
        {"type": "Feature", "geometry": {"type": "Polygon", "coordinates": []},
         "properties": {"name": "B"}}
    ]}"#;

    const LINES: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[-3.0, 40.0], [-3.5, 40.5]]},
         "properties": {"voltage": "400000;220000"}}
    ]}"#;

    struct Fixture {
        dir: TempDir,
        session: Session,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let capacity = dir.path().join("capacity.csv");
        let substations = dir.path().join("substations.geojson");
        let lines = dir.path().join("line.geojson");
        fs::write(&capacity, CAPACITY).unwrap();
        fs::write(&substations, SUBSTATIONS).unwrap();
        fs::write(&lines, LINES).unwrap();

        let session = Session {
            capacity_files: vec![capacity],
            substations_path: Some(substations),
            lines_path: Some(lines),
            ..Session::default()
        };

        Fixture { dir, session }
    }

    #[test]
    fn test_run_session_all_layers() {
        let f = fixture();
        let layers = run_session(&f.session, &PipelineConfig::default());

        assert!(layers.errors.is_empty(), "{:?}", layers.errors);
        assert_eq!(layers.markers.len(), 2);
        assert_eq!(layers.report.records_loaded, 2);
        assert_eq!(layers.report.dropped.coordinate, 1);
        assert!(layers.markers[1].exhausted);

        assert_eq!(layers.substations.len(), 1);
        assert_eq!(layers.report.substations.unwrap().wrong_geometry_type, 1);

        assert_eq!(layers.lines.len(), 1);
        assert_eq!(layers.lines[0].style.color, "#d73027");
        assert_eq!(layers.tiles.len(), 4);

        let expected_lat =
            (layers.markers[0].position.latitude + layers.markers[1].position.latitude + 40.2) / 3.0;
        assert!((layers.center.latitude - expected_lat).abs() < 1e-9);
    }

    #[test]
    fn test_blank_name_row_keeps_marker_layer() {
        let f = fixture();
        let capacity = f.dir.path().join("blank_name.csv");
        fs::write(
            &capacity,
            "Nombre Subestación,Nivel de Tensión (kV),Capacidad disponible (MW),\
Coordenada UTM X,Coordenada UTM Y
ALMARAZ,400,50,440290.46,4474257.38
BENEJAMA,220,0,500000,4427757.2187
,132,10,500000,4427757.2187
",
        )
        .unwrap();
        let session = Session {
            capacity_files: vec![capacity],
            ..Session::default()
        };

        let layers = run_session(&session, &PipelineConfig::default());

        assert!(layers.errors.is_empty(), "{:?}", layers.errors);
        assert_eq!(layers.markers.len(), 2);
        assert_eq!(layers.report.records_loaded, 2);
        assert_eq!(layers.report.dropped.invalid_field, 1);
    }

    #[test]
    fn test_filter_ranges_applied() {
        let mut f = fixture();
        f.session.voltage_kv = Some(NumericRange::new(300.0, 500.0).unwrap());

        let layers = run_session(&f.session, &PipelineConfig::default());

        assert_eq!(layers.markers.len(), 1);
        assert_eq!(layers.markers[0].name, "NORTE");
        assert_eq!(layers.report.records_loaded, 2);
        let ranges = layers.report.ranges.unwrap();
        assert_eq!(ranges.available_capacity_mw, NumericRange { min: 0.0, max: 50.0 });
    }

    #[test]
    fn test_broken_layer_is_isolated() {
        let mut f = fixture();
        let broken = f.dir.path().join("broken.geojson");
        fs::write(&broken, "{ not json").unwrap();
        f.session.lines_path = Some(broken);
        f.session.substations_path = Some(f.dir.path().join("missing.geojson"));

        let layers = run_session(&f.session, &PipelineConfig::default());

        assert_eq!(layers.markers.len(), 2);
        assert!(layers.substations.is_empty());
        assert!(layers.lines.is_empty());
        assert_eq!(layers.errors.len(), 2);
        assert_eq!(layers.errors[0].layer, LayerKind::Substations);
        assert_eq!(layers.errors[1].layer, LayerKind::Lines);
    }

    #[test]
    fn test_hidden_layers_not_loaded() {
        let mut f = fixture();
        f.session.substations_path = Some(PathBuf::from("/nonexistent/substations.geojson"));
        f.session.visibility = LayerVisibility {
            markers: false,
            substations: false,
            lines: true,
            transformers: false,
        };

        let layers = run_session(&f.session, &PipelineConfig::default());

        assert!(layers.errors.is_empty());
        assert!(layers.markers.is_empty());
        assert!(layers.report.substations.is_none());
        assert_eq!(layers.lines.len(), 1);
    }

    #[test]
    fn test_center_fallback() {
        let session = Session::default();
        let layers = run_session(&session, &PipelineConfig::default());

        assert_eq!(layers.center, GeoPoint::new(40.0, -3.7));
        assert!(layers.errors.is_empty());
    }

    #[test]
    fn test_missing_capacity_file_reported() {
        let mut f = fixture();
        f.session.capacity_files.push(PathBuf::from("/nonexistent/other.csv"));

        let layers = run_session(&f.session, &PipelineConfig::default());

        assert_eq!(layers.markers.len(), 2);
        assert_eq!(layers.errors.len(), 1);
        assert_eq!(layers.errors[0].layer, LayerKind::Markers);
        assert!(layers.errors[0].to_string().starts_with("markers: other.csv"));
    }

    #[test]
    fn test_session_from_config() {
        let config = PipelineConfig::default();
        let session = Session::from_config(vec![PathBuf::from("a.csv")], &config);

        assert_eq!(session.substations_path, Some(PathBuf::from("spain_substations.geojson")));
        assert_eq!(session.lines_path, Some(PathBuf::from("line.geojson")));
        assert!(session.visibility.markers);
        assert!(session.transformers_path.is_none());
    }

    #[test]
    fn test_transformer_layer() {
        let mut f = fixture();
        let path = f.dir.path().join("transformers.csv");
        fs::write(
            &path,
            "transformer_id,bus0,bus1,voltage_bus0,voltage_bus1,s_nom,geometry
T1,A400,A220,400,220,600,\"LINESTRING (-3.0 40.0, -4.0 41.0)\"
T2,B220,B66,220,66,80,\"LINESTRING (-1.0 38.0, -1.2 38.4)\"
T3,C220,C66,220,66,90,
",
        )
        .unwrap();
        f.session.transformers_path = Some(path);
        f.session.transformer_filter.min_rating_mva = Some(100.0);

        let layers = run_session(&f.session, &PipelineConfig::default());

        assert!(layers.errors.is_empty(), "{:?}", layers.errors);
        assert_eq!(layers.transformers.len(), 1);
        assert_eq!(layers.transformers[0].position, GeoPoint::new(40.5, -3.5));
        assert_eq!(layers.markers.len(), 2);

        let report = layers.report.transformers.unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.dropped.coordinate, 1);
        assert_eq!(report.voltage_levels, vec![66.0, 220.0, 400.0]);
    }

    #[test]
    fn test_missing_transformer_file_isolated() {
        let mut f = fixture();
        f.session.transformers_path = Some(f.dir.path().join("absent.csv"));

        let layers = run_session(&f.session, &PipelineConfig::default());

        assert_eq!(layers.errors.len(), 1);
        assert_eq!(layers.errors[0].layer, LayerKind::Transformers);
        assert_eq!(layers.markers.len(), 2);
        assert_eq!(layers.lines.len(), 1);
    }
}
