//! OpenStreetMap substation and transmission line layers.
//!
//! Features of a collaborator GeoJSON file are kept when their geometry has
//! the layer's expected type, their coordinates are well formed, and their
//! properties satisfy an [`InclusionPolicy`].

use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::StyleConfig;
use crate::core::loaders::RawFeature;
use crate::core::records::{FeatureGeometry, GeoPoint, GeometryKind, InfrastructureFeature};

/// Feature property an inclusion policy can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureAttribute {
    Name,
    Voltage,
    Operator,
}

/// Which properties a feature must carry to be shown.
///
/// A feature passes when every `required` attribute is present and, unless
/// `any_of` is empty, at least one `any_of` attribute is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InclusionPolicy {
    #[serde(default)]
    pub required: Vec<FeatureAttribute>,
    #[serde(default)]
    pub any_of: Vec<FeatureAttribute>,
}

impl InclusionPolicy {
    pub fn allows(&self, feature: &InfrastructureFeature) -> bool {
        let present = |attribute: &FeatureAttribute| match attribute {
            FeatureAttribute::Name => feature.name.is_some(),
            FeatureAttribute::Voltage => feature.voltage_raw.is_some(),
            FeatureAttribute::Operator => feature.operator.is_some(),
        };

        self.required.iter().all(present)
            && (self.any_of.is_empty() || self.any_of.iter().any(present))
    }
}

/// Outcome counts of one layer load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureReport {
    pub kept: usize,
    pub missing_geometry: usize,
    pub wrong_geometry_type: usize,
    pub malformed_coordinates: usize,
    pub excluded_by_policy: usize,
}

impl FeatureReport {
    pub fn discarded(&self) -> usize {
        self.missing_geometry
            + self.wrong_geometry_type
            + self.malformed_coordinates
            + self.excluded_by_policy
    }
}

/// Stroke style of a transmission line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineStyle {
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
}

/// Property value as text. Strings are trimmed, blank values are absent.
fn property_text(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn property_count(properties: &Map<String, Value>, key: &str) -> Option<u32> {
    property_text(properties, key)?.parse().ok()
}

fn voltage_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*$").expect("valid voltage pattern"))
}

/// First voltage level of an OSM `voltage` tag, converted from volts to kV.
///
/// Multi-level tags such as `"400000;220000"` yield the first level.
pub fn parse_voltage_kv(raw: &str) -> Option<f64> {
    let first = raw.split(';').next()?;
    let captures = voltage_pattern().captures(first)?;
    let volts: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(volts / 1000.0)
}

fn parse_position(value: &Value) -> Option<GeoPoint> {
    let pair = value.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    // GeoJSON order is [longitude, latitude]
    let point = GeoPoint::new(pair[1].as_f64()?, pair[0].as_f64()?);
    point.is_valid().then_some(point)
}

fn parse_geometry(kind: GeometryKind, coordinates: &Value) -> Option<FeatureGeometry> {
    match kind {
        GeometryKind::Point => parse_position(coordinates).map(FeatureGeometry::Point),
        GeometryKind::LineString => {
            let vertices = coordinates
                .as_array()?
                .iter()
                .map(parse_position)
                .collect::<Option<Vec<_>>>()?;
            (vertices.len() >= 2).then_some(FeatureGeometry::LineString(vertices))
        }
    }
}

fn build_feature(geometry: FeatureGeometry, properties: &Map<String, Value>) -> InfrastructureFeature {
    let voltage_raw = property_text(properties, "voltage");

    InfrastructureFeature {
        geometry,
        name: property_text(properties, "name"),
        operator: property_text(properties, "operator"),
        voltage_kv: voltage_raw.as_deref().and_then(parse_voltage_kv),
        voltage_raw,
        circuits: property_count(properties, "circuits"),
        cables: property_count(properties, "cables"),
        frequency: property_text(properties, "frequency").and_then(|f| f.parse().ok()),
        osm_id: property_text(properties, "@id").or_else(|| property_text(properties, "id")),
    }
}

/// Keep the features of a collection that belong on a layer.
///
/// `kind` is the geometry the layer expects: `Point` for substations,
/// `LineString` for lines. Everything else is counted in the report.
pub fn load_features(
    collection: &[RawFeature],
    kind: GeometryKind,
    policy: &InclusionPolicy,
) -> (Vec<InfrastructureFeature>, FeatureReport) {
    let empty = Map::new();
    let mut report = FeatureReport::default();
    let mut features = Vec::new();

    for raw in collection {
        let Some(geometry) = &raw.geometry else {
            report.missing_geometry += 1;
            continue;
        };

        if geometry.kind.as_deref() != Some(kind.as_str()) {
            report.wrong_geometry_type += 1;
            continue;
        }

        let Some(parsed) = parse_geometry(kind, &geometry.coordinates) else {
            report.malformed_coordinates += 1;
            continue;
        };

        let feature = build_feature(parsed, raw.properties.as_ref().unwrap_or(&empty));
        if !policy.allows(&feature) {
            report.excluded_by_policy += 1;
            continue;
        }

        features.push(feature);
    }

    report.kept = features.len();
    debug!(
        "{} layer: kept {}, discarded {}",
        kind.as_str(),
        report.kept,
        report.discarded()
    );

    (features, report)
}

/// Stroke of a line from its first voltage level.
///
/// Bands are matched from the highest threshold down; lines below every
/// band, or without a parseable voltage, get the default stroke.
pub fn line_style(voltage_kv: Option<f64>, style: &StyleConfig) -> LineStyle {
    let band = voltage_kv.and_then(|kv| {
        let mut bands: Vec<_> = style.voltage_bands.iter().collect();
        bands.sort_by(|a, b| b.min_kv.total_cmp(&a.min_kv));
        bands.into_iter().find(|band| kv >= band.min_kv)
    });

    match band {
        Some(band) => LineStyle {
            color: band.color.clone(),
            weight: band.weight,
            opacity: style.opacity,
        },
        None => LineStyle {
            color: style.default_color.clone(),
            weight: style.default_weight,
            opacity: style.opacity,
        },
    }
}

/// Popup text of a substation.
pub fn substation_label(feature: &InfrastructureFeature) -> String {
    format!(
        "{}\nVoltage: {}\nOperator: {}",
        feature.name.as_deref().unwrap_or("Substation"),
        feature.voltage_raw.as_deref().unwrap_or("Unknown"),
        feature.operator.as_deref().unwrap_or("Unknown"),
    )
}

/// Popup text of a transmission line.
pub fn line_label(feature: &InfrastructureFeature) -> String {
    let voltage = match (feature.voltage_kv, feature.voltage_raw.as_deref()) {
        (Some(kv), _) => format!("{:.1} kV", kv),
        (None, Some(raw)) => raw.to_string(),
        (None, None) => "N/A".to_string(),
    };
    let or_na = |value: Option<String>| value.unwrap_or_else(|| "N/A".to_string());

    format!(
        "{}\nOperator: {}\nVoltage: {}\nCircuits: {}\nCables: {}\nFrequency: {}",
        feature.name.as_deref().unwrap_or("Transmission line"),
        feature.operator.as_deref().unwrap_or("Unknown"),
        voltage,
        or_na(feature.circuits.map(|c| c.to_string())),
        or_na(feature.cables.map(|c| c.to_string())),
        or_na(feature.frequency.map(|f| f.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::core::loaders::parse_feature_collection;

    const SUBSTATIONS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-3.70, 40.41]},
             "properties": {"name": "Subestación Norte", "voltage": "400000;220000", "operator": "REE"}},
            {"type": "Feature", "geometry": {"type": "Polygon",
             "coordinates": [[[-3.0, 40.0], [-3.1, 40.0], [-3.1, 40.1], [-3.0, 40.0]]]},
             "properties": {"name": "Area"}},
            {"type": "Feature", "geometry": null, "properties": {"name": "Nowhere"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": ["N/A", 40.0]},
             "properties": {"name": "Broken"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-4.0, 41.0]},
             "properties": {"power": "substation", "name": "  "}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-5.0, 42.0]},
             "properties": {"voltage": 132000}}
        ]
    }"#;

    const LINES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": {"type": "LineString",
             "coordinates": [[-3.0, 40.0], [-3.5, 40.5], [-4.0, 41.0]]},
             "properties": {"voltage": "220000", "circuits": "2", "cables": 6, "frequency": "50"}},
            {"type": "Feature", "geometry": {"type": "LineString",
             "coordinates": [[-3.0, 40.0], [-3.5, 40.5]]},
             "properties": {"name": "Unknown voltage"}},
            {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[-3.0, 40.0]]},
             "properties": {"voltage": "400000"}}
        ]
    }"#;

    fn substation(name: Option<&str>, voltage: Option<&str>, operator: Option<&str>) -> InfrastructureFeature {
        InfrastructureFeature {
            geometry: FeatureGeometry::Point(GeoPoint::new(40.0, -3.0)),
            name: name.map(str::to_string),
            operator: operator.map(str::to_string),
            voltage_kv: voltage.and_then(parse_voltage_kv),
            voltage_raw: voltage.map(str::to_string),
            circuits: None,
            cables: None,
            frequency: None,
            osm_id: None,
        }
    }

    #[test]
    fn test_load_substations_default_policy() {
        let raw = parse_feature_collection(SUBSTATIONS).unwrap();
        let policy = LayerConfig::default().substation_policy;

        let (features, report) = load_features(&raw, GeometryKind::Point, &policy);

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].name.as_deref(), Some("Subestación Norte"));
        assert_eq!(features[0].voltage_kv, Some(400.0));
        assert_eq!(features[0].point(), Some(GeoPoint::new(40.41, -3.70)));
        assert_eq!(features[1].voltage_raw.as_deref(), Some("132000"));
        assert_eq!(features[1].voltage_kv, Some(132.0));

        assert_eq!(report.kept, 2);
        assert_eq!(report.wrong_geometry_type, 1);
        assert_eq!(report.missing_geometry, 1);
        assert_eq!(report.malformed_coordinates, 1);
        assert_eq!(report.excluded_by_policy, 1);
        assert_eq!(report.discarded(), 4);
    }

    #[test]
    fn test_polygon_excluded_from_substations() {
        let raw = parse_feature_collection(SUBSTATIONS).unwrap();
        let (features, _) = load_features(&raw, GeometryKind::Point, &InclusionPolicy::default());

        assert!(features.iter().all(|f| f.geometry_type() == GeometryKind::Point));
        assert!(features.iter().all(|f| f.name.as_deref() != Some("Area")));
    }

    #[test]
    fn test_load_lines_require_voltage() {
        let raw = parse_feature_collection(LINES).unwrap();
        let policy = LayerConfig::default().line_policy;

        let (features, report) = load_features(&raw, GeometryKind::LineString, &policy);

        assert_eq!(features.len(), 1);
        assert_eq!(features[0].positions().len(), 3);
        assert_eq!(features[0].circuits, Some(2));
        assert_eq!(features[0].cables, Some(6));
        assert_eq!(features[0].frequency, Some(50.0));
        assert_eq!(report.excluded_by_policy, 1);
        assert_eq!(report.malformed_coordinates, 1);
    }

    #[test]
    fn test_inclusion_policy_variants() {
        let named = substation(Some("A"), None, None);
        let with_voltage = substation(None, Some("220000"), None);
        let bare = substation(None, None, None);

        let any = InclusionPolicy {
            required: vec![],
            any_of: vec![FeatureAttribute::Name, FeatureAttribute::Voltage, FeatureAttribute::Operator],
        };
        assert!(any.allows(&named));
        assert!(any.allows(&with_voltage));
        assert!(!any.allows(&bare));

        let voltage_known = InclusionPolicy {
            required: vec![FeatureAttribute::Voltage],
            any_of: vec![],
        };
        assert!(!voltage_known.allows(&named));
        assert!(voltage_known.allows(&with_voltage));

        let strict = InclusionPolicy {
            required: vec![FeatureAttribute::Voltage],
            any_of: vec![FeatureAttribute::Name, FeatureAttribute::Operator],
        };
        assert!(!strict.allows(&with_voltage));
        assert!(strict.allows(&substation(Some("B"), Some("400000"), None)));

        assert!(InclusionPolicy::default().allows(&bare));
    }

    #[test]
    fn test_policy_yaml_names() {
        let policy: InclusionPolicy =
            serde_yaml::from_str("required: [voltage]\nany_of: [name, operator]\n").unwrap();
        assert_eq!(policy.required, vec![FeatureAttribute::Voltage]);
        assert_eq!(policy.any_of, vec![FeatureAttribute::Name, FeatureAttribute::Operator]);
    }

    #[test]
    fn test_parse_voltage_kv() {
        assert_eq!(parse_voltage_kv("400000"), Some(400.0));
        assert_eq!(parse_voltage_kv("400000;220000"), Some(400.0));
        assert_eq!(parse_voltage_kv(" 66000 "), Some(66.0));
        assert_eq!(parse_voltage_kv("medium"), None);
        assert_eq!(parse_voltage_kv(""), None);
        assert_eq!(parse_voltage_kv(";220000"), None);
    }

    #[test]
    fn test_voltage_pattern_shared() {
        let first = voltage_pattern();
        assert!(first.is_match("132000"));
        assert!(!first.is_match("132 kV"));
        assert!(std::ptr::eq(first, voltage_pattern()));
    }

    #[test]
    fn test_line_style_thresholds() {
        let style = StyleConfig::default();

        let s = line_style(Some(400.0), &style);
        assert_eq!((s.color.as_str(), s.weight), ("#d73027", 3.0));
        let s = line_style(Some(380.0), &style);
        assert_eq!(s.color, "#d73027");
        let s = line_style(Some(220.0), &style);
        assert_eq!((s.color.as_str(), s.weight), ("#fc8d59", 2.5));
        let s = line_style(Some(132.0), &style);
        assert_eq!((s.color.as_str(), s.weight), ("#4575b4", 2.0));
        let s = line_style(Some(66.0), &style);
        assert_eq!((s.color.as_str(), s.weight), ("#666666", 2.0));
        let s = line_style(None, &style);
        assert_eq!(s.color, "#666666");
        assert_eq!(s.opacity, 0.9);
    }

    #[test]
    fn test_substation_label_fallbacks() {
        assert_eq!(
            substation_label(&substation(None, None, None)),
            "Substation\nVoltage: Unknown\nOperator: Unknown"
        );
        assert_eq!(
            substation_label(&substation(Some("Norte"), Some("400000"), Some("REE"))),
            "Norte\nVoltage: 400000\nOperator: REE"
        );
    }

    #[test]
    fn test_line_label() {
        let raw = parse_feature_collection(LINES).unwrap();
        let (features, _) = load_features(&raw, GeometryKind::LineString, &InclusionPolicy::default());

        assert_eq!(
            line_label(&features[0]),
            "Transmission line\nOperator: Unknown\nVoltage: 220.0 kV\nCircuits: 2\nCables: 6\nFrequency: 50"
        );
        assert!(line_label(&features[1]).contains("Voltage: N/A\nCircuits: N/A"));
    }
}
