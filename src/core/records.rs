//! Typed records shared by every pipeline stage.

use serde::{Deserialize, Serialize};

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both components are finite and inside the WGS84 ranges.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// GeoJSON position order: [longitude, latitude].
    #[inline]
    pub fn to_lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

/// One connection point of the capacity export after validation and reprojection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityRecord {
    pub substation_name: String,
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub voltage_kv: f64,
    pub available_capacity_mw: f64,
    pub occupied_capacity_mw: Option<f64>,
    /// Easting in UTM zone 30N (EPSG:32630)
    pub projected_x: f64,
    /// Northing in UTM zone 30N (EPSG:32630)
    pub projected_y: f64,
    /// Derived from the projected pair, never read from input
    pub latitude: f64,
    pub longitude: f64,
    /// File the row came from when several exports are combined
    pub source: Option<String>,
    /// Line number in the source file, header being line 1
    pub line: u64,
}

impl CapacityRecord {
    #[inline]
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Transformer of a grid model export, drawn between its two buses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformerRecord {
    pub transformer_id: String,
    pub bus0: Option<String>,
    pub bus1: Option<String>,
    pub voltage_bus0_kv: Option<f64>,
    pub voltage_bus1_kv: Option<f64>,
    /// Nominal rating in MVA
    pub s_nom_mva: Option<f64>,
    /// First vertex of the geometry, on the bus0 side
    pub start: GeoPoint,
    /// Last vertex, on the bus1 side
    pub end: GeoPoint,
    pub line: u64,
}

impl TransformerRecord {
    /// Midpoint of the first and last vertices.
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(
            (self.start.latitude + self.end.latitude) / 2.0,
            (self.start.longitude + self.end.longitude) / 2.0,
        )
    }

    /// Whether either bus sits at `voltage_kv`.
    pub fn has_voltage(&self, voltage_kv: f64) -> bool {
        [self.voltage_bus0_kv, self.voltage_bus1_kv]
            .into_iter()
            .flatten()
            .any(|v| (v - voltage_kv).abs() < 1e-9)
    }
}

/// Geometry literal of a GeoJSON collaborator feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
}

impl GeometryKind {
    /// The `geometry.type` literal as written in GeoJSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
        }
    }

    pub fn from_literal(literal: &str) -> Option<Self> {
        match literal {
            "Point" => Some(GeometryKind::Point),
            "LineString" => Some(GeometryKind::LineString),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(GeoPoint),
    LineString(Vec<GeoPoint>),
}

impl FeatureGeometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            FeatureGeometry::Point(_) => GeometryKind::Point,
            FeatureGeometry::LineString(_) => GeometryKind::LineString,
        }
    }
}

/// Substation or transmission line from an OpenStreetMap export.
#[derive(Debug, Clone, PartialEq)]
pub struct InfrastructureFeature {
    pub geometry: FeatureGeometry,
    pub name: Option<String>,
    pub operator: Option<String>,
    /// First voltage level of the tag, in kV
    pub voltage_kv: Option<f64>,
    /// The voltage tag as written, in volts (e.g. "400000;220000")
    pub voltage_raw: Option<String>,
    pub circuits: Option<u32>,
    pub cables: Option<u32>,
    pub frequency: Option<f64>,
    /// OSM source identifier (`@id`)
    pub osm_id: Option<String>,
}

impl InfrastructureFeature {
    #[inline]
    pub fn geometry_type(&self) -> GeometryKind {
        self.geometry.kind()
    }

    /// Point position, or `None` for lines.
    pub fn point(&self) -> Option<GeoPoint> {
        match &self.geometry {
            FeatureGeometry::Point(p) => Some(*p),
            FeatureGeometry::LineString(_) => None,
        }
    }

    /// Every vertex of the geometry.
    pub fn positions(&self) -> Vec<GeoPoint> {
        match &self.geometry {
            FeatureGeometry::Point(p) => vec![*p],
            FeatureGeometry::LineString(points) => points.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint::new(40.4, -3.7).is_valid());
        assert!(GeoPoint::new(90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(95.0, -3.0).is_valid());
        assert!(!GeoPoint::new(40.0, -181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_geometry_kind_literals() {
        assert_eq!(GeometryKind::from_literal("Point"), Some(GeometryKind::Point));
        assert_eq!(GeometryKind::from_literal("LineString"), Some(GeometryKind::LineString));
        assert_eq!(GeometryKind::from_literal("Polygon"), None);
        assert_eq!(GeometryKind::LineString.as_str(), "LineString");
    }

    #[test]
    fn test_transformer_midpoint() {
        let transformer = TransformerRecord {
            transformer_id: "T1".to_string(),
            bus0: None,
            bus1: None,
            voltage_bus0_kv: Some(400.0),
            voltage_bus1_kv: None,
            s_nom_mva: None,
            start: GeoPoint::new(40.0, -4.0),
            end: GeoPoint::new(41.0, -3.0),
            line: 2,
        };

        assert_eq!(transformer.position(), GeoPoint::new(40.5, -3.5));
        assert!(transformer.has_voltage(400.0));
        assert!(!transformer.has_voltage(220.0));
    }

    #[test]
    fn test_feature_positions() {
        let line = InfrastructureFeature {
            geometry: FeatureGeometry::LineString(vec![
                GeoPoint::new(40.0, -3.0),
                GeoPoint::new(41.0, -4.0),
            ]),
            name: None,
            operator: None,
            voltage_kv: Some(400.0),
            voltage_raw: Some("400000".to_string()),
            circuits: Some(2),
            cables: None,
            frequency: None,
            osm_id: None,
        };

        assert_eq!(line.geometry_type(), GeometryKind::LineString);
        assert_eq!(line.positions().len(), 2);
        assert!(line.point().is_none());
    }
}
