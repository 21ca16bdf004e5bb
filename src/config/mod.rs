//! Configuration types for the screening pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::processors::filtering::NumericRange;
use crate::processors::infrastructure::{FeatureAttribute, InclusionPolicy};
use crate::processors::ingestion::DecimalSeparator;
use crate::processors::transformers::TransformerFilter;

/// Header names of the capacity export, one per semantic field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default = "default_projected_x")]
    pub projected_x: String,

    #[serde(default = "default_projected_y")]
    pub projected_y: String,

    #[serde(default = "default_substation_name")]
    pub substation_name: String,

    #[serde(default = "default_voltage_kv")]
    pub voltage_kv: String,

    #[serde(default = "default_available_capacity")]
    pub available_capacity_mw: String,

    /// Optional column: absent headers yield `None` values
    #[serde(default = "default_occupied_capacity")]
    pub occupied_capacity_mw: String,

    /// Optional column
    #[serde(default = "default_province")]
    pub province: String,

    /// Optional column
    #[serde(default = "default_municipality")]
    pub municipality: String,
}

fn default_projected_x() -> String {
    "Coordenada UTM X".to_string()
}

fn default_projected_y() -> String {
    "Coordenada UTM Y".to_string()
}

fn default_substation_name() -> String {
    "Nombre Subestación".to_string()
}

fn default_voltage_kv() -> String {
    "Nivel de Tensión (kV)".to_string()
}

fn default_available_capacity() -> String {
    "Capacidad disponible (MW)".to_string()
}

fn default_occupied_capacity() -> String {
    "Capacidad ocupada (MW)".to_string()
}

fn default_province() -> String {
    "Provincia".to_string()
}

fn default_municipality() -> String {
    "Municipio".to_string()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            projected_x: default_projected_x(),
            projected_y: default_projected_y(),
            substation_name: default_substation_name(),
            voltage_kv: default_voltage_kv(),
            available_capacity_mw: default_available_capacity(),
            occupied_capacity_mw: default_occupied_capacity(),
            province: default_province(),
            municipality: default_municipality(),
        }
    }
}

/// Header names of a transformer export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerColumns {
    #[serde(default = "default_transformer_id")]
    pub transformer_id: String,

    #[serde(default = "default_bus0")]
    pub bus0: String,

    #[serde(default = "default_bus1")]
    pub bus1: String,

    #[serde(default = "default_voltage_bus0")]
    pub voltage_bus0: String,

    #[serde(default = "default_voltage_bus1")]
    pub voltage_bus1: String,

    /// Nominal rating, MVA
    #[serde(default = "default_s_nom")]
    pub s_nom: String,

    /// WKT LINESTRING between the two buses
    #[serde(default = "default_geometry")]
    pub geometry: String,

    /// Column holding the tail of a geometry split by the delimiter
    #[serde(default = "default_geometry_continuation")]
    pub geometry_continuation: String,
}

fn default_transformer_id() -> String {
    "transformer_id".to_string()
}

fn default_bus0() -> String {
    "bus0".to_string()
}

fn default_bus1() -> String {
    "bus1".to_string()
}

fn default_voltage_bus0() -> String {
    "voltage_bus0".to_string()
}

fn default_voltage_bus1() -> String {
    "voltage_bus1".to_string()
}

fn default_s_nom() -> String {
    "s_nom".to_string()
}

fn default_geometry() -> String {
    "geometry".to_string()
}

fn default_geometry_continuation() -> String {
    "Unnamed: 7".to_string()
}

impl Default for TransformerColumns {
    fn default() -> Self {
        Self {
            transformer_id: default_transformer_id(),
            bus0: default_bus0(),
            bus1: default_bus1(),
            voltage_bus0: default_voltage_bus0(),
            voltage_bus1: default_voltage_bus1(),
            s_nom: default_s_nom(),
            geometry: default_geometry(),
            geometry_continuation: default_geometry_continuation(),
        }
    }
}

/// Settings for reading capacity files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Field delimiter of the capacity export
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Decimal mark of numeric cells; `comma` for Spanish-locale exports
    /// that group thousands with `.`
    #[serde(default)]
    pub decimal_separator: DecimalSeparator,

    /// Maximum number of drop messages kept in the report
    #[serde(default = "default_max_drop_samples")]
    pub max_drop_samples: usize,
}

fn default_delimiter() -> char {
    ','
}

fn default_max_drop_samples() -> usize {
    20
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            decimal_separator: DecimalSeparator::default(),
            max_drop_samples: default_max_drop_samples(),
        }
    }
}

/// Inclusive filter ranges. `None` means "span the loaded data".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub voltage_kv: Option<NumericRange>,

    #[serde(default)]
    pub available_capacity_mw: Option<NumericRange>,

    #[serde(default)]
    pub transformers: TransformerFilter,
}

/// Infrastructure layer sources and inclusion policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Substation points GeoJSON
    #[serde(default = "default_substations_path")]
    pub substations_path: PathBuf,

    /// Transmission lines GeoJSON
    #[serde(default = "default_lines_path")]
    pub lines_path: PathBuf,

    /// Transformer export; no transformer layer when unset
    #[serde(default)]
    pub transformers_path: Option<PathBuf>,

    #[serde(default = "default_substation_policy")]
    pub substation_policy: InclusionPolicy,

    #[serde(default = "default_line_policy")]
    pub line_policy: InclusionPolicy,

    /// Map centre when no position is loaded, as [latitude, longitude]
    #[serde(default = "default_fallback_center")]
    pub fallback_center: [f64; 2],
}

fn default_substations_path() -> PathBuf {
    PathBuf::from("spain_substations.geojson")
}

fn default_lines_path() -> PathBuf {
    PathBuf::from("line.geojson")
}

fn default_substation_policy() -> InclusionPolicy {
    InclusionPolicy {
        required: Vec::new(),
        any_of: vec![
            FeatureAttribute::Name,
            FeatureAttribute::Voltage,
            FeatureAttribute::Operator,
        ],
    }
}

fn default_line_policy() -> InclusionPolicy {
    InclusionPolicy {
        required: vec![FeatureAttribute::Voltage],
        any_of: Vec::new(),
    }
}

fn default_fallback_center() -> [f64; 2] {
    [40.0, -3.7]
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            substations_path: default_substations_path(),
            lines_path: default_lines_path(),
            transformers_path: None,
            substation_policy: default_substation_policy(),
            line_policy: default_line_policy(),
            fallback_center: default_fallback_center(),
        }
    }
}

/// One voltage band of the line styling, matched from the highest threshold down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageBand {
    pub min_kv: f64,
    pub color: String,
    pub weight: f64,
}

/// Styling of transmission lines by voltage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    #[serde(default = "default_voltage_bands")]
    pub voltage_bands: Vec<VoltageBand>,

    #[serde(default = "default_line_color")]
    pub default_color: String,

    #[serde(default = "default_line_weight")]
    pub default_weight: f64,

    #[serde(default = "default_line_opacity")]
    pub opacity: f64,
}

fn default_voltage_bands() -> Vec<VoltageBand> {
    vec![
        VoltageBand { min_kv: 380.0, color: "#d73027".to_string(), weight: 3.0 }, // red
        VoltageBand { min_kv: 220.0, color: "#fc8d59".to_string(), weight: 2.5 }, // orange
        VoltageBand { min_kv: 110.0, color: "#4575b4".to_string(), weight: 2.0 }, // blue
    ]
}

fn default_line_color() -> String {
    "#666666".to_string()
}

fn default_line_weight() -> f64 {
    2.0
}

fn default_line_opacity() -> f64 {
    0.9
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            voltage_bands: default_voltage_bands(),
            default_color: default_line_color(),
            default_weight: default_line_weight(),
            opacity: default_line_opacity(),
        }
    }
}

/// Raster tile layer descriptor handed to the rendering surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayer {
    pub name: String,
    pub url_template: String,
    pub attribution: String,
    /// Overlay layers sit on top of the base layer and can be toggled
    #[serde(default)]
    pub overlay: bool,
}

fn default_tiles() -> Vec<TileLayer> {
    let oim_attr = "&copy; OpenInfraMap, OpenStreetMap contributors";
    vec![
        TileLayer {
            name: "OpenStreetMap".to_string(),
            url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "&copy; OpenStreetMap contributors".to_string(),
            overlay: false,
        },
        TileLayer {
            name: "OpenInfraMap - Power".to_string(),
            url_template: "https://tiles.openinframap.org/power/{z}/{x}/{y}.png".to_string(),
            attribution: oim_attr.to_string(),
            overlay: true,
        },
        TileLayer {
            name: "OpenInfraMap - Low voltage".to_string(),
            url_template: "https://tiles.openinframap.org/power-lowvoltage/{z}/{x}/{y}.png"
                .to_string(),
            attribution: oim_attr.to_string(),
            overlay: true,
        },
        TileLayer {
            name: "OpenInfraMap - Substations".to_string(),
            url_template: "https://tiles.openinframap.org/substations/{z}/{x}/{y}.png".to_string(),
            attribution: oim_attr.to_string(),
            overlay: true,
        },
    ]
}

/// PNG preview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_render_width")]
    pub width: u32,

    #[serde(default = "default_render_height")]
    pub height: u32,

    /// Marker radius in pixels
    #[serde(default = "default_marker_radius")]
    pub marker_radius: u32,
}

fn default_render_width() -> u32 {
    1600
}

fn default_render_height() -> u32 {
    1200
}

fn default_marker_radius() -> u32 {
    4
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_render_width(),
            height: default_render_height(),
            marker_radius: default_marker_radius(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub columns: ColumnMapping,

    #[serde(default)]
    pub transformer_columns: TransformerColumns,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub layers: LayerConfig,

    #[serde(default)]
    pub style: StyleConfig,

    #[serde(default = "default_tiles")]
    pub tiles: Vec<TileLayer>,

    #[serde(default)]
    pub render: RenderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMapping::default(),
            transformer_columns: TransformerColumns::default(),
            input: InputConfig::default(),
            filter: FilterConfig::default(),
            layers: LayerConfig::default(),
            style: StyleConfig::default(),
            tiles: default_tiles(),
            render: RenderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
