//! PNG preview of map layers.
//!
//! Renders longitude against latitude with the plotters bitmap backend. No
//! text is drawn, so no font backend is needed.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::config::RenderConfig;
use crate::core::records::GeoPoint;
use crate::processors::pipeline::MapLayers;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Nothing to plot: every layer is empty")]
    EmptyLayers,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

const MARKER_COLOR: RGBColor = RGBColor(228, 26, 28);

const EXHAUSTED_MARKER_COLOR: RGBColor = RGBColor(139, 0, 0);

const SUBSTATION_COLOR: RGBColor = RGBColor(55, 126, 184);

const TRANSFORMER_COLOR: RGBColor = RGBColor(152, 78, 163);

/// Used when a configured line colour cannot be parsed.
const FALLBACK_LINE_COLOR: RGBColor = RGBColor(102, 102, 102);

/// Parse a `#rrggbb` colour.
pub fn parse_hex_color(hex: &str) -> Option<RGBColor> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// Compute the bounds (lon min, lon max, lat min, lat max) of a set of positions.
fn compute_bounds(points: &[GeoPoint]) -> Option<(f64, f64, f64, f64)> {
    let first = points.first()?;
    let mut x_min = first.longitude;
    let mut x_max = first.longitude;
    let mut y_min = first.latitude;
    let mut y_max = first.latitude;

    for p in &points[1..] {
        x_min = x_min.min(p.longitude);
        x_max = x_max.max(p.longitude);
        y_min = y_min.min(p.latitude);
        y_max = y_max.max(p.latitude);
    }

    if (x_max - x_min).abs() < f64::EPSILON {
        x_min -= 0.5;
        x_max += 0.5;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 0.5;
        y_max += 0.5;
    }

    Some((x_min, x_max, y_min, y_max))
}

fn all_positions(layers: &MapLayers) -> Vec<GeoPoint> {
    layers
        .markers
        .iter()
        .map(|m| m.position)
        .chain(layers.substations.iter().filter_map(|s| s.point()))
        .chain(layers.lines.iter().flat_map(|l| l.feature.positions()))
        .chain(layers.transformers.iter().map(|t| t.position))
        .collect()
}

/// Plot lines, substations and markers (longitude vs latitude) and save as PNG.
///
/// Lines keep their style colour and weight, substations are blue,
/// transformers purple, markers red and exhausted markers dark red. Parent
/// directories must exist.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `layers` - Layers of one session
/// * `options` - Image size and marker radius
pub fn plot_layers(output_path: &Path, layers: &MapLayers, options: &RenderConfig) -> Result<()> {
    let positions = all_positions(layers);
    let (x_min, x_max, y_min, y_max) =
        compute_bounds(&positions).ok_or(VisualizationError::EmptyLayers)?;
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root = BitMapBackend::new(output_path, (options.width, options.height)).into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(layers.lines.iter().map(|line| {
            let rgb = parse_hex_color(&line.style.color).unwrap_or(FALLBACK_LINE_COLOR);
            let style = rgb
                .mix(line.style.opacity)
                .stroke_width(line.style.weight.round().max(1.0) as u32);
            let path: Vec<(f64, f64)> = line
                .feature
                .positions()
                .iter()
                .map(|p| (p.longitude, p.latitude))
                .collect();
            PathElement::new(path, style)
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let radius = options.marker_radius as i32;

    chart
        .draw_series(layers.substations.iter().filter_map(|s| s.point()).map(|p| {
            Circle::new((p.longitude, p.latitude), radius, SUBSTATION_COLOR.mix(0.85).filled())
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(layers.transformers.iter().map(|t| {
            Circle::new((t.position.longitude, t.position.latitude), radius, TRANSFORMER_COLOR.filled())
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .draw_series(layers.markers.iter().map(|m| {
            let color = if m.exhausted {
                EXHAUSTED_MARKER_COLOR
            } else {
                MARKER_COLOR
            };
            Circle::new((m.position.longitude, m.position.latitude), radius, color.filled())
        }))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::processors::pipeline::{run_session, Session};
    use tempfile::tempdir;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#d73027"), Some(RGBColor(215, 48, 39)));
        assert_eq!(parse_hex_color("#FFFFFF"), Some(RGBColor(255, 255, 255)));
        assert_eq!(parse_hex_color("d73027"), None);
        assert_eq!(parse_hex_color("#d7302"), None);
        assert_eq!(parse_hex_color("#zz3027"), None);
    }

    #[test]
    fn test_compute_bounds_degenerate() {
        let (x_min, x_max, y_min, y_max) = compute_bounds(&[GeoPoint::new(40.0, -3.0)]).unwrap();
        assert_eq!((x_min, x_max), (-3.5, -2.5));
        assert_eq!((y_min, y_max), (39.5, 40.5));
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_plot_empty_layers() {
        let dir = tempdir().unwrap();
        let layers = run_session(&Session::default(), &PipelineConfig::default());

        let result = plot_layers(&dir.path().join("map.png"), &layers, &RenderConfig::default());
        assert!(matches!(result, Err(VisualizationError::EmptyLayers)));
    }
}
