//! Grid connection capacity screening for Spain.
//!
//! This crate provides tools for:
//! - Loading transmission capacity exports (CSV) with schema validation
//! - Reprojecting UTM zone 30N coordinates to WGS84 (parallelized)
//! - Inclusive voltage and available-capacity range filtering
//! - Building marker descriptors with utilization and exhaustion flags
//! - Loading OpenStreetMap substations and lines with configurable inclusion
//! - Placing transformers from WKT LINESTRING exports, with ID/voltage/rating filters
//! - Writing map documents (GeoJSON layers), marker CSV and PNG previews
//!
//! # Example
//!
//! ```no_run
//! use grid_screening::{processors::pipeline::{run_session, Session}, PipelineConfig};
//! use std::path::PathBuf;
//!
//! let config = PipelineConfig::default();
//! let session = Session::from_config(vec![PathBuf::from("capacity.csv")], &config);
//! let layers = run_session(&session, &config);
//! println!("{} markers", layers.markers.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{ColumnMapping, LayerConfig, PipelineConfig, StyleConfig};
pub use crate::core::records::{CapacityRecord, GeoPoint, InfrastructureFeature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
