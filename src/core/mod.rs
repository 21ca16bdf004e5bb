//! Core data types and I/O operations.

pub mod loaders;
pub mod records;
pub mod transforms;
pub mod writers;

pub use loaders::{CapacityTable, LoaderError, RawFeature, SchemaError};
pub use records::{
    CapacityRecord, FeatureGeometry, GeoPoint, GeometryKind, InfrastructureFeature, TransformerRecord,
};
pub use transforms::{utm30_to_wgs84, wgs84_to_utm30, CoordinateError};
pub use writers::{write_map_json, write_markers_csv, WriteError};
