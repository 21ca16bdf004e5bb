//! Data processing modules.

pub mod filtering;
pub mod infrastructure;
pub mod ingestion;
pub mod markers;
pub mod pipeline;
pub mod transformers;

// Re-export key types for convenience
pub use filtering::{filter_records, FilterError, FilterRanges, NumericRange};
pub use infrastructure::{
    line_style, load_features, FeatureAttribute, FeatureReport, InclusionPolicy, LineStyle,
};
pub use ingestion::{
    ingest_files, ingest_rows, parse_row, reproject_rows, DecimalSeparator, DropReport, RowError,
};
pub use markers::{build_marker, build_markers, MarkerDescriptor, MissingFieldError};
pub use pipeline::{run_session, LayerVisibility, MapLayers, Session};
pub use transformers::{
    build_transformer_marker, filter_transformers, load_transformers, TransformerFilter,
    TransformerMarker,
};
