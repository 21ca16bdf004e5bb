//! Command-line interface for grid connection screening.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::processors::filtering::{FilterRanges, NumericRange};
use crate::processors::pipeline::{run_session, LayerVisibility, Session};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "grid-screening")]
#[command(about = "Grid connection capacity screening for Spain", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build map layers from capacity exports and OSM collaborators
    Render {
        /// Capacity CSV files (UTM zone 30N coordinates)
        capacity_files: Vec<PathBuf>,
        /// Substation GeoJSON (defaults to the configured path)
        #[arg(long)]
        substations: Option<PathBuf>,
        /// Transmission line GeoJSON (defaults to the configured path)
        #[arg(long)]
        lines: Option<PathBuf>,
        /// Transformer CSV with WKT LINESTRING geometries
        #[arg(long)]
        transformers: Option<PathBuf>,
        /// Hide the capacity marker layer
        #[arg(long)]
        no_markers: bool,
        /// Hide the substation layer
        #[arg(long)]
        no_substations: bool,
        /// Hide the transmission line layer
        #[arg(long)]
        no_lines: bool,
        /// Hide the transformer layer
        #[arg(long)]
        no_transformers: bool,
        /// Lowest voltage level shown, in kV
        #[arg(long, allow_hyphen_values = true)]
        voltage_min: Option<f64>,
        /// Highest voltage level shown, in kV
        #[arg(long, allow_hyphen_values = true)]
        voltage_max: Option<f64>,
        /// Lowest available capacity shown, in MW
        #[arg(long, allow_hyphen_values = true)]
        capacity_min: Option<f64>,
        /// Highest available capacity shown, in MW
        #[arg(long, allow_hyphen_values = true)]
        capacity_max: Option<f64>,
        /// Only transformers whose ID contains this text (case-insensitive)
        #[arg(long)]
        transformer_id: Option<String>,
        /// Only transformers with a bus at this level, in kV (repeatable)
        #[arg(long = "transformer-voltage", allow_hyphen_values = true)]
        transformer_voltages: Vec<f64>,
        /// Lowest transformer rating shown, in MVA
        #[arg(long, allow_hyphen_values = true)]
        min_rating: Option<f64>,
        /// Output map document (JSON with GeoJSON layers)
        #[arg(long, default_value = "grid_map.json")]
        map_json: PathBuf,
        /// Also write the markers as CSV
        #[arg(long)]
        markers_csv: Option<PathBuf>,
        /// Also write a PNG preview
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Report rows, drops and the filter domain of one capacity file
    Inspect {
        /// Capacity CSV file
        capacity_file: PathBuf,
    },

    /// Convert one UTM zone 30N pair to WGS84
    Reproject {
        /// Easting in metres
        #[arg(allow_hyphen_values = true)]
        x: f64,
        /// Northing in metres
        #[arg(allow_hyphen_values = true)]
        y: f64,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Output YAML path
        path: PathBuf,
    },
}

/// Range bounds given on the command line.
struct RangeOverrides {
    voltage_min: Option<f64>,
    voltage_max: Option<f64>,
    capacity_min: Option<f64>,
    capacity_max: Option<f64>,
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 38 {
            format!("{}...", value.chars().take(35).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<38} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn format_range(range: &NumericRange, unit: &str) -> String {
    format!("{} to {} {}", range.min, range.max, unit)
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    let result = match cli.command {
        Commands::Render {
            capacity_files,
            substations,
            lines,
            transformers,
            no_markers,
            no_substations,
            no_lines,
            no_transformers,
            voltage_min,
            voltage_max,
            capacity_min,
            capacity_max,
            transformer_id,
            transformer_voltages,
            min_rating,
            map_json,
            markers_csv,
            png,
        } => {
            let mut session = Session::from_config(capacity_files, &config);
            if let Some(path) = substations {
                session.substations_path = Some(path);
            }
            if let Some(path) = lines {
                session.lines_path = Some(path);
            }
            if let Some(path) = transformers {
                session.transformers_path = Some(path);
            }
            if transformer_id.is_some() {
                session.transformer_filter.id_contains = transformer_id;
            }
            if !transformer_voltages.is_empty() {
                session.transformer_filter.voltages_kv = transformer_voltages;
            }
            if min_rating.is_some() {
                session.transformer_filter.min_rating_mva = min_rating;
            }
            session.visibility = LayerVisibility {
                markers: !no_markers,
                substations: !no_substations,
                lines: !no_lines,
                transformers: !no_transformers,
            };
            let overrides = RangeOverrides {
                voltage_min,
                voltage_max,
                capacity_min,
                capacity_max,
            };
            cmd_render(session, overrides, &map_json, markers_csv, png, &config)
        }
        Commands::Inspect { capacity_file } => cmd_inspect(&capacity_file, &config),
        Commands::Reproject { x, y } => cmd_reproject(x, y),
        Commands::InitConfig { path } => cmd_init_config(&path, &config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Apply command-line bounds on top of a configured range.
fn override_range(
    configured: Option<NumericRange>,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<NumericRange>> {
    if min.is_none() && max.is_none() {
        return Ok(configured);
    }
    let base = configured.unwrap_or_else(NumericRange::unbounded);
    Ok(Some(base.with_bounds(min, max)?))
}

fn cmd_render(
    mut session: Session,
    overrides: RangeOverrides,
    map_json: &Path,
    markers_csv: Option<PathBuf>,
    png: Option<PathBuf>,
    config: &PipelineConfig,
) -> Result<()> {
    use crate::core::writers;
    use crate::visualization;

    let start = Instant::now();

    session.voltage_kv = override_range(session.voltage_kv, overrides.voltage_min, overrides.voltage_max)
        .context("invalid voltage range")?;
    session.available_capacity_mw =
        override_range(session.available_capacity_mw, overrides.capacity_min, overrides.capacity_max)
            .context("invalid capacity range")?;

    println!("Building map layers...");
    println!("Capacity files: {}", session.capacity_files.len());

    let spinner = create_spinner("Loading, reprojecting and filtering...");
    let layers = run_session(&session, config);
    spinner.finish_and_clear();

    for e in &layers.errors {
        warn!("Layer error: {}", e);
    }
    for sample in &layers.report.dropped.samples {
        info!("Dropped: {}", sample);
    }

    writers::write_map_json(map_json, &layers)
        .with_context(|| format!("failed to write map document {}", map_json.display()))?;

    if let Some(path) = &markers_csv {
        writers::write_markers_csv(path, &layers.markers)
            .with_context(|| format!("failed to write markers CSV {}", path.display()))?;
    }

    if let Some(path) = &png {
        let spinner = create_spinner("Rendering PNG preview...");
        let result = visualization::plot_layers(path, &layers, &config.render);
        spinner.finish_and_clear();
        match result {
            Ok(()) => {}
            Err(visualization::VisualizationError::EmptyLayers) => {
                warn!("Nothing to plot, skipping {}", path.display());
            }
            Err(e) => return Err(e).with_context(|| format!("failed to render {}", path.display())),
        }
    }

    let report = &layers.report;
    let mut items = vec![
        ("Points on map", layers.markers.len().to_string()),
        ("Records loaded", report.records_loaded.to_string()),
        (
            "Rows dropped",
            format!(
                "{} ({} coordinate, {} invalid)",
                report.dropped.total(),
                report.dropped.coordinate,
                report.dropped.invalid_field
            ),
        ),
        ("Substations", layers.substations.len().to_string()),
        ("Lines", layers.lines.len().to_string()),
        ("Transformers", layers.transformers.len().to_string()),
        ("Layer errors", layers.errors.len().to_string()),
        (
            "Center",
            format!("{:.4}, {:.4}", layers.center.latitude, layers.center.longitude),
        ),
    ];
    if let Some(ranges) = &report.ranges {
        items.push(("Voltage range", format_range(&ranges.voltage_kv, "kV")));
        items.push(("Capacity range", format_range(&ranges.available_capacity_mw, "MW")));
    }
    if let Some(transformers) = &report.transformers {
        let levels: Vec<String> = transformers.voltage_levels.iter().map(|v| v.to_string()).collect();
        items.push(("Transformer levels", format!("{} kV", levels.join(", "))));
    }
    items.push(("Map document", map_json.display().to_string()));
    if let Some(path) = &markers_csv {
        items.push(("Markers CSV", path.display().to_string()));
    }
    if let Some(path) = &png {
        items.push(("PNG preview", path.display().to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Render Complete", &items);

    Ok(())
}

fn cmd_inspect(capacity_file: &Path, config: &PipelineConfig) -> Result<()> {
    use crate::core::loaders;
    use crate::processors::ingestion;

    let start = Instant::now();

    let spinner = create_spinner("Reading capacity file...");
    let table = loaders::load_capacity_csv(capacity_file, config.input.delimiter);
    spinner.finish_and_clear();

    let table = table.with_context(|| format!("failed to load {}", capacity_file.display()))?;
    let (records, dropped) = ingestion::ingest_table(&table, &config.columns, &config.input)
        .with_context(|| format!("schema check failed for {}", capacity_file.display()))?;

    for sample in &dropped.samples {
        println!("  dropped {}", sample);
    }

    let mut items = vec![
        ("Input file", capacity_file.display().to_string()),
        ("Rows", table.len().to_string()),
        ("Records", records.len().to_string()),
        ("Coordinate drops", dropped.coordinate.to_string()),
        ("Invalid fields", dropped.invalid_field.to_string()),
    ];
    match FilterRanges::spanning(&records) {
        Some(ranges) => {
            items.push(("Voltage domain", format_range(&ranges.voltage_kv, "kV")));
            items.push(("Capacity domain", format_range(&ranges.available_capacity_mw, "MW")));
        }
        None => items.push(("Filter domain", "empty".to_string())),
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Inspection Complete", &items);

    Ok(())
}

fn cmd_reproject(x: f64, y: f64) -> Result<()> {
    use crate::core::transforms;

    let point = transforms::utm30_to_wgs84(x, y)
        .with_context(|| format!("cannot reproject ({}, {})", x, y))?;

    println!("{:.8}, {:.8}", point.latitude, point.longitude);

    Ok(())
}

fn cmd_init_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    config
        .to_yaml(path)
        .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;

    println!("Configuration written to {}", path.display());

    Ok(())
}
