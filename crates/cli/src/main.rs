//! landslip CLI - coseismic landslide change detection

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use landslip_core::io::read_geotiff;
use landslip_core::{
    Bounds, ImageStack, Raster, Scene, SceneCollection, SceneFilter, SceneStore,
};
use landslip_pipeline::export::{export_raster, export_stack, ExportParams};
use landslip_pipeline::pipeline::{self, PipelineParams};
use landslip_pipeline::terrain::{masked_slope, slope, SlopeUnits, TerrainParams};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "landslip")]
#[command(author, version, about = "Coseismic landslide change detection", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Calculate (optionally relief-masked) slope from a DEM
    Slope {
        /// Input DEM file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Output units: degrees, percent, radians
        #[arg(short, long, default_value = "degrees")]
        units: String,
        /// Horizontal unit conversion (~111320 for lat/lon grids)
        #[arg(short, long, default_value = "1.0")]
        z_factor: f64,
        /// Mask out slopes below this threshold
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Run the full change-detection pipeline from a JSON config
    Run {
        /// Pipeline configuration file
        config: PathBuf,
    },
}

// ─── Pipeline configuration ─────────────────────────────────────────────

/// One scene in the manifest: band GeoTIFFs keyed by band name, plus the
/// QA bitmask file and acquisition metadata.
#[derive(Debug, serde::Deserialize)]
struct SceneEntry {
    date: NaiveDate,
    cloud_cover: f64,
    qa: PathBuf,
    bands: BTreeMap<String, PathBuf>,
}

#[derive(Debug, serde::Deserialize)]
struct RunConfig {
    /// Scene manifest
    scenes: Vec<SceneEntry>,
    /// Elevation model covering the region
    dem: PathBuf,
    /// Region of interest
    region: Bounds,
    /// Scene-level cloud cover threshold (percent)
    #[serde(default = "default_cloud_cover")]
    max_cloud_cover: f64,
    /// Stage parameters
    pipeline: PipelineParams,
    /// Export settings for all written rasters
    #[serde(default)]
    export: ExportParams,
    /// Directory the outputs land in
    output_dir: PathBuf,
    /// Also write the pre/post index stacks and the change image
    #[serde(default)]
    write_intermediates: bool,
}

fn default_cloud_cover() -> f64 {
    10.0
}

/// Manifest-backed scene store: reads band and QA GeoTIFFs from disk and
/// applies the filter predicates. The DEM file is assumed to be pre-clipped
/// to the region of interest.
struct ManifestStore {
    entries: Vec<SceneEntry>,
    dem: PathBuf,
}

impl SceneStore for ManifestStore {
    fn scenes(&self, filter: &SceneFilter) -> landslip_core::Result<SceneCollection> {
        let mut scenes = Vec::new();
        for entry in &self.entries {
            if !filter.dates.contains(entry.date) || entry.cloud_cover > filter.max_cloud_cover {
                continue;
            }
            let mut bands = ImageStack::new();
            for (name, path) in &entry.bands {
                bands.push(name.clone(), read_geotiff::<f64, _>(path)?)?;
            }
            let qa: Raster<u16> = read_geotiff(&entry.qa)?;
            scenes.push(Scene::new(bands, qa, entry.date, entry.cloud_cover)?);
        }
        SceneCollection::from_scenes(scenes, filter.clone())
    }

    fn elevation(&self, _bounds: &Bounds) -> landslip_core::Result<Raster<f64>> {
        read_geotiff(&self.dem)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_f64(path: &Path) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> =
        read_geotiff(path).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_units(s: &str) -> SlopeUnits {
    match s.to_lowercase().as_str() {
        "degrees" | "deg" | "d" => SlopeUnits::Degrees,
        "percent" | "pct" | "%" => SlopeUnits::Percent,
        "radians" | "rad" | "r" => SlopeUnits::Radians,
        _ => {
            eprintln!("Unknown units: {}. Using degrees.", s);
            SlopeUnits::Degrees
        }
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_f64(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = raster.crs() {
                println!("CRS: {}", crs);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len() as f64
            );
        }

        // ── Slope ────────────────────────────────────────────────────
        Commands::Slope {
            input,
            output,
            units,
            z_factor,
            threshold,
        } => {
            let params = TerrainParams {
                units: parse_units(&units),
                z_factor,
                slope_threshold: threshold.unwrap_or_default(),
            };
            let dem = read_f64(&input)?;
            let start = Instant::now();
            let result = if threshold.is_some() {
                masked_slope(&dem, &params).context("Failed to calculate masked slope")?
            } else {
                slope(&dem, &params).context("Failed to calculate slope")?
            };
            let elapsed = start.elapsed();

            let pb = spinner("Writing output...");
            landslip_core::io::write_geotiff(&result, &output)
                .context("Failed to write output")?;
            pb.finish_and_clear();
            done("Slope", &output, elapsed);
        }

        // ── Run ──────────────────────────────────────────────────────
        Commands::Run { config } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let cfg: RunConfig =
                serde_json::from_str(&text).context("Failed to parse pipeline config")?;

            if cfg.scenes.is_empty() {
                anyhow::bail!("Config lists no scenes");
            }

            let filter = SceneFilter {
                bounds: cfg.region,
                dates: cfg.pipeline.pre_interval.span(&cfg.pipeline.post_interval),
                max_cloud_cover: cfg.max_cloud_cover,
            };
            let store = ManifestStore {
                entries: cfg.scenes,
                dem: cfg.dem,
            };

            let pb = spinner("Loading scenes...");
            let collection = store
                .scenes(&filter)
                .context("Failed to load scene collection")?;
            let dem = store
                .elevation(&cfg.region)
                .context("Failed to load elevation model")?;
            pb.finish_and_clear();
            info!(
                "Loaded {} scenes on a {} x {} grid",
                collection.len(),
                collection.shape().1,
                collection.shape().0
            );

            let start = Instant::now();
            let output = pipeline::run(&collection, &dem, &cfg.pipeline)
                .context("Pipeline run failed")?;
            let elapsed = start.elapsed();

            std::fs::create_dir_all(&cfg.output_dir).with_context(|| {
                format!("Failed to create {}", cfg.output_dir.display())
            })?;

            let pb = spinner("Writing outputs...");
            let labels_path = cfg.output_dir.join("kmeans_labels.tif");
            export_raster(&output.labels, &labels_path, &cfg.export)
                .context("Failed to export label image")?;

            if cfg.write_intermediates {
                export_stack(&output.pre_indices, &cfg.output_dir, "pre", &cfg.export)
                    .context("Failed to export pre-event indices")?;
                export_stack(&output.post_indices, &cfg.output_dir, "post", &cfg.export)
                    .context("Failed to export post-event indices")?;
                export_stack(&output.change, &cfg.output_dir, "change", &cfg.export)
                    .context("Failed to export change image")?;
            }
            pb.finish_and_clear();

            done("K-means labels", &labels_path, elapsed);
        }
    }

    Ok(())
}
