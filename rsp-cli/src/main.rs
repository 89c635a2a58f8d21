//! rsp-dem-disparity: low-resolution disparity of a stereo pair from a DEM

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nalgebra::{Matrix3, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rsp_core::coordinate::Datum;
use rsp_core::progress::LogProgress;
use rsp_core::tile::ExecutionMode;
use rsp_core::transform::{HomographyTransform, TransformSource};
use rsp_core::view::{create_mask, ImageViewRef, RasterView};
use rsp_core::Masked;
use rsp_io::{image_size, load_camera, read_raster, write_masked_pair};
use rsp_matching::{estimate_search_range, produce_dem_disparity, DemDisparityOptions, StereoInputs};

#[derive(Parser)]
#[command(name = "rsp-dem-disparity")]
#[command(author, version, about = "Estimate low-resolution stereo disparity from a DEM", long_about = None)]
struct Cli {
    /// Left full-resolution image
    left_image: PathBuf,
    /// Right full-resolution image
    right_image: PathBuf,
    /// Left camera (JSON description or *_RPC.TXT)
    left_camera: PathBuf,
    /// Right camera
    right_camera: PathBuf,
    /// Reference DEM (GeoTIFF)
    dem: PathBuf,
    /// Output prefix; writes <prefix>-D_sub.tif and <prefix>-D_sub_spread.tif
    output_prefix: PathBuf,

    /// Low-resolution left image (defaults to the full image)
    #[arg(long)]
    left_sub: Option<PathBuf>,
    /// Low-resolution right image (defaults to the full image)
    #[arg(long)]
    right_sub: Option<PathBuf>,

    /// JSON file with a 3x3 row-major matrix aligning the left image
    #[arg(long)]
    left_align: Option<PathBuf>,
    /// JSON file with a 3x3 row-major matrix aligning the right image
    #[arg(long)]
    right_align: Option<PathBuf>,

    /// JSON configuration, overridden by the flags below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Expected DEM vertical error in metres
    #[arg(long)]
    dem_error: Option<f64>,
    /// Evaluate one low-res pixel in every N along each axis
    #[arg(long)]
    pixel_sample: Option<usize>,
    /// DEM datum: WGS84, Moon, Mars or planar
    #[arg(long)]
    datum: Option<String>,
    /// DEM no-data value, if the file does not declare one
    #[arg(long)]
    dem_nodata: Option<f32>,
    /// User search range min_x,min_y,max_x,max_y (ignored, the DEM decides)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    search_range: Option<Vec<f64>>,
    /// Worker threads; 1 runs serially
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Settings that can be kept in a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DemDisparityConfig {
    datum: Option<String>,
    dem_nodata: Option<f32>,
    #[serde(flatten)]
    disparity: DemDisparityOptions,
}

impl DemDisparityConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    fn apply_flags(mut self, cli: &Cli) -> Result<Self> {
        if let Some(dem_error) = cli.dem_error {
            self.disparity.dem_error = dem_error;
        }
        if let Some(pixel_sample) = cli.pixel_sample {
            self.disparity.pixel_sample = pixel_sample;
        }
        if cli.datum.is_some() {
            self.datum.clone_from(&cli.datum);
        }
        if cli.dem_nodata.is_some() {
            self.dem_nodata = cli.dem_nodata;
        }
        if let Some(range) = &cli.search_range {
            let [min_x, min_y, max_x, max_y] = range[..] else {
                bail!("search range needs four values, got {}", range.len());
            };
            self.disparity.search_range = Some([min_x, min_y, max_x, max_y]);
        }
        match cli.threads {
            Some(0) => bail!("thread count must be at least 1"),
            Some(1) => self.disparity.execution = ExecutionMode::Serial,
            Some(n) => self.disparity.execution = ExecutionMode::ParallelWith(n),
            None => {}
        }
        Ok(self)
    }

    fn datum(&self) -> Result<Datum> {
        match self.datum.as_deref() {
            None => Ok(Datum::wgs84()),
            Some(name) => Datum::from_name(name).with_context(|| format!("Unknown datum: {name}")),
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")
}

fn load_alignment(path: Option<&Path>) -> Result<TransformSource> {
    let Some(path) = path else {
        return Ok(TransformSource::identity());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read alignment {}", path.display()))?;
    let rows: [[f64; 3]; 3] = serde_json::from_str(&text)
        .with_context(|| format!("Alignment {} is not a 3x3 matrix", path.display()))?;
    let homography = HomographyTransform::new(Matrix3::from_fn(|r, c| rows[r][c]))
        .with_context(|| format!("Invalid alignment {}", path.display()))?;
    Ok(TransformSource::new(homography))
}

fn size_of(path: &Path) -> Result<(usize, usize)> {
    let size = image_size(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if size.0 == 0 || size.1 == 0 {
        bail!("{} is empty", path.display());
    }
    Ok(size)
}

fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn run(cli: Cli) -> Result<()> {
    let config = DemDisparityConfig::load(cli.config.as_deref())?.apply_flags(&cli)?;
    let datum = config.datum()?;

    let left_full = size_of(&cli.left_image)?;
    let left_sub = size_of(cli.left_sub.as_deref().unwrap_or(&cli.left_image))?;
    let right_sub = size_of(cli.right_sub.as_deref().unwrap_or(&cli.right_image))?;
    let scale = Vector2::new(
        left_sub.0 as f64 / left_full.0 as f64,
        left_sub.1 as f64 / left_full.1 as f64,
    );
    info!(
        "left image {}x{}, low-res {}x{}, scale ({:.4}, {:.4})",
        left_full.0, left_full.1, left_sub.0, left_sub.1, scale.x, scale.y
    );

    let left_camera = load_camera(&cli.left_camera)
        .with_context(|| format!("Failed to load camera {}", cli.left_camera.display()))?;
    let right_camera = load_camera(&cli.right_camera)
        .with_context(|| format!("Failed to load camera {}", cli.right_camera.display()))?;

    let mut dem = read_raster(&cli.dem, datum)
        .with_context(|| format!("Failed to read DEM {}", cli.dem.display()))?;
    if dem.nodata().is_none() {
        dem = dem.with_nodata(config.dem_nodata);
    }
    let dem_georef = dem.georef().cloned();
    if dem_georef.is_none() {
        warn!("{} has no georeference", cli.dem.display());
    }
    let nodata = dem.nodata();
    let dem_view: ImageViewRef<Masked<f32>> = Arc::new(create_mask(RasterView::new(dem), nodata));

    let inputs = StereoInputs {
        left_camera,
        right_camera,
        tx_left: load_alignment(cli.left_align.as_deref())?,
        tx_right: load_alignment(cli.right_align.as_deref())?,
        left_lowres_size: left_sub,
        right_lowres_size: right_sub,
        downsample_scale: scale,
        dem: dem_view,
        dem_georef,
    };

    let start = Instant::now();
    let progress = LogProgress::new("DEM disparity");
    let products = produce_dem_disparity(inputs, config.disparity, &progress)
        .context("Failed to compute low-resolution disparity")?;
    info!("disparity computed in {:.2?}", start.elapsed());

    let disparity_path = output_path(&cli.output_prefix, "-D_sub.tif");
    let spread_path = output_path(&cli.output_prefix, "-D_sub_spread.tif");
    write_masked_pair(&disparity_path, &products.disparity, None, &LogProgress::new("writing disparity"))
        .with_context(|| format!("Failed to write {}", disparity_path.display()))?;
    write_masked_pair(&spread_path, &products.spread, None, &LogProgress::new("writing spread"))
        .with_context(|| format!("Failed to write {}", spread_path.display()))?;

    match estimate_search_range(&products.disparity, &products.spread, scale)? {
        Some(range) => info!(
            "full-resolution search range: ({}, {}) to ({}, {})",
            range.min.x, range.min.y, range.max.x, range.max.y
        ),
        None => warn!("no low-resolution pixel has a disparity; check the DEM and cameras"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    run(cli)
}
