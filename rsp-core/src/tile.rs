//! Tiled, data-parallel rasterization of image views

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, ArrayViewMut2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RspError};
use crate::progress::ProgressSink;
use crate::raster::BBox2i;
use crate::view::{Block, ImageView};

pub const DEFAULT_TILE_SIZE: usize = 256;

/// How tiles are distributed over threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Global rayon pool
    #[default]
    Parallel,
    /// Dedicated pool with the given number of threads
    ParallelWith(usize),
    /// One tile at a time on the calling thread
    Serial,
}

/// Splits a view's domain into tiles and evaluates them into one output
/// buffer. Each tile writes only its own disjoint window of the output.
#[derive(Debug, Clone, Copy)]
pub struct TileScheduler {
    tile_cols: usize,
    tile_rows: usize,
    mode: ExecutionMode,
}

impl Default for TileScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TileScheduler {
    pub fn new() -> Self {
        Self {
            tile_cols: DEFAULT_TILE_SIZE,
            tile_rows: DEFAULT_TILE_SIZE,
            mode: ExecutionMode::Parallel,
        }
    }

    pub fn with_tile_size(mut self, cols: usize, rows: usize) -> Self {
        self.tile_cols = cols;
        self.tile_rows = rows;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn tile_size(&self) -> (usize, usize) {
        (self.tile_cols, self.tile_rows)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn validate(&self) -> Result<()> {
        if self.tile_cols == 0 || self.tile_rows == 0 {
            return Err(RspError::Config(format!(
                "tile size must be positive, got {}x{}",
                self.tile_cols, self.tile_rows
            )));
        }
        if self.mode == ExecutionMode::ParallelWith(0) {
            return Err(RspError::Config("thread count must be positive".to_string()));
        }
        Ok(())
    }

    /// Row-major list of tiles covering `region`; edge tiles are clipped
    pub fn tiles(&self, region: &BBox2i) -> Vec<BBox2i> {
        let mut tiles = Vec::new();
        if region.is_empty() || self.tile_cols == 0 || self.tile_rows == 0 {
            return tiles;
        }
        let (tc, tr) = (self.tile_cols as i32, self.tile_rows as i32);
        let mut y = region.min_y;
        while y < region.max_y {
            let mut x = region.min_x;
            while x < region.max_x {
                tiles.push(BBox2i::new(
                    x,
                    y,
                    (x + tc).min(region.max_x),
                    (y + tr).min(region.max_y),
                ));
                x += tc;
            }
            y += tr;
        }
        tiles
    }

    /// Evaluate the whole view
    pub fn rasterize<V>(&self, view: &V, progress: &dyn ProgressSink) -> Result<Array2<V::Pixel>>
    where
        V: ImageView + ?Sized,
    {
        self.rasterize_region(view, &view.bbox(), progress)
    }

    /// Evaluate `region` of the view. The result's `[[0, 0]]` is `region.min`.
    ///
    /// The whole region is held in memory; use [`TileScheduler::stream_region`]
    /// when the output is too large for that.
    pub fn rasterize_region<V>(
        &self,
        view: &V,
        region: &BBox2i,
        progress: &dyn ProgressSink,
    ) -> Result<Array2<V::Pixel>>
    where
        V: ImageView + ?Sized,
    {
        self.validate()?;

        let mut out = Array2::default((region.height(), region.width()));
        let jobs = self.split(out.view_mut(), region);
        let total = jobs.len();
        let done = AtomicUsize::new(0);
        debug!("rasterizing {:?} as {} tiles ({:?})", region, total, self.mode);

        self.dispatch(jobs, |(bbox, dest)| {
            view.rasterize(dest, &bbox)?;
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report(finished as f64 / total as f64);
            Ok(())
        })?;

        progress.finished();
        Ok(out)
    }

    /// Evaluate `region` tile by tile and hand each block to `sink` as soon as
    /// it is done, so only the tiles in flight are held in memory.
    ///
    /// Blocks arrive in row-major order in `Serial` mode and in completion
    /// order otherwise. The first error from a tile or from `sink` stops the
    /// pass.
    pub fn stream_region<V, F>(
        &self,
        view: &V,
        region: &BBox2i,
        progress: &dyn ProgressSink,
        sink: F,
    ) -> Result<()>
    where
        V: ImageView + ?Sized,
        F: Fn(Block<V::Pixel>) -> Result<()> + Send + Sync,
    {
        self.validate()?;

        let tiles = self.tiles(region);
        let total = tiles.len();
        let done = AtomicUsize::new(0);
        debug!("streaming {:?} as {} tiles ({:?})", region, total, self.mode);

        self.dispatch(tiles, |bbox| {
            sink(view.prerasterize(&bbox)?)?;
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.report(finished as f64 / total as f64);
            Ok(())
        })?;

        progress.finished();
        Ok(())
    }

    fn dispatch<J, F>(&self, jobs: Vec<J>, run: F) -> Result<()>
    where
        J: Send,
        F: Fn(J) -> Result<()> + Send + Sync,
    {
        match self.mode {
            ExecutionMode::Serial => jobs.into_iter().try_for_each(run),
            ExecutionMode::Parallel => jobs.into_par_iter().try_for_each(run),
            ExecutionMode::ParallelWith(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| RspError::Config(format!("failed to build thread pool: {e}")))?;
                pool.install(|| jobs.into_par_iter().try_for_each(run))
            }
        }
    }

    /// Cut the output buffer into disjoint tile windows
    fn split<'a, P>(
        &self,
        out: ArrayViewMut2<'a, P>,
        region: &BBox2i,
    ) -> Vec<(BBox2i, ArrayViewMut2<'a, P>)> {
        let mut jobs = Vec::new();
        let mut rest = out;
        let mut y = region.min_y;
        while rest.nrows() > 0 {
            let h = self.tile_rows.min(rest.nrows());
            let (mut band, tail) = rest.split_at(Axis(0), h);
            rest = tail;

            let mut x = region.min_x;
            while band.ncols() > 0 {
                let w = self.tile_cols.min(band.ncols());
                let (tile, tail) = band.split_at(Axis(1), w);
                band = tail;
                jobs.push((BBox2i::new(x, y, x + w as i32, y + h as i32), tile));
                x += w as i32;
            }
            y += h as i32;
        }
        jobs
    }
}
