use std::sync::Arc;

use super::{Block, ImageView};
use crate::error::Result;
use crate::raster::{BBox2i, Pixel, Raster};

/// View over an in-memory raster
#[derive(Debug, Clone)]
pub struct RasterView<P: Pixel> {
    raster: Arc<Raster<P>>,
}

impl<P: Pixel> RasterView<P> {
    pub fn new(raster: Raster<P>) -> Self {
        Self {
            raster: Arc::new(raster),
        }
    }

    pub fn from_shared(raster: Arc<Raster<P>>) -> Self {
        Self { raster }
    }

    pub fn raster(&self) -> &Raster<P> {
        &self.raster
    }
}

impl<P: Pixel> ImageView for RasterView<P> {
    type Pixel = P;

    fn cols(&self) -> usize {
        self.raster.cols()
    }

    fn rows(&self) -> usize {
        self.raster.rows()
    }

    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<P>> {
        let mut out = Block::filled(*bbox);
        let inside = bbox.crop(&self.raster.bbox());
        if !inside.is_empty() {
            let src = self.raster.crop(&inside);
            out.copy_overlap(&Block::new(inside, src.into_array())?);
        }
        Ok(out)
    }
}
