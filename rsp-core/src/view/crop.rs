use super::{Block, ImageView};
use crate::error::Result;
use crate::raster::BBox2i;

/// Sub-window of an upstream view. Pixel `(0, 0)` of the crop is
/// `window.min` upstream.
pub struct CropView<V> {
    inner: V,
    window: BBox2i,
}

impl<V: ImageView> CropView<V> {
    pub fn new(inner: V, window: BBox2i) -> Self {
        Self { inner, window }
    }

    pub fn window(&self) -> &BBox2i {
        &self.window
    }
}

impl<V: ImageView> ImageView for CropView<V> {
    type Pixel = V::Pixel;

    fn cols(&self) -> usize {
        self.window.width()
    }

    fn rows(&self) -> usize {
        self.window.height()
    }

    fn planes(&self) -> usize {
        self.inner.planes()
    }

    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<V::Pixel>> {
        let mut out = Block::filled(*bbox);
        let local = bbox.crop(&self.bbox());
        if local.is_empty() {
            return Ok(out);
        }
        let upstream = local.translated(self.window.min_x, self.window.min_y);
        let src = self.inner.prerasterize(&upstream)?;
        out.copy_overlap(&Block::new(local, src.into_data())?);
        Ok(out)
    }
}
