//! Lazily evaluated tiled image views.
//!
//! A view describes an image without materialising it. Pixels are only
//! computed when a region is requested through [`ImageView::prerasterize`],
//! which lets the scheduler evaluate large outputs one tile at a time.

mod block;
mod crop;
mod map;
mod raster_view;

pub use block::Block;
pub use crop::CropView;
pub use map::{create_mask, MapView};
pub use raster_view::RasterView;

use std::sync::Arc;

use ndarray::ArrayViewMut2;

use crate::error::{Result, RspError};
use crate::raster::{BBox2i, Pixel};

/// An image whose pixels are produced on demand, region by region.
///
/// Requests may extend past the view's domain; those pixels come back as
/// `Pixel::default()`. Evaluating the same region twice yields identical
/// blocks.
pub trait ImageView: Send + Sync {
    type Pixel: Pixel;

    fn cols(&self) -> usize;

    fn rows(&self) -> usize;

    fn planes(&self) -> usize {
        1
    }

    /// Domain of the view in its own pixel space
    fn bbox(&self) -> BBox2i {
        BBox2i::from_size(self.cols(), self.rows())
    }

    /// Dense block covering exactly `bbox`
    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<Self::Pixel>>;

    /// Evaluate `bbox` into a caller-owned buffer of the same shape
    fn rasterize(&self, mut dest: ArrayViewMut2<'_, Self::Pixel>, bbox: &BBox2i) -> Result<()> {
        if dest.dim() != (bbox.height(), bbox.width()) {
            return Err(RspError::InvalidInput(format!(
                "destination is {:?} but region {:?} is {}x{}",
                dest.dim(),
                bbox,
                bbox.height(),
                bbox.width()
            )));
        }
        let block = self.prerasterize(bbox)?;
        dest.assign(block.data());
        Ok(())
    }
}

/// Shared, type-erased handle to a view
pub type ImageViewRef<P> = Arc<dyn ImageView<Pixel = P>>;

impl<V: ImageView + ?Sized> ImageView for Arc<V> {
    type Pixel = V::Pixel;

    fn cols(&self) -> usize {
        (**self).cols()
    }

    fn rows(&self) -> usize {
        (**self).rows()
    }

    fn planes(&self) -> usize {
        (**self).planes()
    }

    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<Self::Pixel>> {
        (**self).prerasterize(bbox)
    }
}

impl<V: ImageView + ?Sized> ImageView for &V {
    type Pixel = V::Pixel;

    fn cols(&self) -> usize {
        (**self).cols()
    }

    fn rows(&self) -> usize {
        (**self).rows()
    }

    fn planes(&self) -> usize {
        (**self).planes()
    }

    fn prerasterize(&self, bbox: &BBox2i) -> Result<Block<Self::Pixel>> {
        (**self).prerasterize(bbox)
    }
}
