//! Raster data structures: bounding boxes, masked pixels, grids and interpolation

mod bbox;
mod grid;
mod interp;
mod pixel;

pub use bbox::{BBox2f, BBox2i};
pub use grid::Raster;
pub use interp::{bilinear_masked, dem_height_guess, HeightField};
pub use pixel::{mask_nodata, Masked, Pixel};
