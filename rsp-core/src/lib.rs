//! Core geometry, camera models and the tiled image-view engine

pub mod camera;
pub mod coordinate;
pub mod error;
pub mod intersect;
pub mod progress;
pub mod raster;
pub mod sensor;
pub mod tile;
pub mod transform;
pub mod view;

pub use camera::{CameraKind, CameraModel, CameraRef, LegacyCamera, PinholeCamera};
pub use coordinate::{Datum, GeoTransform, Georeference, Projection};
pub use error::{CoordinateError, ProjectionError, Result, RspError};
pub use intersect::{view_height_guess, IntersectionOptions, RayDemIntersector, ViewHeightField};
pub use progress::{LogProgress, NullProgress, ProgressSink};
pub use raster::{BBox2f, BBox2i, Masked, Raster};
pub use sensor::{Ephemeris, LinescanCamera, OpticalBarCamera, RpcCoefficients, RpcModel};
pub use tile::{ExecutionMode, TileScheduler};
pub use transform::{
    HomographyTransform, IdentityTransform, MapProjectTransform, PixelTransform, TransformSource,
};
pub use view::{create_mask, Block, CropView, ImageView, ImageViewRef, MapView, RasterView};
