//! Coordinate systems: datums, geodetic conversions, map projections and
//! raster georeferences

mod datum;
mod georef;
mod projection;
mod transforms;

pub use datum::Datum;
pub use georef::{GeoTransform, Georeference};
pub use projection::Projection;
pub use transforms::{ecef_to_lla, lla_to_ecef, EcefCoord, LlaCoord};
