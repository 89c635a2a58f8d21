//! Disparity estimation for stereo pairs

pub mod dem_disparity;
pub mod search_range;

pub use dem_disparity::{
    disparity_range, produce_dem_disparity, DemDisparityOptions, DemDisparityProducts,
    DemDisparityView, DispEstimate, StereoInputs,
};
pub use search_range::estimate_search_range;
