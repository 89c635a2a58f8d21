//! Sensor models (RPC, pushbroom, panoramic)

pub mod linescan;
pub mod optical_bar;
pub mod rpc;

pub use linescan::{Ephemeris, LinescanCamera};
pub use optical_bar::OpticalBarCamera;
pub use rpc::{RpcCoefficients, RpcModel};
