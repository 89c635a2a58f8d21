use rsp_core::RspError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("image read error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("malformed input: {0}")]
    Parse(String),

    #[error(transparent)]
    Core(#[from] RspError),
}

pub type Result<T> = std::result::Result<T, IoError>;
