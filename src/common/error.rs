use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollcallError {
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("No frame available from camera")]
    FrameUnavailable,

    #[error("No gallery found at {0}. Please encode faces first.")]
    GalleryMissing(PathBuf),

    #[error("Gallery is corrupt: {0}")]
    GalleryCorrupt(String),

    #[error("Enrollment directory not found: {0}")]
    EnrollmentMissing(PathBuf),

    #[error("Cannot {operation} while {mode}")]
    InvalidModeForOperation {
        operation: &'static str,
        mode: &'static str,
    },

    #[error("Invalid identity name: {0:?}")]
    InvalidName(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RollcallError>;
