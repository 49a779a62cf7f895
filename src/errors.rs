use thiserror::Error;

use crate::camera_controller::Lifecycle;

/// Camera permission or hardware failure while opening a stream.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AcquisitionError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("no camera available: {0}")]
    Unavailable(String),

    #[error("camera device failed: {0}")]
    Device(String),

    #[error("camera acquisition interrupted")]
    Interrupted,
}

impl AcquisitionError {
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(format!("{}: {}", context, err)),
            std::io::ErrorKind::NotFound => Self::Unavailable(format!("{}: {}", context, err)),
            _ => Self::Device(format!("{}: {}", context, err)),
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera is not live (currently {0:?})")]
    NotLive(Lifecycle),

    #[error("frame has no decodable pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("failed to encode still: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum TextureDecodeError {
    #[error("failed to decode texture: {0}")]
    Decode(#[from] image::ImageError),

    #[error("decoded texture has zero size")]
    Empty,

    #[error("texture decode was interrupted")]
    Interrupted,
}
