pub mod v4l2;

use crate::common::{RollcallError, Result};
use image::DynamicImage;

pub use v4l2::{list_cameras, CameraInfo, V4l2Opener};

pub type Frame = DynamicImage;

/// An acquired capture device. Dropping it releases the device.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame>;
}

/// Acquires the capture device.
pub trait DeviceOpener: Send {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// Sole owner of the capture device handle.
///
/// Transitions are idempotent: starting an open session or stopping a
/// closed one does nothing.
pub struct CameraSession {
    opener: Box<dyn DeviceOpener>,
    device: Option<Box<dyn FrameSource>>,
}

impl CameraSession {
    pub fn new(opener: Box<dyn DeviceOpener>) -> Self {
        Self { opener, device: None }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        match self.opener.open() {
            Ok(device) => {
                tracing::info!("Camera session opened");
                self.device = Some(device);
                Ok(())
            }
            Err(RollcallError::DeviceUnavailable(msg)) => Err(RollcallError::DeviceUnavailable(msg)),
            Err(e) => Err(RollcallError::DeviceUnavailable(e.to_string())),
        }
    }

    pub fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::info!("Camera session closed");
        }
    }

    /// `None` when closed or when the device had no frame this time.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let device = self.device.as_mut()?;
        match device.read() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!("Frame read missed: {}", e);
                None
            }
        }
    }
}
