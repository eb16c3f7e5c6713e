use crate::camera::{DeviceOpener, Frame, FrameSource};
use crate::common::{RollcallError, Result, Config};
use crate::common::config::CameraConfig;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use std::fs;
use std::time::Duration;

/// Upper bound on a single blocking dequeue.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
    pub can_capture: bool,
}

/// Scans `/dev/video*` and reports what each device can do.
pub fn list_cameras() -> Result<Vec<CameraInfo>> {
    let mut cameras = Vec::new();

    for entry in fs::read_dir("/dev")? {
        let path = entry?.path();
        let Some(index) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("video"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };

        let Ok(device) = Device::new(index as usize) else { continue };
        let Ok(caps) = device.query_caps() else { continue };

        let formats = device
            .enum_formats()
            .unwrap_or_default()
            .iter()
            .map(|fmt| fmt.fourcc.str().unwrap_or("UNKNOWN").to_string())
            .collect();

        cameras.push(CameraInfo {
            index,
            name: caps.card.clone(),
            formats,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
        });
    }

    cameras.sort_by_key(|c| c.index);
    Ok(cameras)
}

/// Opens `/dev/video<device_index>` on demand.
pub struct V4l2Opener {
    config: CameraConfig,
}

impl V4l2Opener {
    pub fn new(config: &Config) -> Self {
        Self { config: config.camera.clone() }
    }
}

impl DeviceOpener for V4l2Opener {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(V4l2Source::open(&self.config)?))
    }
}

pub struct V4l2Source {
    stream: Stream<'static>,
    format: v4l::Format,
    _device: Device,
}

impl V4l2Source {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = config.device_index;
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| RollcallError::DeviceUnavailable(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| RollcallError::DeviceUnavailable(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture: {:?}", index, caps.capabilities);
        }

        let mut fmt = device.format()
            .map_err(|e| RollcallError::Camera(format!("Failed to get format: {}", e)))?;

        fmt.width = config.width;
        fmt.height = config.height;
        // Grayscale sensors keep GREY, everything else is asked for MJPG
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| RollcallError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "Camera format: {}x{} {}",
            format.width,
            format.height,
            format.fourcc.str().unwrap_or("UNKNOWN")
        );

        let mut stream = Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| RollcallError::DeviceUnavailable(format!("Failed to create stream: {}", e)))?;
        stream.set_timeout(READ_TIMEOUT);

        for i in 0..config.warmup_frames {
            if let Err(e) = stream.next() {
                tracing::debug!("Warmup frame {} failed: {}", i, e);
            }
            std::thread::sleep(Duration::from_millis(config.warmup_delay_ms));
        }
        tracing::info!("Camera ready");

        Ok(Self { stream, format, _device: device })
    }
}

impl FrameSource for V4l2Source {
    fn read(&mut self) -> Result<Frame> {
        let (buf, _meta) = self.stream.next()
            .map_err(|e| RollcallError::Camera(format!("Failed to capture: {}", e)))?;

        decode_frame(&self.format.fourcc.repr, buf, self.format.width, self.format.height)
    }
}

pub fn decode_frame(fourcc: &[u8; 4], data: &[u8], width: u32, height: u32) -> Result<Frame> {
    match fourcc {
        b"GREY" => {
            let expected = (width * height) as usize;
            let pixels = data.get(..expected)
                .ok_or_else(|| RollcallError::Camera("Short grayscale buffer".into()))?;
            let img = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| RollcallError::Camera("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        b"YUYV" => yuyv_to_rgb(data, width, height),
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        other => Err(RollcallError::Camera(format!(
            "Unsupported pixel format {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected || width % 2 != 0 {
        return Err(RollcallError::Camera("Short or misaligned YUYV buffer".into()));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    let img = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| RollcallError::Camera("Failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(img))
}
