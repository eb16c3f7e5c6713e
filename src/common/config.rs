use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::{RollcallError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_warmup_delay() -> u64 {
    50
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            warmup_frames: 2,
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::from("models/face_detector.onnx"),
            recognizer_path: PathBuf::from("models/face_recognizer.onnx"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
    #[serde(default = "default_max_faces")]
    pub max_faces: usize,
}

fn default_detection_confidence() -> f32 { 0.5 }
fn default_nms_iou() -> f32 { 0.45 }
fn default_max_faces() -> usize { 10 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            confidence_threshold: default_detection_confidence(),
            nms_iou_threshold: default_nms_iou(),
            max_faces: default_max_faces(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    pub input_size: u32,
    pub normalization_value: f32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: 112,
            normalization_value: 127.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatcherConfig {
    /// Maximum Euclidean distance (inclusive) for a gallery entry to count as a match.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
}

fn default_distance_threshold() -> f32 { 0.5 }

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { distance_threshold: default_distance_threshold() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_frame_interval() -> u64 { 100 }
fn default_jpeg_quality() -> u8 { 80 }
fn default_channel_capacity() -> usize { 2 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval(),
            jpeg_quality: default_jpeg_quality(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnnotationConfig {
    /// TrueType font used for labels instead of the bundled DejaVu Sans.
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default = "default_font_scale")]
    pub font_scale: f32,
    #[serde(default = "default_box_thickness")]
    pub box_thickness: u32,
}

fn default_font_scale() -> f32 { 20.0 }
fn default_box_thickness() -> u32 { 2 }

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_scale: default_font_scale(),
            box_thickness: default_box_thickness(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

/// Optional overrides for the directories picked by [`crate::DevMode`].
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub gallery_file: Option<PathBuf>,
    #[serde(default)]
    pub enrollment_dir: Option<PathBuf>,
    #[serde(default)]
    pub ledger_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/rollcall.toml";
        Self::load_from_path(Path::new(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RollcallError::Config(format!(
                "Config file not found: {}. Please create it from configs/rollcall.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| RollcallError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(RollcallError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(RollcallError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if !(self.matcher.distance_threshold > 0.0) {
            return Err(RollcallError::Config(format!(
                "Distance threshold must be positive, got {}",
                self.matcher.distance_threshold
            )));
        }
        if self.detector.confidence_threshold < 0.0 || self.detector.confidence_threshold > 1.0 {
            return Err(RollcallError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.confidence_threshold
            )));
        }

        if self.stream.frame_interval_ms < 1 || self.stream.frame_interval_ms > 10_000 {
            return Err(RollcallError::Config(format!(
                "Frame interval must be between 1 and 10000 ms, got {}",
                self.stream.frame_interval_ms
            )));
        }
        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return Err(RollcallError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}", self.stream.jpeg_quality
            )));
        }
        if self.stream.channel_capacity == 0 {
            return Err(RollcallError::Config("Stream channel capacity must be at least 1".into()));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(RollcallError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(RollcallError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }
        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(RollcallError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        Ok(())
    }
}
