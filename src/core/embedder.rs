use crate::common::{Config, Result};
use crate::core::detector::{BoundingBox, FaceDetector};
use crate::core::recognizer::{Embedding, FaceRecognizer};
use image::DynamicImage;
use std::path::Path;

/// One face found in an image.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Finds every face in an image and produces one embedding per face.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Detector and recognizer ONNX models run back to back.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            detector: FaceDetector::new(config)?,
            recognizer: FaceRecognizer::new(config)?,
        })
    }

    /// Resolves relative model paths against `models_base`.
    pub fn new_with_model_path(config: &Config, models_base: &Path) -> Result<Self> {
        Ok(Self {
            detector: FaceDetector::new_with_model_path(config, models_base)?,
            recognizer: FaceRecognizer::new_with_model_path(config, models_base)?,
        })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let faces = self.detector.detect(image)?;
        tracing::debug!("Detected {} face(s)", faces.len());

        faces
            .iter()
            .map(|face| {
                Ok(Detection {
                    bbox: face.to_bounding_box(),
                    embedding: self.recognizer.get_embedding(image, face)?,
                })
            })
            .collect()
    }
}
