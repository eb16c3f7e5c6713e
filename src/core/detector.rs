use crate::common::{RollcallError, Result, Config};
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};
use serde::{Deserialize, Serialize};

/// Face location in pixel coordinates, in the (top, right, bottom, left)
/// order used by the annotator and the enrollment report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn to_bounding_box(&self) -> BoundingBox {
        BoundingBox {
            top: self.y1.max(0.0).round() as u32,
            right: self.x2.max(0.0).round() as u32,
            bottom: self.y2.max(0.0).round() as u32,
            left: self.x1.max(0.0).round() as u32,
        }
    }
}

/// Creates an ONNX Runtime session for `model_path` with the configured optimization level.
pub(crate) fn build_session(
    name: &str,
    model_path: &Path,
    config: &Config,
) -> Result<(Arc<Environment>, Session)> {
    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .build()
            .map_err(|e| RollcallError::Model(format!("Failed to create environment: {}", e)))?
    );

    if !model_path.exists() {
        return Err(RollcallError::Model(
            format!("{} model not found at: {:?}", name, model_path)
        ));
    }

    let opt_level = match config.performance.optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };
    let session = SessionBuilder::new(&environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;

    Ok((environment, session))
}

/// YOLO-style single-class face detector.
pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: Config,
}

impl FaceDetector {
    pub fn new_with_model_path(config: &Config, models_base: &Path) -> Result<Self> {
        let mut model_path = config.models.detector_path.clone();
        if model_path.is_relative() {
            model_path = models_base.join(&model_path);
        }
        let (environment, session) = build_session("face_detector", &model_path, config)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    pub fn new(config: &Config) -> Result<Self> {
        let (environment, session) =
            build_session("face_detector", &config.models.detector_path, config)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;
        let input_width = self.config.detector.input_width;
        let input_height = self.config.detector.input_height;

        let img_array = if image.width() == input_width && image.height() == input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(input_width, input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        // Scale back to the caller's image dimensions
        let scale_x = orig_width / input_width as f32;
        let scale_y = orig_height / input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
            array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
            array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<FaceBox>> {
        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };

        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let output_array = output
            .as_slice()
            .ok_or_else(|| RollcallError::Model("Detector output is not contiguous".into()))?;

        let faces = decode_predictions(
            output_array,
            &shape,
            self.config.detector.input_width as f32,
            self.config.detector.input_height as f32,
        );

        // NMS first on everything, then the confidence cut
        let mut faces = apply_nms(faces, self.config.detector.nms_iou_threshold);
        faces.retain(|face| face.confidence >= self.config.detector.confidence_threshold);
        faces.truncate(self.config.detector.max_faces);

        Ok(faces)
    }
}

/// Turns raw YOLO-style rows (`cx, cy, w, h, confidence, ...`) into boxes in
/// detector input coordinates. Accepts `[1, N, 5+]`, `[1, 5+, N]` and `[N, 5+]`.
pub fn decode_predictions(
    output_array: &[f32],
    shape: &[usize],
    input_width: f32,
    input_height: f32,
) -> Vec<FaceBox> {
    // [1, N, 5+] or transposed [1, 5+, N]
    let (num_predictions, prediction_length, is_transposed) = if shape.len() >= 3 {
        if shape[2] > shape[1] && shape[1] <= 10 {
            (shape[2], shape[1], true)
        } else {
            (shape[1], shape[2], false)
        }
    } else if shape.len() == 2 {
        (shape[0], shape[1], false)
    } else {
        tracing::warn!("Unexpected detector output shape: {:?}", shape);
        return Vec::new();
    };

    if prediction_length < 5 {
        tracing::warn!("Detector output has no confidence column: {:?}", shape);
        return Vec::new();
    }

    let mut faces = Vec::new();

    for i in 0..num_predictions {
        let at = |column: usize| {
            if is_transposed {
                output_array[column * num_predictions + i]
            } else {
                output_array[i * prediction_length + column]
            }
        };
        let (cx, cy, w, h, confidence) = (at(0), at(1), at(2), at(3), at(4));

        if confidence <= 0.001 {
            continue;
        }

        // Normalized outputs are scaled into detector input space
        let (sx, sy) = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 {
            (1.0, 1.0)
        } else {
            (input_width, input_height)
        };
        let (cx, cy, w, h) = (cx * sx, cy * sy, w * sx, h * sy);

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_width);
        let y2 = (cy + h / 2.0).min(input_height);

        if x2 - x1 > 10.0 && y2 - y1 > 10.0 {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }

    faces
}

/// Greedy non-maximum suppression; output is sorted by descending confidence.
pub fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

pub fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1.x2 - box1.x1) * (box1.y2 - box1.y1);
    let area2 = (box2.x2 - box2.x1) * (box2.y2 - box2.y1);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
