use crate::common::{Result, Config};
use crate::core::detector::{build_session, FaceBox};
use ort::{Environment, Session, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

pub type Embedding = Vec<f32>;

pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    config: Config,
}

impl FaceRecognizer {
    pub fn new_with_model_path(config: &Config, models_base: &Path) -> Result<Self> {
        let mut model_path = config.models.recognizer_path.clone();
        if model_path.is_relative() {
            model_path = models_base.join(&model_path);
        }
        let (environment, session) = build_session("face_recognizer", &model_path, config)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    pub fn new(config: &Config) -> Result<Self> {
        let (environment, session) =
            build_session("face_recognizer", &config.models.recognizer_path, config)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    pub fn get_embedding(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = crop_face(image, face);

        let size = self.config.recognizer.input_size;
        let resized = face_img.resize_exact(size, size, FilterType::Triangle);

        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;

        let mut embedding = outputs[0].try_extract::<f32>()?.view().to_owned().into_raw_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let rgb = img.to_rgb8();
        let size = self.config.recognizer.input_size as usize;
        let norm_val = self.config.recognizer.normalization_value;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));

        // ArcFace-style (x - 127.5) / 127.5 per channel
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                array[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - norm_val) / norm_val;
            }
        }

        array
    }
}

fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = (face.x2 - face.x1).max(1.0) as u32;
    let height = (face.y2 - face.y1).max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

pub fn l2_normalize(embedding: &mut [f32]) {
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in embedding.iter_mut() {
            *value /= norm;
        }
    }
}
