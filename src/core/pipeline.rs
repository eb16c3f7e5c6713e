use crate::camera::Frame;
use crate::common::{Config, Result};
use crate::core::annotate::Annotator;
use crate::core::controller::{lock_state, ControlState, Mode};
use crate::core::embedder::FaceEmbedder;
use crate::core::matcher::Matcher;
use crate::storage::{AttendanceLedger, Gallery, MarkOutcome};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// A JPEG-encoded output frame plus the label of every face drawn on it.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub labels: Vec<String>,
}

impl EncodedFrame {
    /// One part of a `multipart/x-mixed-replace` body.
    pub fn multipart_chunk(&self) -> Vec<u8> {
        let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MULTIPART_BOUNDARY);
        let mut chunk = Vec::with_capacity(header.len() + self.jpeg.len() + 2);
        chunk.extend_from_slice(header.as_bytes());
        chunk.extend_from_slice(&self.jpeg);
        chunk.extend_from_slice(b"\r\n");
        chunk
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(jpeg)
}

/// Per-frame work: recognize, record attendance, annotate, encode.
pub struct FramePipeline {
    embedder: Arc<dyn FaceEmbedder>,
    ledger: Arc<AttendanceLedger>,
    matcher: Matcher,
    annotator: Annotator,
    interval: Duration,
    jpeg_quality: u8,
}

impl FramePipeline {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn FaceEmbedder>,
        ledger: Arc<AttendanceLedger>,
    ) -> Result<Self> {
        Ok(Self {
            embedder,
            ledger,
            matcher: Matcher::new(config.matcher.distance_threshold),
            annotator: Annotator::new(&config.annotation)?,
            interval: Duration::from_millis(config.stream.frame_interval_ms),
            jpeg_quality: config.stream.jpeg_quality,
        })
    }

    /// Processes one frame under the given mode. `None` means the frame
    /// could not be encoded and nothing should be emitted.
    pub fn process_frame(&self, frame: Frame, mode: &Mode) -> Option<EncodedFrame> {
        let mut canvas = frame.to_rgb8();
        let mut labels = Vec::new();

        if let Mode::Attendance { gallery } = mode {
            if !gallery.is_empty() {
                labels = self.recognize(&frame, gallery, &mut canvas);
            }
        }

        match encode_jpeg(&canvas, self.jpeg_quality) {
            Ok(jpeg) => Some(EncodedFrame { jpeg, labels }),
            Err(e) => {
                tracing::warn!("Failed to encode frame: {}", e);
                None
            }
        }
    }

    fn recognize(&self, frame: &Frame, gallery: &Gallery, canvas: &mut RgbImage) -> Vec<String> {
        let detections = match self.embedder.embed(frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!("Face embedding failed, emitting frame unannotated: {}", e);
                return Vec::new();
            }
        };

        let mut labels = Vec::with_capacity(detections.len());
        for detection in &detections {
            let outcome = self.matcher.match_embedding(&detection.embedding, gallery);

            if let Some(name) = outcome.name() {
                match self.ledger.mark(name) {
                    Ok(MarkOutcome::Recorded) => tracing::info!("Attendance marked for {}", name),
                    Ok(MarkOutcome::AlreadyPresent) => {}
                    Err(e) => tracing::error!("Failed to record attendance for {}: {}", name, e),
                }
            }

            self.annotator.annotate(canvas, &detection.bbox, outcome.label());
            labels.push(outcome.label().to_string());
        }
        labels
    }

    /// Drives the pipeline until the camera session `session` ends or the
    /// receiving side of `tx` is dropped.
    pub(crate) fn run(&self, state: &Mutex<ControlState>, session: u64, tx: SyncSender<EncodedFrame>) {
        tracing::debug!("Frame pipeline started for session {}", session);

        loop {
            let (frame, mode) = {
                let mut state = lock_state(state);
                if !state.camera.is_open() || state.session != session {
                    break;
                }
                (state.camera.read_frame(), state.mode.clone())
            };

            if let Some(encoded) = frame.and_then(|frame| self.process_frame(frame, &mode)) {
                if tx.send(encoded).is_err() {
                    tracing::debug!("Frame consumer went away");
                    break;
                }
            }

            thread::sleep(self.interval);
        }

        tracing::debug!("Frame pipeline stopped for session {}", session);
    }
}

/// Lazy sequence of encoded frames for one camera session.
///
/// Ends when the session is stopped. Dropping it stops the pipeline
/// thread at its next emit.
pub struct FrameStream {
    rx: Receiver<EncodedFrame>,
    _worker: Option<JoinHandle<()>>,
}

impl FrameStream {
    pub(crate) fn new(rx: Receiver<EncodedFrame>, worker: Option<JoinHandle<()>>) -> Self {
        Self { rx, _worker: worker }
    }
}

impl Iterator for FrameStream {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::embedder::Detection;
    use crate::core::detector::BoundingBox;
    use crate::common::RollcallError;
    use image::{DynamicImage, Rgb};

    struct FixedEmbedder(Vec<Vec<f32>>);

    impl FaceEmbedder for FixedEmbedder {
        fn embed(&self, _image: &DynamicImage) -> Result<Vec<Detection>> {
            Ok(self
                .0
                .iter()
                .map(|embedding| Detection {
                    bbox: BoundingBox { top: 2, right: 12, bottom: 12, left: 2 },
                    embedding: embedding.clone(),
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    impl FaceEmbedder for FailingEmbedder {
        fn embed(&self, _image: &DynamicImage) -> Result<Vec<Detection>> {
            Err(RollcallError::Model("inference failed".into()))
        }
    }

    fn pipeline(embedder: Arc<dyn FaceEmbedder>) -> (FramePipeline, Arc<AttendanceLedger>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(AttendanceLedger::new(tmp.path().to_path_buf()).unwrap());
        let pipeline = FramePipeline::new(&Config::default(), embedder, Arc::clone(&ledger)).unwrap();
        (pipeline, ledger, tmp)
    }

    fn frame() -> Frame {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([40, 40, 40])))
    }

    fn attendance(entries: Vec<(Vec<f32>, &str)>) -> Mode {
        let (encodings, names) = entries.into_iter().map(|(e, n)| (e, n.to_string())).unzip();
        Mode::Attendance { gallery: Arc::new(Gallery::from_parts(encodings, names).unwrap()) }
    }

    #[test]
    fn test_multipart_chunk_framing() {
        let frame = EncodedFrame { jpeg: vec![1, 2, 3], labels: vec![] };
        let chunk = frame.multipart_chunk();
        assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(chunk.ends_with(&[1, 2, 3, b'\r', b'\n']));
        assert!(MULTIPART_CONTENT_TYPE.ends_with(&format!("boundary={}", MULTIPART_BOUNDARY)));
    }

    #[test]
    fn test_encoded_frame_is_jpeg() {
        let (pipeline, _, _tmp) = pipeline(Arc::new(FixedEmbedder(vec![])));
        let encoded = pipeline.process_frame(frame(), &Mode::Idle).unwrap();
        assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
        assert!(encoded.labels.is_empty());
    }

    #[test]
    fn test_every_face_labelled_and_known_faces_marked() {
        let embedder = FixedEmbedder(vec![vec![0.0, 0.0], vec![5.0, 5.0], vec![0.05, 0.0]]);
        let (pipeline, ledger, _tmp) = pipeline(Arc::new(embedder));
        let mode = attendance(vec![(vec![0.0, 0.1], "ada")]);

        let encoded = pipeline.process_frame(frame(), &mode).unwrap();
        assert_eq!(encoded.labels, vec!["ada", "Unknown", "ada"]);

        let records = ledger.list_today().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ada");
    }

    #[test]
    fn test_collecting_mode_skips_recognition() {
        let (pipeline, ledger, _tmp) = pipeline(Arc::new(FixedEmbedder(vec![vec![0.0, 0.0]])));
        let mode = Mode::Collecting { name: "ada".into(), captured: 0 };

        let encoded = pipeline.process_frame(frame(), &mode).unwrap();
        assert!(encoded.labels.is_empty());
        assert!(ledger.list_today().unwrap().is_empty());
    }

    #[test]
    fn test_embedder_failure_still_emits_frame() {
        let (pipeline, _, _tmp) = pipeline(Arc::new(FailingEmbedder));
        let mode = attendance(vec![(vec![0.0, 0.0], "ada")]);
        assert!(pipeline.process_frame(frame(), &mode).is_some());
    }
}
