pub mod annotate;
pub mod controller;
pub mod detector;
pub mod embedder;
pub mod identity;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;

pub use annotate::Annotator;
pub use controller::{AttendanceSystem, CollectionSummary, Mode, ModeStatus};
pub use detector::{BoundingBox, FaceBox, FaceDetector};
pub use embedder::{Detection, FaceEmbedder, OnnxEmbedder};
pub use identity::normalize_name;
pub use matcher::{euclidean_distance, MatchOutcome, Matcher};
pub use pipeline::{encode_jpeg, EncodedFrame, FramePipeline, FrameStream, MULTIPART_CONTENT_TYPE};
pub use recognizer::{Embedding, FaceRecognizer};
