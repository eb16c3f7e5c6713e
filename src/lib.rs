// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, RollcallError, Result, StoragePaths};
pub use core::{
    AttendanceSystem, CollectionSummary, Detection, EncodedFrame, FaceEmbedder, FrameStream,
    Matcher, MatchOutcome, ModeStatus, OnnxEmbedder, MULTIPART_CONTENT_TYPE,
};
pub use camera::{CameraSession, DeviceOpener, Frame, FrameSource, V4l2Opener};
pub use storage::{AttendanceLedger, AttendanceRecord, Gallery, GalleryStore, MarkOutcome, RebuildReport};
