use crate::camera::{CameraSession, DeviceOpener};
use crate::common::{Config, RollcallError, Result, StoragePaths};
use crate::core::embedder::FaceEmbedder;
use crate::core::identity::normalize_name;
use crate::core::pipeline::{FramePipeline, FrameStream};
use crate::storage::{AttendanceLedger, AttendanceRecord, Gallery, GalleryStore, RebuildReport};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// The process-wide operating mode.
#[derive(Debug, Clone)]
pub enum Mode {
    Idle,
    Collecting { name: String, captured: u32 },
    /// Carries the gallery snapshot loaded when attendance started.
    Attendance { gallery: Arc<Gallery> },
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Collecting { .. } => "collecting",
            Mode::Attendance { .. } => "taking attendance",
        }
    }
}

/// Serializable view of [`Mode`] for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeStatus {
    Idle,
    Collecting { name: String, captured: u32 },
    Attendance { gallery_size: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub captured: u32,
}

/// Mode and camera change together, so they share one lock.
pub(crate) struct ControlState {
    pub(crate) mode: Mode,
    pub(crate) camera: CameraSession,
    /// Bumped every time the camera is started.
    pub(crate) session: u64,
}

pub(crate) fn lock_state(state: &Mutex<ControlState>) -> MutexGuard<'_, ControlState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Control plane for collection, gallery rebuild and attendance.
///
/// This is the only owner of the camera: every start and stop goes through
/// a mode transition here.
pub struct AttendanceSystem {
    state: Arc<Mutex<ControlState>>,
    pipeline: Arc<FramePipeline>,
    gallery_store: GalleryStore,
    ledger: Arc<AttendanceLedger>,
    embedder: Arc<dyn FaceEmbedder>,
    enrollment_dir: PathBuf,
    channel_capacity: usize,
}

impl AttendanceSystem {
    pub fn new(
        config: &Config,
        paths: StoragePaths,
        opener: Box<dyn DeviceOpener>,
        embedder: Arc<dyn FaceEmbedder>,
    ) -> Result<Self> {
        let ledger = Arc::new(AttendanceLedger::new(paths.ledger_dir)?);
        let pipeline = Arc::new(FramePipeline::new(config, Arc::clone(&embedder), Arc::clone(&ledger))?);

        Ok(Self {
            state: Arc::new(Mutex::new(ControlState {
                mode: Mode::Idle,
                camera: CameraSession::new(opener),
                session: 0,
            })),
            pipeline,
            gallery_store: GalleryStore::new(paths.gallery_file),
            ledger,
            embedder,
            enrollment_dir: paths.enrollment_dir,
            channel_capacity: config.stream.channel_capacity,
        })
    }

    pub fn mode(&self) -> ModeStatus {
        match &lock_state(&self.state).mode {
            Mode::Idle => ModeStatus::Idle,
            Mode::Collecting { name, captured } => ModeStatus::Collecting {
                name: name.clone(),
                captured: *captured,
            },
            Mode::Attendance { gallery } => ModeStatus::Attendance { gallery_size: gallery.len() },
        }
    }

    pub fn enrollment_dir(&self) -> &Path {
        &self.enrollment_dir
    }

    /// Idle -> Collecting. Returns the normalized identity name.
    pub fn start_collection(&self, raw_name: &str) -> Result<String> {
        let mut state = lock_state(&self.state);
        require_idle(&state, "start collection")?;

        let name = normalize_name(raw_name)?;
        fs::create_dir_all(self.enrollment_dir.join(&name))?;

        start_camera(&mut state)?;
        state.mode = Mode::Collecting { name: name.clone(), captured: 0 };

        tracing::info!("Started collection for {}", name);
        Ok(name)
    }

    /// Saves the current frame as `<count>.jpg` and returns the new count.
    pub fn capture_image(&self) -> Result<u32> {
        let mut state = lock_state(&self.state);
        let ControlState { mode, camera, .. } = &mut *state;
        let current = mode.as_str();

        let Mode::Collecting { name, captured } = mode else {
            return Err(RollcallError::InvalidModeForOperation {
                operation: "capture an image",
                mode: current,
            });
        };

        let frame = camera.read_frame().ok_or(RollcallError::FrameUnavailable)?;
        let path = self.enrollment_dir.join(name.as_str()).join(format!("{}.jpg", captured));
        frame.to_rgb8().save(&path)?;

        *captured += 1;
        tracing::debug!("Image {} captured for {}", captured, name);
        Ok(*captured)
    }

    /// Collecting -> Idle.
    pub fn stop_collection(&self) -> Result<CollectionSummary> {
        let mut state = lock_state(&self.state);
        let Mode::Collecting { name, captured } = &state.mode else {
            return Err(RollcallError::InvalidModeForOperation {
                operation: "stop collection",
                mode: state.mode.as_str(),
            });
        };
        let summary = CollectionSummary { name: name.clone(), captured: *captured };

        state.camera.stop();
        state.mode = Mode::Idle;

        tracing::info!("Captured {} images for {}", summary.captured, summary.name);
        Ok(summary)
    }

    /// Re-encodes every enrollment image and replaces the persisted gallery.
    ///
    /// A running attendance session keeps the snapshot it started with.
    pub fn rebuild_gallery(&self) -> Result<(Gallery, RebuildReport)> {
        self.gallery_store.rebuild(&self.enrollment_dir, self.embedder.as_ref())
    }

    /// Idle -> Attendance. Fails with `GalleryMissing` until a gallery has been built.
    pub fn start_attendance(&self) -> Result<()> {
        let mut state = lock_state(&self.state);
        require_idle(&state, "start attendance")?;

        let gallery = self.gallery_store.load()?;
        if gallery.is_empty() {
            tracing::warn!("Gallery is empty, every face will be reported as Unknown");
        }
        self.ledger.reconcile()?;

        start_camera(&mut state)?;
        tracing::info!(
            "Attendance started with {} encodings for {} identities",
            gallery.len(),
            gallery.identities().len()
        );
        state.mode = Mode::Attendance { gallery: Arc::new(gallery) };
        Ok(())
    }

    /// Attendance -> Idle.
    pub fn stop_attendance(&self) -> Result<()> {
        let mut state = lock_state(&self.state);
        if !matches!(state.mode, Mode::Attendance { .. }) {
            return Err(RollcallError::InvalidModeForOperation {
                operation: "stop attendance",
                mode: state.mode.as_str(),
            });
        }

        state.camera.stop();
        state.mode = Mode::Idle;
        tracing::info!("Attendance stopped");
        Ok(())
    }

    /// Frames for the current camera session; empty when the camera is closed.
    pub fn stream_frames(&self) -> Result<FrameStream> {
        let (tx, rx) = sync_channel(self.channel_capacity);

        let session = {
            let state = lock_state(&self.state);
            if !state.camera.is_open() {
                return Ok(FrameStream::new(rx, None));
            }
            state.session
        };

        let state = Arc::clone(&self.state);
        let pipeline = Arc::clone(&self.pipeline);
        let worker = thread::Builder::new()
            .name(format!("frame-pipeline-{}", session))
            .spawn(move || pipeline.run(&state, session, tx))?;

        Ok(FrameStream::new(rx, Some(worker)))
    }

    pub fn list_today_records(&self) -> Result<Vec<AttendanceRecord>> {
        self.ledger.list_today()
    }
}

fn require_idle(state: &ControlState, operation: &'static str) -> Result<()> {
    if matches!(state.mode, Mode::Idle) {
        Ok(())
    } else {
        Err(RollcallError::InvalidModeForOperation { operation, mode: state.mode.as_str() })
    }
}

fn start_camera(state: &mut ControlState) -> Result<()> {
    state.camera.start()?;
    state.session += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Frame, FrameSource};
    use crate::core::detector::BoundingBox;
    use crate::core::embedder::Detection;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SolidSource;

    impl FrameSource for SolidSource {
        fn read(&mut self) -> Result<Frame> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 10, 10]))))
        }
    }

    struct TestOpener {
        opens: Arc<AtomicUsize>,
        available: Arc<AtomicBool>,
    }

    impl DeviceOpener for TestOpener {
        fn open(&self) -> Result<Box<dyn FrameSource>> {
            if !self.available.load(Ordering::SeqCst) {
                return Err(RollcallError::DeviceUnavailable("busy".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SolidSource))
        }
    }

    struct OneFace;

    impl FaceEmbedder for OneFace {
        fn embed(&self, _image: &DynamicImage) -> Result<Vec<Detection>> {
            Ok(vec![Detection {
                bbox: BoundingBox { top: 1, right: 10, bottom: 10, left: 1 },
                embedding: vec![0.0, 0.0],
            }])
        }
    }

    struct Harness {
        system: AttendanceSystem,
        opens: Arc<AtomicUsize>,
        available: Arc<AtomicBool>,
        tmp: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StoragePaths {
            gallery_file: tmp.path().join("encodings.bincode"),
            enrollment_dir: tmp.path().join("known_faces"),
            ledger_dir: tmp.path().join("attendance"),
        };
        let opens = Arc::new(AtomicUsize::new(0));
        let available = Arc::new(AtomicBool::new(true));
        let opener = TestOpener { opens: Arc::clone(&opens), available: Arc::clone(&available) };

        let mut config = Config::default();
        config.stream.frame_interval_ms = 5;
        let system = AttendanceSystem::new(&config, paths, Box::new(opener), Arc::new(OneFace)).unwrap();

        Harness { system, opens, available, tmp }
    }

    fn save_gallery(h: &Harness) {
        let gallery = Gallery::from_parts(vec![vec![0.0, 0.0]], vec!["ada".into()]).unwrap();
        GalleryStore::new(h.tmp.path().join("encodings.bincode")).save(&gallery).unwrap();
    }

    #[test]
    fn test_collection_flow_saves_numbered_images() {
        let h = harness();

        assert_eq!(h.system.start_collection("Ada  Lovelace").unwrap(), "ada_lovelace");
        assert_eq!(h.system.capture_image().unwrap(), 1);
        assert_eq!(h.system.capture_image().unwrap(), 2);

        let summary = h.system.stop_collection().unwrap();
        assert_eq!(summary, CollectionSummary { name: "ada_lovelace".into(), captured: 2 });
        assert_eq!(h.system.mode(), ModeStatus::Idle);

        assert_eq!(h.system.enrollment_dir(), h.tmp.path().join("known_faces"));
        let dir = h.system.enrollment_dir().join("ada_lovelace");
        assert!(dir.join("0.jpg").is_file());
        assert!(dir.join("1.jpg").is_file());
    }

    #[test]
    fn test_capture_while_idle_is_rejected() {
        let h = harness();
        let err = h.system.capture_image().unwrap_err();
        assert!(matches!(err, RollcallError::InvalidModeForOperation { mode: "idle", .. }));
        assert_eq!(h.system.mode(), ModeStatus::Idle);
    }

    #[test]
    fn test_capture_during_attendance_is_rejected() {
        let h = harness();
        save_gallery(&h);
        h.system.start_attendance().unwrap();

        assert!(matches!(
            h.system.capture_image(),
            Err(RollcallError::InvalidModeForOperation { .. })
        ));
        assert_eq!(h.system.mode(), ModeStatus::Attendance { gallery_size: 1 });
    }

    #[test]
    fn test_attendance_requires_gallery() {
        let h = harness();
        assert!(matches!(h.system.start_attendance(), Err(RollcallError::GalleryMissing(_))));
        assert_eq!(h.system.mode(), ModeStatus::Idle);
        assert_eq!(h.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_direct_switch_between_modes() {
        let h = harness();
        save_gallery(&h);

        h.system.start_collection("ada").unwrap();
        assert!(matches!(
            h.system.start_attendance(),
            Err(RollcallError::InvalidModeForOperation { .. })
        ));
        assert!(matches!(
            h.system.start_collection("bob"),
            Err(RollcallError::InvalidModeForOperation { .. })
        ));
        assert!(matches!(
            h.system.stop_attendance(),
            Err(RollcallError::InvalidModeForOperation { .. })
        ));

        h.system.stop_collection().unwrap();
        h.system.start_attendance().unwrap();
        h.system.stop_attendance().unwrap();
        assert_eq!(h.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_collection_while_idle_is_rejected() {
        let h = harness();
        assert!(matches!(
            h.system.stop_collection(),
            Err(RollcallError::InvalidModeForOperation { operation: "stop collection", .. })
        ));
    }

    #[test]
    fn test_unavailable_camera_leaves_mode_idle() {
        let h = harness();
        h.available.store(false, Ordering::SeqCst);

        assert!(matches!(
            h.system.start_collection("ada"),
            Err(RollcallError::DeviceUnavailable(_))
        ));
        assert_eq!(h.system.mode(), ModeStatus::Idle);
    }

    #[test]
    fn test_invalid_name_rejected_before_camera_starts() {
        let h = harness();
        assert!(matches!(h.system.start_collection("   "), Err(RollcallError::InvalidName(_))));
        assert_eq!(h.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stream_is_empty_when_camera_closed() {
        let h = harness();
        assert_eq!(h.system.stream_frames().unwrap().count(), 0);
    }

    #[test]
    fn test_stream_ends_after_stop() {
        let h = harness();
        save_gallery(&h);
        h.system.start_attendance().unwrap();

        let mut stream = h.system.stream_frames().unwrap();
        let first = stream.next().unwrap();
        assert_eq!(first.labels, vec!["ada"]);

        h.system.stop_attendance().unwrap();
        // at most the buffered frames plus one in flight, then the sequence ends
        assert!(stream.count() <= 3);
        assert_eq!(h.system.list_today_records().unwrap().len(), 1);
    }

    #[test]
    fn test_restarted_session_gets_fresh_stream() {
        let h = harness();
        save_gallery(&h);

        h.system.start_attendance().unwrap();
        let mut old = h.system.stream_frames().unwrap();
        assert!(old.next().is_some());
        h.system.stop_attendance().unwrap();

        h.system.start_attendance().unwrap();
        // the camera is open again, but under a newer session
        assert!(old.count() <= 3);

        let mut fresh = h.system.stream_frames().unwrap();
        assert_eq!(fresh.next().unwrap().labels, vec!["ada"]);
        assert_eq!(h.opens.load(Ordering::SeqCst), 2);

        h.system.stop_attendance().unwrap();
        assert_eq!(h.system.list_today_records().unwrap().len(), 1);
    }
}
