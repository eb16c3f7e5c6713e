use image::{DynamicImage, Rgb, RgbImage};
use rollcall::core::BoundingBox;
use rollcall::{
    AttendanceSystem, Config, Detection, DeviceOpener, FaceEmbedder, Frame, FrameSource,
    ModeStatus, Result, RollcallError, StoragePaths,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const ADA: Rgb<u8> = Rgb([200, 40, 40]);

/// One face per bright image; the embedding is the mean colour of the image.
struct ColourEmbedder;

impl FaceEmbedder for ColourEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let rgb = image.to_rgb8();
        let pixels = rgb.pixels().len().max(1) as f32;
        let mut sum = [0f32; 3];
        for p in rgb.pixels() {
            for c in 0..3 {
                sum[c] += p[c] as f32;
            }
        }
        let mean: Vec<f32> = sum.iter().map(|s| s / pixels / 255.0).collect();

        if mean.iter().all(|v| *v < 0.1) {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            bbox: BoundingBox { top: 4, right: 28, bottom: 28, left: 4 },
            embedding: mean,
        }])
    }
}

struct ColourSource(Rgb<u8>);

impl FrameSource for ColourSource {
    fn read(&mut self) -> Result<Frame> {
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, self.0)))
    }
}

struct ColourCamera(Rgb<u8>);

impl DeviceOpener for ColourCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(ColourSource(self.0)))
    }
}

fn enroll(dir: &Path, name: &str, colours: &[Rgb<u8>]) {
    let person = dir.join(name);
    fs::create_dir_all(&person).unwrap();
    for (i, colour) in colours.iter().enumerate() {
        RgbImage::from_pixel(32, 32, *colour).save(person.join(format!("{}.jpg", i))).unwrap();
    }
}

fn system(root: &Path, colour: Rgb<u8>) -> AttendanceSystem {
    let paths = StoragePaths {
        gallery_file: root.join("encodings.bincode"),
        enrollment_dir: root.join("known_faces"),
        ledger_dir: root.join("attendance"),
    };
    let mut config = Config::default();
    config.stream.frame_interval_ms = 5;

    AttendanceSystem::new(&config, paths, Box::new(ColourCamera(colour)), Arc::new(ColourEmbedder)).unwrap()
}

#[test]
fn attendance_is_recorded_once_per_day() {
    let tmp = tempfile::tempdir().unwrap();
    enroll(&tmp.path().join("known_faces"), "ada", &[ADA, ADA, Rgb([0, 0, 0])]);
    enroll(&tmp.path().join("known_faces"), "bob", &[Rgb([20, 40, 220])]);

    let system = system(tmp.path(), ADA);

    let (gallery, report) = system.rebuild_gallery().unwrap();
    assert_eq!(report.files.len(), 4);
    assert_eq!(report.no_face(), 1);
    assert_eq!(gallery.len(), 3);

    system.start_attendance().unwrap();
    assert_eq!(system.mode(), ModeStatus::Attendance { gallery_size: 3 });

    let mut stream = system.stream_frames().unwrap();
    for _ in 0..2 {
        let frame = stream.next().unwrap();
        assert_eq!(frame.labels, vec!["ada"]);
    }

    let records = system.list_today_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "ada");
    assert!(chrono::NaiveTime::parse_from_str(&records[0].time, "%H:%M:%S").is_ok());

    for _ in 0..3 {
        stream.next().unwrap();
    }
    assert_eq!(system.list_today_records().unwrap().len(), 1);

    system.stop_attendance().unwrap();
    let _ = stream.count();
    assert_eq!(system.mode(), ModeStatus::Idle);
}

#[test]
fn stranger_is_labelled_unknown_and_not_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    enroll(&tmp.path().join("known_faces"), "ada", &[ADA]);

    let system = system(tmp.path(), Rgb([250, 250, 250]));
    system.rebuild_gallery().unwrap();
    system.start_attendance().unwrap();

    let frame = system.stream_frames().unwrap().next().unwrap();
    assert_eq!(frame.labels, vec!["Unknown"]);
    assert!(frame.multipart_chunk().starts_with(b"--frame\r\n"));

    system.stop_attendance().unwrap();
    assert!(system.list_today_records().unwrap().is_empty());
}

#[test]
fn attendance_cannot_start_before_encoding() {
    let tmp = tempfile::tempdir().unwrap();
    let system = system(tmp.path(), ADA);

    assert!(matches!(system.start_attendance(), Err(RollcallError::GalleryMissing(_))));
    assert_eq!(system.stream_frames().unwrap().count(), 0);
}
