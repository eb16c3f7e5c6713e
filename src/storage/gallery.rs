use crate::common::{RollcallError, Result};
use crate::core::embedder::FaceEmbedder;
use crate::core::recognizer::Embedding;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const STORAGE_VERSION: u32 = 1;

/// Known identities: `encodings[i]` belongs to `names[i]`.
///
/// Built wholesale by [`GalleryStore::rebuild`] and never edited in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    encodings: Vec<Embedding>,
    names: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct GallerySnapshot {
    version: u32,
    encodings: Vec<Embedding>,
    names: Vec<String>,
}

impl Gallery {
    pub fn from_parts(encodings: Vec<Embedding>, names: Vec<String>) -> Result<Self> {
        if encodings.len() != names.len() {
            return Err(RollcallError::GalleryCorrupt(format!(
                "{} encodings but {} names",
                encodings.len(),
                names.len()
            )));
        }
        Ok(Self { encodings, names })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Embedding, &String)> {
        self.encodings.iter().zip(self.names.iter())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Distinct identity names, in first-seen order.
    pub fn identities(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for name in &self.names {
            if !seen.contains(&name.as_str()) {
                seen.push(name.as_str());
            }
        }
        seen
    }

    fn push(&mut self, encoding: Embedding, name: String) {
        self.encodings.push(encoding);
        self.names.push(name);
    }
}

/// What happened to a single enrollment image during a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FileOutcome {
    Encoded,
    NoFace,
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub identity: String,
    pub file: String,
    pub outcome: FileOutcome,
}

impl std::fmt::Display for FileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            FileOutcome::Encoded => write!(f, "{}/{}", self.identity, self.file),
            FileOutcome::NoFace => write!(f, "{}/{} (no face found)", self.identity, self.file),
            FileOutcome::Error(e) => write!(f, "{}/{} (error: {})", self.identity, self.file, e),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub files: Vec<FileReport>,
}

impl RebuildReport {
    pub fn encoded(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Encoded))
    }

    pub fn no_face(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::NoFace))
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Error(_)))
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }
}

pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Gallery> {
        if !self.exists() {
            return Err(RollcallError::GalleryMissing(self.path.clone()));
        }

        let data = fs::read(&self.path)?;
        let snapshot: GallerySnapshot = bincode::deserialize(&data)
            .map_err(|e| RollcallError::GalleryCorrupt(format!("Failed to deserialize: {}", e)))?;

        if snapshot.version > STORAGE_VERSION {
            return Err(RollcallError::GalleryCorrupt(format!(
                "Unsupported gallery version {}", snapshot.version
            )));
        }

        if let Some(first) = snapshot.encodings.first() {
            if snapshot.encodings.iter().any(|e| e.len() != first.len()) {
                return Err(RollcallError::GalleryCorrupt(
                    "Encodings have differing dimensions".into(),
                ));
            }
        }

        Gallery::from_parts(snapshot.encodings, snapshot.names)
    }

    /// Writes the snapshot to a sibling temp file and renames it over the target.
    pub fn save(&self, gallery: &Gallery) -> Result<()> {
        let snapshot = GallerySnapshot {
            version: STORAGE_VERSION,
            encodings: gallery.encodings.clone(),
            names: gallery.names.clone(),
        };
        let encoded = bincode::serialize(&snapshot)
            .map_err(|e| RollcallError::Storage(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::info!("Saved gallery with {} encodings to {}", gallery.len(), self.path.display());
        Ok(())
    }

    /// Re-encodes every image under `enrollment_dir/<identity>/` and replaces
    /// the persisted gallery. Bad files are reported, never fatal.
    pub fn rebuild(
        &self,
        enrollment_dir: &Path,
        embedder: &dyn FaceEmbedder,
    ) -> Result<(Gallery, RebuildReport)> {
        if !enrollment_dir.is_dir() {
            return Err(RollcallError::EnrollmentMissing(enrollment_dir.to_path_buf()));
        }

        let mut gallery = Gallery::default();
        let mut report = RebuildReport::default();

        for identity_dir in sorted_entries(enrollment_dir)? {
            if !identity_dir.is_dir() {
                continue;
            }
            let identity = file_name(&identity_dir);

            let images = match sorted_entries(&identity_dir) {
                Ok(images) => images,
                Err(e) => {
                    tracing::warn!("Cannot list {}: {}", identity_dir.display(), e);
                    // an empty file name stands for the directory itself
                    report.files.push(FileReport {
                        identity,
                        file: String::new(),
                        outcome: FileOutcome::Error(e.to_string()),
                    });
                    continue;
                }
            };

            for image_path in images {
                if !image_path.is_file() {
                    continue;
                }
                let file = file_name(&image_path);

                let outcome = match image::open(&image_path)
                    .map_err(RollcallError::from)
                    .and_then(|image| embedder.embed(&image))
                {
                    Ok(detections) => match detections.into_iter().next() {
                        Some(detection) => {
                            gallery.push(detection.embedding, identity.clone());
                            tracing::debug!("Encoded {} for {}", file, identity);
                            FileOutcome::Encoded
                        }
                        None => {
                            tracing::warn!("No face found in {}/{}, skipping", identity, file);
                            FileOutcome::NoFace
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Error processing {}: {}", image_path.display(), e);
                        FileOutcome::Error(e.to_string())
                    }
                };

                report.files.push(FileReport { identity: identity.clone(), file, outcome });
            }
        }

        self.save(&gallery)?;
        tracing::info!(
            "Gallery rebuilt: {} encoded, {} without a face, {} errors",
            report.encoded(),
            report.no_face(),
            report.errors()
        );

        Ok((gallery, report))
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
