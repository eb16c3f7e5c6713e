use std::path::PathBuf;
use std::fs;
use crate::common::{paths, Config, Result};

/// Where the gallery snapshot, enrollment images and attendance ledgers live.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub gallery_file: PathBuf,
    pub enrollment_dir: PathBuf,
    pub ledger_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            paths::user_data_dir()?
        };

        fs::create_dir_all(&base_dir)?;
        if enabled {
            fs::create_dir_all(base_dir.join("captures"))?;
            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    /// Rooted at an explicit directory; used by tests and embedding applications.
    pub fn with_base_dir(base_dir: PathBuf, enabled: bool) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn gallery_file(&self) -> PathBuf {
        self.base_dir.join("encodings.bincode")
    }

    pub fn enrollment_dir(&self) -> PathBuf {
        self.base_dir.join("known_faces")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.base_dir.join("attendance")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.base_dir.join("captures")
    }

    /// Default locations with any `[storage]` overrides from the config applied.
    pub fn storage_paths(&self, config: &Config) -> StoragePaths {
        StoragePaths {
            gallery_file: config.storage.gallery_file.clone().unwrap_or_else(|| self.gallery_file()),
            enrollment_dir: config.storage.enrollment_dir.clone().unwrap_or_else(|| self.enrollment_dir()),
            ledger_dir: config.storage.ledger_dir.clone().unwrap_or_else(|| self.ledger_dir()),
        }
    }

    pub fn get_capture_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.captures_dir().join(format!("{}_{}.jpg", prefix, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_overrides_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(tmp.path().to_path_buf(), false).unwrap();
        assert!(!dev.is_enabled());

        let mut config = Config::default();
        config.storage.ledger_dir = Some(PathBuf::from("/srv/ledgers"));
        let paths = dev.storage_paths(&config);

        assert_eq!(paths.ledger_dir, PathBuf::from("/srv/ledgers"));
        assert_eq!(paths.gallery_file, tmp.path().join("encodings.bincode"));
        assert_eq!(paths.enrollment_dir, tmp.path().join("known_faces"));
    }
}
