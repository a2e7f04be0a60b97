use std::path::{Path, PathBuf};
use std::fs;
use directories::ProjectDirs;
use crate::common::error::{AttendanceError, Result};

/// On-disk layout for everything the attendance core persists.
///
/// Dev mode keeps data under `./dev_data` so experiments never touch the
/// real store; otherwise the platform data directory is used.
#[derive(Debug, Clone)]
pub struct DataPaths {
    dev: bool,
    base_dir: PathBuf,
    config_file: PathBuf,
}

impl DataPaths {
    pub fn new(dev: bool) -> Result<Self> {
        if dev {
            let base_dir = PathBuf::from("./dev_data");
            let paths = Self {
                dev,
                config_file: base_dir.join("config").join("rollcall.toml"),
                base_dir,
            };
            paths.create_dirs()?;
            tracing::info!("Development mode - data will be saved to: {}", paths.base_dir.display());
            return Ok(paths);
        }

        let dirs = ProjectDirs::from("org", "rollcall", "Rollcall")
            .ok_or_else(|| AttendanceError::Storage("Failed to get project dirs".into()))?;

        let paths = Self {
            dev,
            base_dir: dirs.data_dir().to_path_buf(),
            config_file: dirs.config_dir().join("rollcall.toml"),
        };
        paths.create_dirs()?;
        Ok(paths)
    }

    /// Layout rooted at an arbitrary directory; used by tests and imports.
    pub fn rooted_at(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let paths = Self {
            dev: false,
            config_file: base_dir.join("rollcall.toml"),
            base_dir,
        };
        paths.create_dirs()?;
        Ok(paths)
    }

    fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        fs::create_dir_all(self.models_dir())?;
        fs::create_dir_all(self.captures_dir())?;
        Ok(())
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base_dir.join("models")
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.base_dir.join("captures")
    }

    pub fn embeddings_file(&self) -> PathBuf {
        self.models_dir().join("face_embeddings.bin")
    }

    pub fn liveness_model_file(&self) -> PathBuf {
        self.models_dir().join("liveness_model.bin")
    }

    pub fn attendance_file(&self) -> PathBuf {
        self.base_dir.join("attendance.jsonl")
    }

    pub fn roster_file(&self) -> PathBuf {
        self.base_dir.join("roster.json")
    }

    /// Resolves a model path from the config against the models directory.
    pub fn resolve_model(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    pub fn capture_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        self.captures_dir().join(format!("{}_{}.jpg", prefix, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_layout_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::rooted_at(dir.path()).unwrap();

        assert!(paths.models_dir().is_dir());
        assert!(paths.captures_dir().is_dir());
        assert!(paths.embeddings_file().starts_with(dir.path()));
        assert!(!paths.is_dev());
    }

    #[test]
    fn relative_model_paths_resolve_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::rooted_at(dir.path()).unwrap();

        let resolved = paths.resolve_model(Path::new("models/face_detector.onnx"));
        assert_eq!(resolved, dir.path().join("models/face_detector.onnx"));

        let absolute = Path::new("/opt/models/x.onnx");
        assert_eq!(paths.resolve_model(absolute), absolute);
    }
}
