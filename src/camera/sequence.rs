use crate::camera::FrameSource;
use crate::common::{AttendanceError, Result};
use image::DynamicImage;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(AttendanceError::Camera(format!("{} is not a directory", dir.display())));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_supported_image(path))
        .collect();
    files.sort();
    Ok(files)
}

enum Frames {
    Files(VecDeque<PathBuf>),
    Images(VecDeque<DynamicImage>),
}

/// Finite frame source backed by still images, used for enrollment from
/// photos, offline attendance runs and tests.
pub struct ImageSequenceSource {
    frames: Frames,
    released: bool,
}

impl ImageSequenceSource {
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let files = list_images(dir)?;
        tracing::debug!("Frame source over {} images in {}", files.len(), dir.display());
        Ok(Self {
            frames: Frames::Files(files.into()),
            released: false,
        })
    }

    pub fn from_images(images: Vec<DynamicImage>) -> Self {
        Self {
            frames: Frames::Images(images.into()),
            released: false,
        }
    }

    pub fn remaining(&self) -> usize {
        match &self.frames {
            Frames::Files(files) => files.len(),
            Frames::Images(images) => images.len(),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        if self.released {
            return Err(AttendanceError::Camera("frame source already released".into()));
        }

        match &mut self.frames {
            Frames::Images(images) => Ok(images.pop_front()),
            Frames::Files(files) => match files.pop_front() {
                Some(path) => Ok(Some(image::open(&path)?)),
                None => Ok(None),
            },
        }
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ReleaseGuard;
    use image::RgbImage;

    #[test]
    fn directory_source_yields_supported_images_in_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
        fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut source = ImageSequenceSource::from_dir(dir.path()).unwrap();
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.next_frame().unwrap().unwrap().width(), 2);
        assert_eq!(source.next_frame().unwrap().unwrap().width(), 4);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn guard_releases_on_drop() {
        let mut source = ImageSequenceSource::from_images(vec![DynamicImage::new_rgb8(1, 1)]);
        {
            let mut guard = ReleaseGuard::new(&mut source);
            guard.next_frame().unwrap();
        }
        assert!(source.is_released());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(is_supported_image(Path::new("x/IMG_01.JPG")));
        assert!(!is_supported_image(Path::new("x/clip.gif")));
        assert!(!is_supported_image(Path::new("x/noext")));
    }
}
