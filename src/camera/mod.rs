pub mod sequence;
#[cfg(feature = "camera")]
pub mod v4l2;

pub use sequence::{ImageSequenceSource, is_supported_image, list_images};
#[cfg(feature = "camera")]
pub use v4l2::V4lCamera;

use crate::common::Result;
use image::DynamicImage;

/// Supplies frames on demand. The attendance core never enumerates or
/// configures devices; it only pulls frames and releases the source.
pub trait FrameSource {
    /// Next frame, or `None` when a finite source has nothing left.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Frees the underlying device. Must be idempotent.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Releases the wrapped source when dropped, including on early return or panic.
pub struct ReleaseGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
}

impl<'a, S: FrameSource + ?Sized> ReleaseGuard<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self { source }
    }

    pub fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        self.source.next_frame()
    }
}

impl<S: FrameSource + ?Sized> Drop for ReleaseGuard<'_, S> {
    fn drop(&mut self) {
        self.source.release();
    }
}
