pub mod batch;
pub mod capabilities;
pub mod enrollment;
pub mod live;

pub use batch::{BatchIdentifier, BatchReport, FaceResolution, UnidentifiedReason};
pub use capabilities::{Capabilities, CapabilityReport};
pub use enrollment::{BulkEnrollmentReport, CaptureReport, Enroller, EnrollmentReport};
pub use live::{Clock, LiveAttendance, LiveSession, LiveSessionReport, ManualClock, SessionState, SystemClock};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag, checked at every frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
