pub mod config;
pub mod error;
pub mod paths;

pub use config::Config;
pub use error::{AttendanceError, EnrollmentFailure, ImportError, Result};
pub use paths::DataPaths;
