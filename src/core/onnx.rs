use crate::common::{AttendanceError, Result};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder};
use std::path::Path;
use std::sync::Arc;

/// An ONNX Runtime session together with the environment that must outlive it.
pub struct OnnxModel {
    pub session: Session,
    _environment: Arc<Environment>,
}

impl OnnxModel {
    pub fn load(name: &str, model_path: &Path, optimization_level: u32) -> Result<Self> {
        if !model_path.exists() {
            return Err(AttendanceError::Model(format!(
                "{} model not found at: {:?}",
                name, model_path
            )));
        }

        ort::init()
            .with_name(name)
            .commit()
            .map_err(|e| AttendanceError::Model(format!("Failed to create environment: {}", e)))?;
        let environment = Arc::clone(
            ort::get_environment()
                .map_err(|e| AttendanceError::Model(format!("Failed to create environment: {}", e)))?,
        );

        let opt_level = match optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };

        let session = SessionBuilder::new()?
            .with_optimization_level(opt_level)?
            .commit_from_file(model_path)?;

        tracing::debug!("Loaded {} model from {:?}", name, model_path);

        Ok(Self {
            session,
            _environment: environment,
        })
    }
}
