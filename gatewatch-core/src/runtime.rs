use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model file not found: {0}")]
    ModelMissing(String),
    #[error("Failed to create session: {0}")]
    SessionCreation(String),
}

/// Builds CPU inference sessions for the detector and embedder models.
#[derive(Debug, Default)]
pub struct OnnxRuntime;

impl OnnxRuntime {
    pub fn new() -> Self {
        Self
    }

    pub fn create_session<P: AsRef<Path>>(&self, model_path: P) -> Result<Session, RuntimeError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(RuntimeError::ModelMissing(model_path.display().to_string()));
        }

        let session = Session::builder()
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RuntimeError::SessionCreation(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| {
                RuntimeError::SessionCreation(format!(
                    "Failed to load model from {:?}: {}",
                    model_path, e
                ))
            })?;

        log::info!("Loaded ONNX model: {:?}", model_path);
        Ok(session)
    }
}
