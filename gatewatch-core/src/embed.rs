use crate::align::ALIGNED_SIZE;
use crate::runtime::OnnxRuntime;
use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Recognition model unavailable: {0}")]
    ModelLoad(String),
    #[error("Recognition inference failed: {0}")]
    Inference(String),
    #[error("Recognition model produced {0} values per face, expected 512")]
    InvalidDimension(usize),
}

/// Embedding dimension produced by the ArcFace recognition models.
pub const EMBEDDING_DIM: usize = 512;

/// Face embedding vector. Stored and compared L2-normalized.
pub type Embedding = Array1<f32>;

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn new<P: AsRef<Path>>(model_path: P, runtime: &OnnxRuntime) -> Result<Self, EmbedError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;

        Ok(Self { session })
    }

    /// Embed an aligned 112x112 face crop. The result is L2-normalized.
    pub fn embed(&mut self, aligned_face: &RgbImage) -> Result<Embedding, EmbedError> {
        if aligned_face.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
            return Err(EmbedError::Inference(format!(
                "aligned crop is {:?}, model takes {}px squares",
                aligned_face.dimensions(),
                ALIGNED_SIZE
            )));
        }

        let tensor = Value::from_array(Self::preprocess(aligned_face))
            .map_err(|e| EmbedError::Inference(format!("input tensor: {}", e)))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("output tensor: {}", e)))?;

        // [1, 512]
        let width = shape.last().copied().unwrap_or(0) as usize;
        if width != EMBEDDING_DIM || values.len() < EMBEDDING_DIM {
            return Err(EmbedError::InvalidDimension(width));
        }

        let raw: Embedding = values.iter().take(EMBEDDING_DIM).copied().collect();
        Ok(normalize_embedding(raw))
    }

    /// NCHW tensor, `(pixel - 127.5) / 127.5`.
    fn preprocess(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
        let size = ALIGNED_SIZE as usize;
        let plane = size * size;
        let mut input_data = vec![0.0f32; plane * 3];

        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                input_data[c * plane + i] = (pixel[c] as f32 - 127.5) / 127.5;
            }
        }

        ([1, 3, size, size], input_data)
    }
}

/// L2 normalize an embedding vector. A zero vector is returned unchanged.
pub fn normalize_embedding(mut embedding: Embedding) -> Embedding {
    let norm = embedding.dot(&embedding).sqrt();
    if norm > 0.0 {
        embedding /= norm;
    }
    embedding
}
