use crate::align;
use crate::config::Config;
use crate::detect::{BoundingBox, DetectionError, FaceDetector};
use crate::embed::{EmbedError, Embedding, FaceEmbedder};
use crate::runtime::OnnxRuntime;
use image::RgbImage;

/// A face found in one image: where it is and who it looks like.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Detection plus embedding extraction for a single raster image.
///
/// Implementations may return an empty list; bounding boxes are in the
/// coordinates of the image passed in.
pub trait FaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError>;
}

/// SCRFD detection, five-point alignment and ArcFace embedding.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxFaceAnalyzer {
    pub fn new(detector: FaceDetector, embedder: FaceEmbedder) -> Self {
        Self { detector, embedder }
    }

    pub fn from_config(config: &Config) -> Result<Self, crate::Error> {
        let runtime = OnnxRuntime::new();

        log::info!("Loading face detection model...");
        let detector = FaceDetector::new(
            &config.detection.model_path,
            &runtime,
            config.detection.confidence_threshold,
            config.detection.input_size,
        )?;

        log::info!("Loading face embedding model...");
        let embedder = FaceEmbedder::new(&config.embedding.model_path, &runtime)?;

        Ok(Self::new(detector, embedder))
    }

    fn embed_detection(
        &mut self,
        image: &RgbImage,
        landmarks: &crate::detect::Landmarks,
    ) -> Result<Embedding, EmbedError> {
        let aligned = align::align_face(image, landmarks)
            .map_err(|e| EmbedError::Inference(e.to_string()))?;
        self.embedder.embed(&aligned)
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError> {
        let detections = self.detector.detect(image)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            match self.embed_detection(image, &detection.landmarks) {
                Ok(embedding) => faces.push(DetectedFace {
                    bbox: detection.bbox,
                    embedding,
                }),
                Err(e) => log::warn!(
                    "Skipping face at {:?} (confidence {:.2}): {}",
                    detection.bbox.corners(),
                    detection.confidence,
                    e
                ),
            }
        }

        Ok(faces)
    }
}

/// Pick the face with the largest box area; the first one wins ties.
pub fn largest_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces.iter().fold(None, |best: Option<&DetectedFace>, face| match best {
        Some(current) if current.bbox.area() >= face.bbox.area() => Some(current),
        _ => Some(face),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn face(width: f32, height: f32, tag: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width,
                height,
            },
            embedding: arr1(&[tag, 0.0]),
        }
    }

    #[test]
    fn test_largest_face_by_area() {
        let faces = vec![face(10.0, 10.0, 1.0), face(20.0, 20.0, 2.0)];
        let chosen = largest_face(&faces).unwrap();
        assert_eq!(chosen.bbox.area(), 400.0);
        assert_eq!(chosen.embedding[0], 2.0);
    }

    #[test]
    fn test_largest_face_tie_keeps_first() {
        let faces = vec![face(10.0, 40.0, 1.0), face(20.0, 20.0, 2.0)];
        assert_eq!(largest_face(&faces).unwrap().embedding[0], 1.0);
    }

    #[test]
    fn test_largest_face_empty() {
        assert!(largest_face(&[]).is_none());
    }
}
