use crate::runtime::OnnxRuntime;
use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// SCRFD feature pyramid strides; outputs come grouped as scores, boxes, keypoints.
const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_LOCATION: usize = 2;
const NMS_IOU_THRESHOLD: f32 = 0.4;

/// Axis-aligned rectangle in pixel coordinates of the image it was detected on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// `[x1, y1, x2, y2]`
    pub fn corners(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Multiply every coordinate by `factor`, e.g. 2.0 to undo a 0.5x downscale.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.corners();
        let [bx1, by1, bx2, by2] = other.corners();

        let intersection = (ax2.min(bx2) - ax1.max(bx1)).max(0.0)
            * (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Five-point landmarks in the order eyes, nose, mouth corners.
pub type Landmarks = [(f32, f32); 5];

#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub confidence: f32,
}

pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    input_size: u32,
}

impl FaceDetector {
    /// `input_size` is the square edge frames are resized to before inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        runtime: &OnnxRuntime,
        confidence_threshold: f32,
        input_size: u32,
    ) -> Result<Self, DetectionError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        Ok(Self {
            session,
            confidence_threshold,
            input_size,
        })
    }

    /// Detect faces, largest-and-most-confident first. An image without faces
    /// yields an empty list.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>, DetectionError> {
        let (input_tensor, scale) = Self::preprocess(image, self.input_size);

        let input_value = Value::from_array(input_tensor)
            .map_err(|e| DetectionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        if outputs.len() < FEATURE_STRIDES.len() * 3 {
            return Err(DetectionError::Inference(format!(
                "Expected {} outputs, got {}",
                FEATURE_STRIDES.len() * 3,
                outputs.len()
            )));
        }

        let mut detections = Vec::new();

        for (level, &stride) in FEATURE_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("scores@{}: {}", stride, e)))?;
            let (_, boxes) = outputs[level + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("boxes@{}: {}", stride, e)))?;
            let (_, keypoints) = outputs[level + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("keypoints@{}: {}", stride, e)))?;

            let stride_f = stride as f32;
            for (idx, anchor) in Self::anchor_centers(self.input_size, stride).enumerate() {
                let Some(&score) = scores.get(idx) else { break };
                if score < self.confidence_threshold {
                    continue;
                }

                let (Some(dist), Some(kps)) = (
                    boxes.get(idx * 4..idx * 4 + 4),
                    keypoints.get(idx * 10..idx * 10 + 10),
                ) else {
                    continue;
                };

                let (cx, cy) = anchor;
                let bbox = BoundingBox::from_corners(
                    (cx - dist[0] * stride_f) / scale,
                    (cy - dist[1] * stride_f) / scale,
                    (cx + dist[2] * stride_f) / scale,
                    (cy + dist[3] * stride_f) / scale,
                );

                let mut landmarks = [(0.0, 0.0); 5];
                for (point, pair) in landmarks.iter_mut().zip(kps.chunks_exact(2)) {
                    *point = (
                        (cx + pair[0] * stride_f) / scale,
                        (cy + pair[1] * stride_f) / scale,
                    );
                }

                log::trace!("stride={} score={:.3} bbox={:?}", stride, score, bbox);

                detections.push(FaceDetection {
                    bbox,
                    landmarks,
                    confidence: score,
                });
            }
        }

        log::debug!("Found {} detections before NMS", detections.len());

        let mut detections = Self::nms(detections, NMS_IOU_THRESHOLD);

        detections.sort_by(|a, b| {
            let score_a = a.confidence * a.bbox.area().sqrt();
            let score_b = b.confidence * b.bbox.area().sqrt();
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(detections)
    }

    /// Anchor centers for one pyramid level, each repeated per anchor.
    fn anchor_centers(input_size: u32, stride: usize) -> impl Iterator<Item = (f32, f32)> {
        let feat_size = input_size as usize / stride;
        (0..feat_size).flat_map(move |row| {
            (0..feat_size).flat_map(move |col| {
                let center = ((col as f32) * stride as f32, (row as f32) * stride as f32);
                std::iter::repeat(center).take(ANCHORS_PER_LOCATION)
            })
        })
    }

    /// Letterbox into the square model input (aspect kept, image at the
    /// top-left, black padding) and build an NCHW tensor normalized with
    /// mean 127.5 / std 128. Returns the tensor and the resize factor.
    fn preprocess(image: &RgbImage, size: u32) -> (([usize; 4], Vec<f32>), f32) {
        let (orig_width, orig_height) = image.dimensions();
        let scale = (size as f32 / orig_width as f32).min(size as f32 / orig_height as f32);

        let fit_width = ((orig_width as f32 * scale).round() as u32).clamp(1, size);
        let fit_height = ((orig_height as f32 * scale).round() as u32).clamp(1, size);
        let resized = imageops::resize(image, fit_width, fit_height, imageops::FilterType::Triangle);

        let mut canvas = RgbImage::new(size, size);
        imageops::replace(&mut canvas, &resized, 0, 0);

        let plane = (size * size) as usize;
        let mut input_data = vec![0.0f32; plane * 3];
        for (i, pixel) in canvas.pixels().enumerate() {
            for c in 0..3 {
                input_data[c * plane + i] = (pixel[c] as f32 - 127.5) / 128.0;
            }
        }

        let shape = [1, 3, size as usize, size as usize];
        ((shape, input_data), scale)
    }

    /// Non-Maximum Suppression
    fn nms(mut detections: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep: Vec<FaceDetection> = Vec::new();
        for candidate in detections {
            if keep
                .iter()
                .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
            {
                keep.push(candidate);
            }
        }

        keep
    }
}
