//! Known-face registry: labeled reference embeddings built from photos.
//!
//! Photos come either from a local tree (`faces/<label>/*.jpg`) or from the
//! server's student list. Every failure while loading a single photo is
//! logged and skipped; the registry is whatever loaded successfully.

use crate::analyze::{largest_face, FaceAnalyzer};
use crate::config::{Config, RegistrySource};
use crate::embed::{normalize_embedding, Embedding};
use crate::server::{ServerClient, StudentRecord};
use image::RgbImage;
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Embedding for '{label}' has dimension {found}, registry uses {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
}

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One reference photo's identity and unit-length embedding.
#[derive(Debug, Clone)]
pub struct ReferenceFace {
    label: String,
    embedding: Embedding,
}

impl ReferenceFace {
    /// The embedding is L2-normalized on construction.
    pub fn new(label: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            label: label.into(),
            embedding: normalize_embedding(embedding),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }
}

/// Immutable set of reference faces with their embeddings stacked row-wise
/// for batch similarity.
#[derive(Debug, Clone)]
pub struct ReferenceRegistry {
    faces: Vec<ReferenceFace>,
    matrix: Array2<f32>,
}

impl ReferenceRegistry {
    pub fn new(faces: Vec<ReferenceFace>) -> Result<Self, RegistryError> {
        let dim = faces.first().map(|f| f.embedding.len()).unwrap_or(0);

        let mut flat = Vec::with_capacity(faces.len() * dim);
        for face in &faces {
            if face.embedding.len() != dim {
                return Err(RegistryError::DimensionMismatch {
                    label: face.label.clone(),
                    expected: dim,
                    found: face.embedding.len(),
                });
            }
            flat.extend(face.embedding.iter().copied());
        }

        let matrix = Array2::from_shape_vec((faces.len(), dim), flat)?;

        Ok(Self { faces, matrix })
    }

    pub fn empty() -> Self {
        Self {
            faces: Vec::new(),
            matrix: Array2::zeros((0, 0)),
        }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Embedding dimension, or 0 for an empty registry.
    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn faces(&self) -> &[ReferenceFace] {
        &self.faces
    }

    /// Dot product of every reference row with `probe`. Both sides must be
    /// normalized for this to be cosine similarity.
    pub fn similarities(&self, probe: &Embedding) -> Array1<f32> {
        self.matrix.dot(probe)
    }

    /// Photo count per label, sorted by label.
    pub fn label_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for face in &self.faces {
            *counts.entry(face.label()).or_insert(0) += 1;
        }
        counts
    }
}

/// Collects reference faces by running photos through a [`FaceAnalyzer`].
pub struct RegistryBuilder<'a> {
    analyzer: &'a mut dyn FaceAnalyzer,
    faces: Vec<ReferenceFace>,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new(analyzer: &'a mut dyn FaceAnalyzer) -> Self {
        Self {
            analyzer,
            faces: Vec::new(),
        }
    }

    /// Add the largest face in `image` under `label`. Returns false when the
    /// photo was skipped.
    pub fn add_image(&mut self, label: &str, image: &RgbImage) -> bool {
        let faces = match self.analyzer.analyze(image) {
            Ok(faces) => faces,
            Err(e) => {
                log::warn!("Face analysis failed for a photo of '{}': {}", label, e);
                return false;
            }
        };

        let Some(face) = largest_face(&faces) else {
            log::debug!("No face found in a photo of '{}', skipping", label);
            return false;
        };

        if let Some(expected) = self.faces.first().map(|f| f.embedding.len()) {
            if face.embedding.len() != expected {
                log::warn!(
                    "Embedding for '{}' has dimension {} (expected {}), skipping",
                    label,
                    face.embedding.len(),
                    expected
                );
                return false;
            }
        }

        self.faces
            .push(ReferenceFace::new(label, face.embedding.clone()));
        true
    }

    /// Decode and add an encoded photo (JPEG/PNG bytes).
    pub fn add_encoded(&mut self, label: &str, bytes: &[u8]) -> bool {
        match image::load_from_memory(bytes) {
            Ok(decoded) => self.add_image(label, &decoded.to_rgb8()),
            Err(e) => {
                log::warn!("Could not decode photo for '{}': {}", label, e);
                false
            }
        }
    }

    /// Add every `<root>/<label>/*.{jpg,jpeg,png}` photo. A missing root is
    /// created and contributes nothing.
    pub fn add_directory(&mut self, root: &Path) -> Result<(), RegistryError> {
        log::info!("Scanning '{}' for known faces...", root.display());

        if !root.exists() {
            fs::create_dir_all(root)?;
            log::warn!("Created empty faces directory '{}'", root.display());
            return Ok(());
        }

        for label_dir in sorted_entries(root)? {
            if !label_dir.is_dir() {
                continue;
            }
            let Some(label) = label_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let mut loaded = 0;
            for photo in sorted_entries(&label_dir)? {
                if !is_image_file(&photo) {
                    continue;
                }
                match fs::read(&photo) {
                    Ok(bytes) => {
                        if self.add_encoded(label, &bytes) {
                            loaded += 1;
                        }
                    }
                    Err(e) => log::warn!("Could not read {}: {}", photo.display(), e),
                }
            }

            if loaded > 0 {
                log::info!(" -> Loaded {} images for: {}", loaded, label);
            }
        }

        Ok(())
    }

    /// Add server student records, each decoded independently.
    pub fn add_records(&mut self, records: &[StudentRecord]) {
        for record in records {
            match record.image_bytes() {
                Ok(bytes) => {
                    if self.add_encoded(&record.name, &bytes) {
                        log::info!(" -> Loaded remote photo for: {}", record.name);
                    }
                }
                Err(e) => log::warn!("Invalid image data for '{}': {}", record.name, e),
            }
        }
    }

    pub fn build(self) -> ReferenceRegistry {
        let faces = self.faces;
        log::info!("Total database size: {} faces", faces.len());
        ReferenceRegistry::new(faces).unwrap_or_else(|e| {
            log::error!("Discarding inconsistent registry: {}", e);
            ReferenceRegistry::empty()
        })
    }
}

/// Build the registry from the configured source. Never fails: a missing
/// source yields an empty registry and every face is reported unknown.
pub fn load(
    config: &Config,
    analyzer: &mut dyn FaceAnalyzer,
    client: &ServerClient,
) -> ReferenceRegistry {
    let mut builder = RegistryBuilder::new(analyzer);

    match config.registry.source {
        RegistrySource::Directory => {
            if let Err(e) = builder.add_directory(&config.registry.faces_dir) {
                log::warn!(
                    "Could not scan '{}': {}",
                    config.registry.faces_dir.display(),
                    e
                );
            }
        }
        RegistrySource::Remote => match client.fetch_students() {
            Ok(records) => {
                log::info!("Fetched {} student records", records.len());
                builder.add_records(&records);
            }
            Err(e) => log::warn!("Could not fetch students, registry is empty: {}", e),
        },
    }

    let registry = builder.build();
    if registry.is_empty() {
        log::warn!("No known faces found. Everyone will be 'Unknown'.");
    }
    registry
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>, std::io::Error> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
}
