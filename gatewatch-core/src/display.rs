//! Where annotated frames end up.

use crate::config::DisplayConfig;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("Failed to write preview {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Receives every annotated frame, in order.
pub trait FrameSink {
    fn show(&mut self, frame_index: u64, frame: &RgbImage) -> Result<(), DisplayError>;
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct Headless;

impl FrameSink for Headless {
    fn show(&mut self, _frame_index: u64, _frame: &RgbImage) -> Result<(), DisplayError> {
        Ok(())
    }
}

/// Overwrites a single image file with every Nth annotated frame.
#[derive(Debug)]
pub struct PreviewFile {
    path: PathBuf,
    every: u64,
}

impl PreviewFile {
    pub fn new<P: AsRef<Path>>(path: P, every: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            every: u64::from(every.max(1)),
        }
    }
}

impl FrameSink for PreviewFile {
    fn show(&mut self, frame_index: u64, frame: &RgbImage) -> Result<(), DisplayError> {
        if frame_index % self.every != 0 {
            return Ok(());
        }
        frame.save(&self.path).map_err(|source| DisplayError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Preview file when one is configured, otherwise nothing.
pub fn from_config(config: &DisplayConfig) -> Box<dyn FrameSink> {
    match &config.preview_path {
        Some(path) => {
            log::info!("Writing preview frames to {}", path.display());
            Box::new(PreviewFile::new(path, config.preview_every))
        }
        None => Box::new(Headless),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preview_written_every_n_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut sink = PreviewFile::new(&path, 3);

        sink.show(1, &RgbImage::from_pixel(4, 4, Rgb([1, 0, 0]))).unwrap();
        assert!(!path.exists());

        sink.show(3, &RgbImage::from_pixel(4, 4, Rgb([3, 0, 0]))).unwrap();
        sink.show(4, &RgbImage::from_pixel(4, 4, Rgb([4, 0, 0]))).unwrap();

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.get_pixel(0, 0)[0], 3);
    }

    #[test]
    fn test_preview_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PreviewFile::new(dir.path().join("missing").join("preview.png"), 1);
        assert!(sink.show(0, &RgbImage::new(2, 2)).is_err());
    }

    #[test]
    fn test_from_config_headless_by_default() {
        let mut sink = from_config(&DisplayConfig::default());
        assert!(sink.show(0, &RgbImage::new(2, 2)).is_ok());
    }
}
