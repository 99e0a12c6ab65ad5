use crate::config::CameraConfig;
use image::{ImageBuffer, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as V4lCapture;
use v4l::FourCC;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to open camera device: {0}")]
    DeviceOpen(String),
    #[error("Failed to capture frame: {0}")]
    Capture(String),
    #[error("Frame conversion failed: {0}")]
    Conversion(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stream of frames. `Ok(None)` means the stream is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError>;
}

/// V4L2 camera with a persistent mmap stream.
pub struct Camera {
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    format: FourCC,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Result<Self, CaptureError> {
        let device_path = &config.device;
        let device_num = device_path
            .trim_start_matches("/dev/video")
            .parse::<usize>()
            .map_err(|_| CaptureError::DeviceOpen(format!("Unrecognized device: {}", device_path)))?;

        let device = Device::new(device_num)
            .map_err(|e| CaptureError::DeviceOpen(format!("{}: {}", device_path, e)))?;

        let mut format = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to get format: {}", e)))?;
        format.width = config.width;
        format.height = config.height;

        // MJPEG keeps USB bandwidth low; YUYV is the universal fallback
        for fourcc in [FourCC::new(b"MJPG"), FourCC::new(b"YUYV")] {
            format.fourcc = fourcc;
            if device.set_format(&format).is_ok() {
                break;
            }
        }

        let actual = device
            .format()
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to verify format: {}", e)))?;

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| CaptureError::DeviceOpen(format!("Failed to create stream: {}", e)))?;

        log::info!(
            "Camera initialized: {} {}x{} {}",
            device_path,
            actual.width,
            actual.height,
            actual.fourcc
        );

        Ok(Self {
            stream,
            width: actual.width,
            height: actual.height,
            format: actual.fourcc,
        })
    }

    pub fn capture_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| CaptureError::Capture(e.to_string()))?;

        match self.format.str() {
            Ok("MJPG") => decode_mjpeg(buf),
            Ok("YUYV") => decode_yuyv(buf, self.width, self.height),
            _ => Err(CaptureError::Conversion(format!(
                "Unsupported pixel format: {}",
                self.format
            ))),
        }
    }

    /// Enumerate `/dev/video*` devices
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let mut devices: Vec<String> = fs::read_dir("/dev")?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("video"))
            .map(|entry| entry.path().to_string_lossy().into_owned())
            .collect();
        devices.sort();
        Ok(devices)
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        self.capture_frame().map(Some)
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| CaptureError::Conversion(format!("MJPEG decode failed: {}", e)))
}

/// YUYV 4:2:2 (`Y0 U Y1 V` per pixel pair) to RGB, integer BT.601.
fn decode_yuyv(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let pixels = (width * height) as usize;
    if data.len() < pixels * 2 {
        return Err(CaptureError::Conversion("YUYV buffer too small".to_string()));
    }

    let to_rgb = |y: i32, u: i32, v: i32| {
        [
            (y + ((1436 * v) >> 10)).clamp(0, 255) as u8,
            (y - ((354 * u + 732 * v) >> 10)).clamp(0, 255) as u8,
            (y + ((1814 * u) >> 10)).clamp(0, 255) as u8,
        ]
    };

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in data[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (
            quad[0] as i32,
            quad[1] as i32 - 128,
            quad[2] as i32,
            quad[3] as i32 - 128,
        );
        rgb.extend_from_slice(&to_rgb(y0, u, v));
        rgb.extend_from_slice(&to_rgb(y1, u, v));
    }

    ImageBuffer::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Conversion("Failed to create RGB image".to_string()))
}

/// Replays still images from a directory in file-name order, then ends.
pub struct FrameDirectory {
    frames: std::vec::IntoIter<PathBuf>,
}

impl FrameDirectory {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CaptureError> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
            .collect();
        frames.sort();

        log::info!(
            "Replaying {} frames from {}",
            frames.len(),
            dir.as_ref().display()
        );
        Ok(Self {
            frames: frames.into_iter(),
        })
    }
}

impl FrameSource for FrameDirectory {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        for path in self.frames.by_ref() {
            match image::open(&path) {
                Ok(img) => return Ok(Some(img.to_rgb8())),
                Err(e) => log::warn!("Skipping unreadable frame {}: {}", path.display(), e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_decode_yuyv_gray() {
        // Y=128 with neutral chroma is mid gray
        let rgb = decode_yuyv(&[128u8; 8], 2, 2).unwrap();
        for pixel in rgb.pixels() {
            assert_eq!(*pixel, Rgb([128, 128, 128]));
        }
    }

    #[test]
    fn test_decode_yuyv_pairs_share_chroma() {
        // V=255 pushes red up for both pixels of the pair
        let rgb = decode_yuyv(&[50, 128, 200, 255], 2, 1).unwrap();
        assert!(rgb.get_pixel(0, 0)[0] > 50);
        assert!(rgb.get_pixel(1, 0)[0] > 200);
    }

    #[test]
    fn test_decode_yuyv_short_buffer() {
        assert!(decode_yuyv(&[0u8; 6], 2, 2).is_err());
    }

    #[test]
    fn test_frame_directory_order_and_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(2, 2, Rgb([2, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(2, 2, Rgb([1, 0, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

        let mut source = FrameDirectory::open(dir.path()).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 2);
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_list_devices() {
        // Works with or without V4L2 devices present
        if let Ok(devices) = Camera::list_devices() {
            assert!(devices.iter().all(|d| d.starts_with("/dev/video")));
        }
    }

    #[test]
    #[ignore] // Requires actual camera hardware
    fn test_camera_capture() {
        let config = CameraConfig::default();
        let mut camera = Camera::new(&config).expect("Failed to open camera");
        let frame = camera.capture_frame().expect("Failed to capture frame");

        assert_eq!(frame.width(), config.width);
        assert_eq!(frame.height(), config.height);
    }
}
