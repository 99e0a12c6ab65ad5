use crate::matcher::UNKNOWN_LABEL;
use crate::server::ServerError;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Delivery failed: {0}")]
    Server(#[from] ServerError),
    #[error("Delivery failed: {0}")]
    Other(String),
}

/// Timestamp layout the log endpoint expects.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const JPEG_QUALITY: u8 = 90;

/// One sighting, built per emission and never kept.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub label: String,
    pub timestamp: DateTime<Local>,
    /// JPEG snapshot, only attached to unknown faces.
    pub image: Option<Vec<u8>>,
}

impl LogEvent {
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Where events go. A failed delivery is lost.
pub trait LogTransport {
    fn deliver(&mut self, event: &LogEvent) -> Result<(), ReportError>;
}

/// Builds [`LogEvent`]s and hands them to a transport, swallowing failures.
pub struct EventReporter {
    transport: Box<dyn LogTransport>,
}

impl EventReporter {
    pub fn new(transport: Box<dyn LogTransport>) -> Self {
        Self { transport }
    }

    /// Build the event for `label`. The frame is JPEG-encoded only for unknown faces.
    pub fn build_event(
        label: &str,
        timestamp: DateTime<Local>,
        frame: Option<&RgbImage>,
    ) -> Result<LogEvent, ReportError> {
        let image = match frame {
            Some(frame) if label == UNKNOWN_LABEL => Some(encode_jpeg(frame)?),
            _ => None,
        };

        Ok(LogEvent {
            label: label.to_string(),
            timestamp,
            image,
        })
    }

    /// Send one event. Returns whether delivery succeeded; errors never escape.
    pub fn report(
        &mut self,
        label: &str,
        timestamp: DateTime<Local>,
        frame: Option<&RgbImage>,
    ) -> bool {
        let event = match Self::build_event(label, timestamp, frame) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping snapshot for '{}': {}", label, e);
                LogEvent {
                    label: label.to_string(),
                    timestamp,
                    image: None,
                }
            }
        };

        if event.label == UNKNOWN_LABEL {
            if event.image.is_some() {
                log::info!("[ALERT] Sending intruder photo to server...");
            } else {
                log::info!("[ALERT] Reporting intruder without a photo");
            }
        } else {
            log::info!("[LOG] Logging attendance for: {}", event.label);
        }

        match self.transport.deliver(&event) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Could not deliver event for '{}': {}", event.label, e);
                false
            }
        }
    }
}

pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY).encode_image(frame)?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Keeps every delivered event; shared so tests can inspect after handing it off.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) events: Rc<RefCell<Vec<LogEvent>>>,
    }

    impl LogTransport for RecordingTransport {
        fn deliver(&mut self, event: &LogEvent) -> Result<(), ReportError> {
            self.events.borrow_mut().push(event.clone());
            Ok(())
        }
    }

    pub(crate) struct FailingTransport;

    impl LogTransport for FailingTransport {
        fn deliver(&mut self, _event: &LogEvent) -> Result<(), ReportError> {
            Err(ReportError::Other("connection refused".to_string()))
        }
    }

    fn when() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_timestamp_format() {
        let event = EventReporter::build_event("Alice", when(), None).unwrap();
        assert_eq!(event.formatted_timestamp(), "2025-01-02 03:04:05");
    }

    #[test]
    fn test_unknown_with_frame_gets_jpeg() {
        let frame = RgbImage::from_pixel(16, 16, image::Rgb([10, 200, 30]));
        let event = EventReporter::build_event(UNKNOWN_LABEL, when(), Some(&frame)).unwrap();

        let jpeg = event.image.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_known_never_gets_image() {
        let frame = RgbImage::new(8, 8);
        let event = EventReporter::build_event("Alice", when(), Some(&frame)).unwrap();
        assert!(event.image.is_none());

        let event = EventReporter::build_event(UNKNOWN_LABEL, when(), None).unwrap();
        assert!(event.image.is_none());
    }

    #[test]
    fn test_report_delivers() {
        let transport = RecordingTransport::default();
        let mut reporter = EventReporter::new(Box::new(transport.clone()));

        assert!(reporter.report("Alice", when(), None));
        let events = transport.events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "Alice");
    }

    /// Captures log records so tests can assert on the reporter's output.
    struct CaptureLogger;

    static LINES: std::sync::Mutex<Vec<String>> = std::sync::Mutex::new(Vec::new());

    impl log::Log for CaptureLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            LINES.lock().unwrap().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    #[test]
    fn test_unknown_without_snapshot_still_logs_alert() {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Info);

        let mut reporter = EventReporter::new(Box::new(RecordingTransport::default()));
        // zero-sized frames cannot be JPEG-encoded, so the snapshot is dropped
        let empty = RgbImage::new(0, 0);
        assert!(reporter.report(UNKNOWN_LABEL, when(), Some(&empty)));

        let lines = LINES.lock().unwrap();
        assert!(lines.iter().any(|l| l.starts_with("[ALERT]")));
        assert!(!lines
            .iter()
            .any(|l| l == "[LOG] Logging attendance for: Unknown"));
    }

    #[test]
    fn test_report_swallows_failure() {
        let mut reporter = EventReporter::new(Box::new(FailingTransport));
        let frame = RgbImage::new(8, 8);
        assert!(!reporter.report(UNKNOWN_LABEL, when(), Some(&frame)));
    }
}
