//! Per-frame detection cycle: sample, detect, identify, gate, report.

use crate::analyze::FaceAnalyzer;
use crate::config::{Config, MatchingConfig};
use crate::cooldown::CooldownGate;
use crate::detect::BoundingBox;
use crate::matcher::{Identity, Matcher};
use crate::report::EventReporter;
use chrono::{DateTime, Local};
use image::{imageops, Rgb, RgbImage};

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// One identified face from the latest detection cycle, in source-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
    pub color: Rgb<u8>,
}

impl MatchResult {
    fn new(bbox: BoundingBox, identity: Identity) -> Self {
        let color = if identity.is_known() {
            KNOWN_COLOR
        } else {
            UNKNOWN_COLOR
        };
        Self {
            bbox,
            label: identity.label,
            score: identity.score,
            color,
        }
    }
}

/// Everything the loop mutates between frames.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub frame_count: u64,
    pub cooldowns: CooldownGate,
    /// Results of the most recent detection cycle, redrawn on every frame.
    pub last_results: Vec<MatchResult>,
    pub detection_cycles: u64,
    pub events_sent: u64,
}

/// Sampling cadence and downscale factor.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    pub skip_frames: u64,
    pub detection_scale: f32,
}

impl From<&MatchingConfig> for Sampling {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            skip_frames: config.skip_frames,
            detection_scale: config.detection_scale,
        }
    }
}

impl Sampling {
    pub fn is_detection_frame(&self, frame_count: u64) -> bool {
        frame_count % self.skip_frames.max(1) == 0
    }
}

pub struct Pipeline {
    matcher: Matcher,
    reporter: EventReporter,
    sampling: Sampling,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        matcher: Matcher,
        reporter: EventReporter,
        sampling: Sampling,
        cooldowns: CooldownGate,
    ) -> Self {
        Self {
            matcher,
            reporter,
            sampling,
            state: PipelineState {
                cooldowns,
                ..PipelineState::default()
            },
        }
    }

    pub fn from_config(config: &Config, matcher: Matcher, reporter: EventReporter) -> Self {
        Self::new(
            matcher,
            reporter,
            Sampling::from(&config.matching),
            CooldownGate::from_config(&config.cooldown),
        )
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Advance by one captured frame, running a detection cycle when the frame
    /// counter lands on the sampling stride.
    pub fn process_frame(
        &mut self,
        analyzer: &mut dyn FaceAnalyzer,
        frame: &RgbImage,
        now: DateTime<Local>,
    ) -> &[MatchResult] {
        if self.sampling.is_detection_frame(self.state.frame_count) {
            if let Some(results) = self.detection_cycle(analyzer, frame, now) {
                self.state.last_results = results;
            }
            self.state.detection_cycles += 1;
        }
        self.state.frame_count += 1;
        &self.state.last_results
    }

    /// Detect on a downscaled copy, then identify, gate and report each face.
    /// Returns `None` when detection itself failed so the previous results stay up.
    fn detection_cycle(
        &mut self,
        analyzer: &mut dyn FaceAnalyzer,
        frame: &RgbImage,
        now: DateTime<Local>,
    ) -> Option<Vec<MatchResult>> {
        let scale = self.sampling.detection_scale;
        let faces = if scale < 1.0 {
            let (width, height) = frame.dimensions();
            let small = imageops::resize(
                frame,
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
                imageops::FilterType::Triangle,
            );
            analyzer.analyze(&small)
        } else {
            analyzer.analyze(frame)
        };

        let faces = match faces {
            Ok(faces) => faces,
            Err(e) => {
                log::warn!("Face detection failed on frame {}: {}", self.state.frame_count, e);
                return None;
            }
        };

        let restore = 1.0 / scale;
        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let identity = self.matcher.identify(&face.embedding);
            log::debug!("Face {} ({:.2})", identity.label, identity.score);

            let result = MatchResult::new(face.bbox.scaled(restore), identity);
            self.emit_if_due(&result.label, frame, now);
            results.push(result);
        }

        Some(results)
    }

    fn emit_if_due(&mut self, label: &str, frame: &RgbImage, now: DateTime<Local>) {
        if !self.state.cooldowns.should_emit(label, now) {
            if let Some(last) = self.state.cooldowns.last_emission(label) {
                log::trace!("'{}' cooling down, last sent {}", label, last);
            }
            return;
        }

        self.reporter.report(label, now, Some(frame));
        // recorded on dispatch, delivered or not
        self.state.cooldowns.record_emission(label, now);
        self.state.events_sent += 1;
    }
}
