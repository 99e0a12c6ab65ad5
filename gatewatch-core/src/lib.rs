pub mod align;
pub mod analyze;
pub mod capture;
pub mod config;
pub mod cooldown;
pub mod detect;
pub mod display;
pub mod embed;
pub mod matcher;
pub mod overlay;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod runtime;
pub mod server;

use analyze::{FaceAnalyzer, OnnxFaceAnalyzer};
use capture::{Camera, FrameDirectory, FrameSource};
use chrono::{DateTime, Local};
use display::FrameSink;
use matcher::Matcher;
use pipeline::Pipeline;
use report::EventReporter;
use server::ServerClient;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Camera error: {0}")]
    Capture(#[from] capture::CaptureError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] embed::EmbedError),
    #[error("Server error: {0}")]
    Server(#[from] server::ServerError),
}

/// Replay frames from `replay` when given, otherwise open the configured camera.
pub fn open_source(
    config: &config::Config,
    replay: Option<&Path>,
) -> Result<Box<dyn FrameSource>, Error> {
    let source: Box<dyn FrameSource> = match replay {
        Some(dir) => Box::new(FrameDirectory::open(dir)?),
        None => Box::new(Camera::new(&config.camera)?),
    };
    Ok(source)
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Quit,
    StreamEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detection_cycles: u64,
    pub events: u64,
    pub exit: RunExit,
}

/// The live loop: owns the analyzer and the pipeline state for one session.
pub struct Watcher {
    analyzer: Box<dyn FaceAnalyzer>,
    pipeline: Pipeline,
}

impl Watcher {
    pub fn new(analyzer: Box<dyn FaceAnalyzer>, pipeline: Pipeline) -> Self {
        Self { analyzer, pipeline }
    }

    /// Load models, build the registry from the configured source and
    /// connect the reporter to the server.
    pub fn from_config(config: &config::Config) -> Result<Self, Error> {
        config.validate()?;
        let mut analyzer = OnnxFaceAnalyzer::from_config(config)?;
        let client = ServerClient::new(&config.server)?;

        let registry = registry::load(config, &mut analyzer, &client);
        let counts = registry.label_counts();
        log::info!(
            "Loaded {} reference faces for {} labels",
            registry.len(),
            counts.len()
        );

        let matcher = Matcher::new(registry, config.matching.threshold);
        let reporter = EventReporter::new(Box::new(client));
        let pipeline = Pipeline::from_config(config, matcher, reporter);

        Ok(Self::new(Box::new(analyzer), pipeline))
    }

    /// Run until `quit` is raised or the source runs dry, stamping events
    /// with the local wall clock.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        quit: &AtomicBool,
    ) -> RunSummary {
        self.run_with_clock(source, sink, quit, Local::now)
    }

    pub fn run_with_clock<F>(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        quit: &AtomicBool,
        mut clock: F,
    ) -> RunSummary
    where
        F: FnMut() -> DateTime<Local>,
    {
        log::info!("Watching. Press 'q' then Enter to quit.");

        let exit = loop {
            if quit.load(Ordering::Relaxed) {
                break RunExit::Quit;
            }

            let mut frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break RunExit::StreamEnded,
                Err(e) => {
                    log::error!("Failed to grab frame: {}", e);
                    break RunExit::StreamEnded;
                }
            };

            let frame_index = self.pipeline.state().frame_count;
            let results = self
                .pipeline
                .process_frame(self.analyzer.as_mut(), &frame, clock());
            overlay::draw_results(&mut frame, results);

            if let Err(e) = sink.show(frame_index, &frame) {
                log::warn!("{}", e);
            }
        };

        let state = self.pipeline.state();
        let summary = RunSummary {
            frames: state.frame_count,
            detection_cycles: state.detection_cycles,
            events: state.events_sent,
            exit,
        };
        log::info!(
            "Stopped after {} frames ({} detection cycles, {} events)",
            summary.frames,
            summary.detection_cycles,
            summary.events
        );
        summary
    }
}
