//! Detection session of one page load.
//!
use std::{future::Future, sync::Arc, time::Duration};

use cam_source::playback::VideoFeed;
use simple_error::simple_error;

use crate::{
    nn::Detector,
    overlay::{draw_detection, Surface},
    registry::{Clock, LocalClock, SeenObjects},
    status::{StartupFailure, StatusBoard, CAMERA_ERROR_MESSAGE},
    Error,
};

/// Default delay between two detection cycles.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

/// Sequencing between camera start and model loading.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum StartupMode {
    /// Load the model as soon as playback started.
    #[default]
    PlayThenLoad,
    /// Wait until the first frame arrived, which reveals the video dimensions, then load.
    AwaitMetadata,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub period: Duration,
    /// Maintain the list of object classes seen since startup.
    pub with_history_list: bool,
    pub startup: StartupMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            with_history_list: false,
            startup: StartupMode::default(),
        }
    }
}

/// Owns everything a detection cycle touches.
///
/// A session is idle until `start` succeeded. Cycles of an idle session do nothing.
pub struct Session {
    config: SessionConfig,
    feed: Option<VideoFeed>,
    detector: Option<Box<dyn Detector>>,
    surface: Box<dyn Surface>,
    seen: Option<SeenObjects>,
    clock: Box<dyn Clock>,
    status: Arc<StatusBoard>,
}

impl Session {
    pub fn new(config: SessionConfig, surface: Box<dyn Surface>, status: Arc<StatusBoard>) -> Self {
        let seen = config.with_history_list.then(SeenObjects::new);
        Self {
            config,
            feed: None,
            detector: None,
            surface,
            seen,
            clock: Box::new(LocalClock),
            status,
        }
    }

    /// Replace the clock used for first-seen times.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the model is loaded and cycles run detections.
    pub fn is_running(&self) -> bool {
        self.feed.is_some() && self.detector.is_some()
    }

    pub fn seen_objects(&self) -> Option<&SeenObjects> {
        self.seen.as_ref()
    }

    /// Acquire the camera, then load the model.
    ///
    /// `load_model` is only invoked once the camera plays. Either failure is written to the
    /// error region and ends startup, there is no retry.
    pub async fn start<C, M, F>(
        &mut self,
        acquire_camera: C,
        load_model: M,
    ) -> Result<(), StartupFailure>
    where
        C: FnOnce() -> Result<VideoFeed, Error>,
        M: FnOnce() -> F,
        F: Future<Output = Result<Box<dyn Detector>, Error>>,
    {
        let feed = acquire_camera().map_err(|err| self.fail(StartupFailure::Camera(err)))?;

        if self.config.startup == StartupMode::AwaitMetadata {
            let (width, height) = feed
                .wait_for_first_frame()
                .await
                .map_err(|err| self.fail(StartupFailure::Camera(err)))?;
            log::info!("Video metadata available: {width}x{height}");
        }
        self.feed = Some(feed);
        log::info!("Camera playing, loading detection model");

        let detector = load_model()
            .await
            .map_err(|err| self.fail(StartupFailure::Model(err)))?;
        self.detector = Some(detector);
        log::info!("Session running");

        Ok(())
    }

    fn fail(&self, failure: StartupFailure) -> StartupFailure {
        log::error!("{failure}");
        self.status.set_error(failure.message());
        failure
    }

    /// Detect objects in the current frame and redraw the overlay.
    ///
    /// Returns the number of detections, zero for an idle session. Once video playback ended
    /// the camera message is shown and the session turns idle.
    pub fn run_cycle(&mut self) -> Result<usize, Error> {
        let (Some(feed), Some(detector)) = (self.feed.as_ref(), self.detector.as_ref()) else {
            return Ok(0);
        };

        if feed.has_ended() {
            // Playback does not restart, the session goes idle for good
            self.feed = None;
            self.status.set_error(CAMERA_ERROR_MESSAGE);
            return Err(simple_error!("video playback ended").into());
        }

        let frame = feed
            .current_frame()
            .ok_or_else(|| simple_error!("no video frame available yet"))?;
        let detections = detector.detect(&frame)?;

        self.surface.clear();
        for detection in detections.iter() {
            draw_detection(self.surface.as_mut(), detection);

            if let Some(seen) = self.seen.as_mut() {
                if seen.record(&detection.class, self.clock.as_ref()) {
                    log::info!("First detection of {}", &detection.class);
                    self.status.publish_objects(seen.entries().to_vec());
                }
            }
        }
        self.surface.present()?;

        let count = detections.len();
        log::debug!("Detected {count} objects");
        self.status.publish_detections(detections);

        Ok(count)
    }
}
