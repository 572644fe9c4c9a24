//! Playback of a frame source into a shared video feed.
//!
use std::{sync::Arc, thread::JoinHandle};

use image::RgbImage;
use simple_error::simple_error;
use tokio::sync::watch;

use crate::{sensors::FrameSource, Error};

pub type SharedFrame = Arc<RgbImage>;
pub type FrameReceiver = watch::Receiver<Option<SharedFrame>>;

/// Latest frame of a playing video source.
///
/// Cloning the feed is cheap, all clones observe the same frames. Readers never queue up
/// frames, they only ever see the current one.
#[derive(Clone)]
pub struct VideoFeed {
    tx: Arc<watch::Sender<Option<SharedFrame>>>,
    rx: FrameReceiver,
    ended_tx: Arc<watch::Sender<bool>>,
    ended: watch::Receiver<bool>,
}

impl VideoFeed {
    /// Create a feed without any frame yet.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        let (ended_tx, ended) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            ended_tx: Arc::new(ended_tx),
            ended,
        }
    }

    /// Create a feed that shows a single still frame.
    pub fn still(frame: RgbImage) -> Self {
        let feed = Self::new();
        feed.publish(frame);
        feed
    }

    /// Start playback of `source` on a dedicated capture thread.
    ///
    /// The thread publishes every captured frame. It ends on the first capture error or once
    /// no reader of the feed is left, and marks the feed as ended.
    pub fn play(&self, mut source: Box<dyn FrameSource>) -> std::io::Result<JoinHandle<()>> {
        let tx = Arc::clone(&self.tx);
        let ended_tx = Arc::clone(&self.ended_tx);
        std::thread::Builder::new()
            .name("video-playback".into())
            .spawn(move || {
                let mut frames = 0_u64;
                loop {
                    match source.capture() {
                        Ok(frame) => {
                            tx.send_replace(Some(Arc::new(frame)));
                            frames += 1;
                        }
                        Err(err) => {
                            log::error!("Capturing frame failed after {frames} frames: {err}");
                            break;
                        }
                    }
                    if tx.is_closed() {
                        log::info!("No readers left, stopping playback after {frames} frames");
                        break;
                    }
                }
                ended_tx.send_replace(true);
            })
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: RgbImage) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// Current frame, if playback delivered one yet.
    pub fn current_frame(&self) -> Option<SharedFrame> {
        self.rx.borrow().clone()
    }

    /// Whether playback stopped. The last frame stays available.
    pub fn has_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Wait until the first frame arrived and return its dimensions.
    ///
    /// Fails if playback ends before delivering a frame.
    pub async fn wait_for_first_frame(&self) -> Result<(u32, u32), Error> {
        let mut rx = self.rx.clone();
        let mut ended = self.ended.clone();
        loop {
            let dimensions = rx.borrow_and_update().as_ref().map(|frame| frame.dimensions());
            if let Some(dimensions) = dimensions {
                return Ok(dimensions);
            }
            if *ended.borrow_and_update() {
                return Err(simple_error!("video playback ended before the first frame").into());
            }
            tokio::select! {
                res = rx.changed() => res?,
                res = ended.changed() => res?,
            }
        }
    }

    /// Receiver notified about every new frame.
    pub fn subscribe(&self) -> FrameReceiver {
        self.tx.subscribe()
    }
}

impl Default for VideoFeed {
    fn default() -> Self {
        Self::new()
    }
}
