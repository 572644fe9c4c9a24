//! Regions of the page that the session writes to: the error message, the detected-objects
//! list and the latest detection result.
//!
use std::sync::Arc;

use common::detection::Detection;
use thiserror::Error;
use tokio::sync::watch;

use crate::{registry::SeenObject, Error};

pub const CAMERA_ERROR_MESSAGE: &str = "Error accessing the webcam. Please make sure a camera is \
     connected and that you have granted permission to use it.";

pub const MODEL_ERROR_MESSAGE: &str = "Error loading the object detection model.";

/// Startup step that failed. Both are terminal for the session.
#[derive(Debug, Error)]
pub enum StartupFailure {
    #[error("camera access failed: {0}")]
    Camera(Error),
    #[error("model loading failed: {0}")]
    Model(Error),
}

impl StartupFailure {
    /// User-visible text for the error region.
    pub fn message(&self) -> &'static str {
        match self {
            StartupFailure::Camera(_) => CAMERA_ERROR_MESSAGE,
            StartupFailure::Model(_) => MODEL_ERROR_MESSAGE,
        }
    }
}

pub struct StatusBoard {
    error: watch::Sender<Option<String>>,
    objects: watch::Sender<Arc<Vec<SeenObject>>>,
    detections: watch::Sender<Arc<Vec<Detection>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            error: watch::channel(None).0,
            objects: watch::channel(Arc::new(Vec::new())).0,
            detections: watch::channel(Arc::new(Vec::new())).0,
        }
    }

    /// Replace the content of the error region.
    pub fn set_error(&self, message: impl Into<String>) {
        self.error.send_replace(Some(message.into()));
    }

    pub fn error_text(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    /// Replace the displayed list of seen objects.
    pub fn publish_objects(&self, objects: Vec<SeenObject>) {
        self.objects.send_replace(Arc::new(objects));
    }

    pub fn objects(&self) -> Arc<Vec<SeenObject>> {
        Arc::clone(&self.objects.borrow())
    }

    pub fn publish_detections(&self, detections: Vec<Detection>) {
        self.detections.send_replace(Arc::new(detections));
    }

    pub fn detections(&self) -> Arc<Vec<Detection>> {
        Arc::clone(&self.detections.borrow())
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
