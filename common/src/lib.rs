//! Common code shared between `detect_server` and `cam_source`.
pub mod detection;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Width of the drawing surface and of every frame handed to the detector.
pub const CANVAS_WIDTH: u32 = 640;

/// Height of the drawing surface and of every frame handed to the detector.
pub const CANVAS_HEIGHT: u32 = 480;
