//! Webcam capture and playback of the captured frames.
pub mod playback;
pub mod sensors;

pub use common::Error;
