//! Object detection on a webcam stream, shown in the browser.
pub mod detection_loop;
pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod overlay;
pub mod registry;
pub mod session;
pub mod status;
pub mod utils;

pub use common::Error;
