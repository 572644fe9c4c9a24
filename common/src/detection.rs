//! Detection results as produced by a detector for a single frame.
//!
use serde::{Deserialize, Serialize};

/// Rectangular region in pixel coordinates of the frame.
///
/// The basis of the coordinate frame is the top left corner.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from normalized `[ymin, xmin, ymax, xmax]` corners, scaled to a frame of
    /// `frame_width` x `frame_height` pixels and clipped to it.
    pub fn from_normalized_corners(corners: [f32; 4], frame_width: u32, frame_height: u32) -> Self {
        let (w, h) = (frame_width as f32, frame_height as f32);
        let y_tl = (corners[0] * h).clamp(0.0, h);
        let x_tl = (corners[1] * w).clamp(0.0, w);
        let y_br = (corners[2] * h).clamp(0.0, h);
        let x_br = (corners[3] * w).clamp(0.0, w);

        Self {
            x: x_tl,
            y: y_tl,
            width: (x_br - x_tl).max(0.0),
            height: (y_br - y_tl).max(0.0),
        }
    }
}

/// Single detected object.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    /// Class label, e.g. `person`.
    pub class: String,
    /// Confidence in `[0, 1]`.
    pub score: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class: impl Into<String>, score: f32) -> Self {
        Self {
            bbox,
            class: class.into(),
            score,
        }
    }
}
