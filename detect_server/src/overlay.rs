//! Drawing detections onto a surface laid over the video.
//!
use std::{path::Path, sync::Arc};

use common::{
    detection::{BBox, Detection},
    CANVAS_HEIGHT, CANVAS_WIDTH,
};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};
use simple_error::simple_error;
use tokio::sync::watch;

use crate::Error;

/// Cyan, used for both boxes and labels.
pub const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 255, 255, 255]);

pub const LINE_WIDTH: u32 = 2;

pub const FONT_SIZE: f32 = 16.0;

/// Labels closer than this to the top edge are drawn at this fixed offset instead.
const LABEL_MIN_Y: f32 = 10.0;

/// Distance between a label's baseline and the top of its box.
const LABEL_GAP: f32 = 5.0;

/// 2D drawing primitives of the overlay.
pub trait Surface: Send {
    /// Remove everything drawn so far.
    fn clear(&mut self);

    fn stroke_rect(&mut self, bbox: &BBox);

    /// Draw `text` with its baseline starting at (`x`, `y`).
    fn fill_text(&mut self, text: &str, x: f32, y: f32);

    /// Make the current drawing visible.
    fn present(&mut self) -> Result<(), Error>;
}

/// Label drawn next to a detection, e.g. `person - 87%`.
pub fn label_text(detection: &Detection) -> String {
    format!(
        "{} - {}%",
        detection.class,
        (detection.score * 100.0).round() as i64
    )
}

/// Baseline of the label for a box whose top edge is at `top`.
pub fn label_y(top: f32) -> f32 {
    if top > LABEL_MIN_Y {
        top - LABEL_GAP
    } else {
        LABEL_MIN_Y
    }
}

/// Draw box and label of one detection.
pub fn draw_detection(surface: &mut dyn Surface, detection: &Detection) {
    surface.stroke_rect(&detection.bbox);
    surface.fill_text(
        &label_text(detection),
        detection.bbox.x,
        label_y(detection.bbox.y),
    );
}

/// Load a TrueType font from disk.
pub fn load_font(path: impl AsRef<Path>) -> Result<Font<'static>, Error> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    Font::try_from_vec(data)
        .ok_or_else(|| simple_error!("invalid font file {}", path.display()).into())
}

/// Transparent raster overlay of canvas size.
///
/// Every `present` publishes a snapshot which is composited onto the video frames.
pub struct OverlayCanvas {
    overlay: RgbaImage,
    font: Option<Font<'static>>,
    tx: watch::Sender<Arc<RgbaImage>>,
}

impl OverlayCanvas {
    /// Labels are only drawn if a `font` is given.
    pub fn new(font: Option<Font<'static>>) -> Self {
        let overlay = RgbaImage::new(CANVAS_WIDTH, CANVAS_HEIGHT);
        let (tx, _rx) = watch::channel(Arc::new(overlay.clone()));
        Self { overlay, font, tx }
    }

    /// Receiver of the presented overlays.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RgbaImage>> {
        self.tx.subscribe()
    }

    /// Current, possibly not yet presented, drawing.
    pub fn image(&self) -> &RgbaImage {
        &self.overlay
    }
}

impl Surface for OverlayCanvas {
    fn clear(&mut self) {
        self.overlay
            .pixels_mut()
            .for_each(|pixel| *pixel = Rgba([0, 0, 0, 0]));
    }

    fn stroke_rect(&mut self, bbox: &BBox) {
        if bbox.width < 1.0 || bbox.height < 1.0 {
            return;
        }

        // The stroke is centered on the outline, one pixel on either side
        let half = (LINE_WIDTH / 2) as i32;
        for offset in -half..(LINE_WIDTH as i32 - half) {
            let width = bbox.width as i32 - 2 * offset;
            let height = bbox.height as i32 - 2 * offset;
            if width <= 0 || height <= 0 {
                continue;
            }
            let rect = Rect::at(bbox.x as i32 + offset, bbox.y as i32 + offset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(&mut self.overlay, rect, OVERLAY_COLOR);
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32) {
        let Some(font) = self.font.as_ref() else {
            log::trace!("No font loaded, skipping label {text:?}");
            return;
        };

        let scale = Scale::uniform(FONT_SIZE);
        // imageproc positions text by its top edge
        let top = y - font.v_metrics(scale).ascent;
        draw_text_mut(
            &mut self.overlay,
            OVERLAY_COLOR,
            x as i32,
            top as i32,
            scale,
            font,
            text,
        );
    }

    fn present(&mut self) -> Result<(), Error> {
        self.tx.send_replace(Arc::new(self.overlay.clone()));
        Ok(())
    }
}

/// Lay the overlay over a video frame. Frames of other sizes are covered from the top left.
pub fn composite(frame: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let mut annotated = frame.clone();
    for (x, y, pixel) in annotated.enumerate_pixels_mut() {
        if x >= overlay.width() || y >= overlay.height() {
            continue;
        }
        let Rgba([r, g, b, a]) = *overlay.get_pixel(x, y);
        if a == 0 {
            continue;
        }
        let alpha = a as f32 / 255.0;
        let blend =
            |over: u8, under: u8| (over as f32 * alpha + under as f32 * (1.0 - alpha)).round() as u8;
        *pixel = Rgb([
            blend(r, pixel[0]),
            blend(g, pixel[1]),
            blend(b, pixel[2]),
        ]);
    }
    annotated
}

#[cfg(test)]
mod test {

    use super::*;

    fn person(y: f32, score: f32) -> Detection {
        Detection::new(BBox::new(20.0, y, 100.0, 200.0), "person", score)
    }

    #[test]
    fn label_shows_rounded_percent() {
        assert_eq!(label_text(&person(50.0, 0.873)), "person - 87%");
        assert_eq!(label_text(&person(50.0, 0.875)), "person - 88%");
        assert_eq!(label_text(&person(50.0, 1.0)), "person - 100%");
    }

    #[test]
    fn label_sits_above_the_box() {
        assert_eq!(label_y(50.0), 45.0);
        assert_eq!(label_y(10.5), 5.5);
    }

    #[test]
    fn label_near_the_top_edge_uses_fallback_offset() {
        assert_eq!(label_y(5.0), 10.0);
        assert_eq!(label_y(10.0), 10.0);
        assert_eq!(label_y(0.0), 10.0);
    }

    #[test]
    fn stroked_rect_is_two_pixels_wide() {
        let mut canvas = OverlayCanvas::new(None);
        canvas.stroke_rect(&BBox::new(100.0, 100.0, 50.0, 40.0));

        let image = canvas.image();
        assert_eq!(*image.get_pixel(100, 120), OVERLAY_COLOR);
        assert_eq!(*image.get_pixel(99, 120), OVERLAY_COLOR);
        assert_eq!(*image.get_pixel(98, 120), Rgba([0, 0, 0, 0]));
        assert_eq!(*image.get_pixel(101, 120), Rgba([0, 0, 0, 0]));
        assert_eq!(*image.get_pixel(125, 120), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let mut canvas = OverlayCanvas::new(None);
        canvas.stroke_rect(&BBox::new(10.0, 10.0, 0.0, 0.0));
        assert!(canvas.image().pixels().all(|pixel| pixel[3] == 0));
    }

    #[test]
    fn clear_removes_previous_drawing() {
        let mut canvas = OverlayCanvas::new(None);
        canvas.stroke_rect(&BBox::new(10.0, 10.0, 30.0, 30.0));
        canvas.clear();
        assert!(canvas.image().pixels().all(|pixel| pixel[3] == 0));
    }

    #[test]
    fn text_without_font_is_skipped() {
        let mut canvas = OverlayCanvas::new(None);
        canvas.fill_text("person - 87%", 10.0, 10.0);
        assert!(canvas.image().pixels().all(|pixel| pixel[3] == 0));
    }

    #[test]
    fn present_publishes_a_snapshot() -> Result<(), Error> {
        let mut canvas = OverlayCanvas::new(None);
        let rx = canvas.subscribe();

        canvas.stroke_rect(&BBox::new(10.0, 10.0, 30.0, 30.0));
        canvas.present()?;
        canvas.clear();

        assert_eq!(*rx.borrow().get_pixel(10, 20), OVERLAY_COLOR);
        Ok(())
    }

    #[test]
    fn composite_keeps_transparent_pixels() {
        let frame = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgb([10, 20, 30]));
        let mut canvas = OverlayCanvas::new(None);
        canvas.stroke_rect(&BBox::new(10.0, 10.0, 30.0, 30.0));

        let annotated = composite(&frame, canvas.image());
        assert_eq!(*annotated.get_pixel(10, 20), Rgb([0, 255, 255]));
        assert_eq!(*annotated.get_pixel(20, 20), Rgb([10, 20, 30]));
    }
}
