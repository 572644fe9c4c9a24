//! Sensors module.
//!
use common::{CANVAS_HEIGHT, CANVAS_WIDTH};
use image::{imageops::FilterType, RgbImage};
use rscam::{Camera, Config};
use simple_error::simple_error;

use crate::Error;

/// Source of decoded video frames.
pub trait FrameSource: Send {
    /// Block until the next frame is available and return it.
    fn capture(&mut self) -> Result<RgbImage, Error>;
}

/// MJPG camera on a Linux machine, delivering frames at canvas size.
pub struct LinuxCamera {
    cam: Camera,
    resolution: (u32, u32),
}

impl LinuxCamera {
    /// Open and start the video device `device_name`.
    ///
    /// The canvas resolution is preferred. If the device does not offer it, the highest
    /// resolution is used and frames are resized on capture.
    pub fn open(device_name: &str) -> Result<Self, Error> {
        let format = b"MJPG";
        let mut cam = Camera::new(device_name)?;
        log_supported_formats(&cam, "MJPG");

        log::info!("Using camera {}", device_name);

        let resolution = get_canvas_or_max_resolution(&cam, format)?;
        let interval = get_min_frame_interval(&cam, format, resolution)?;
        log::info!(
            "Starting capture at {}x{}, interval {}/{}s",
            resolution.0,
            resolution.1,
            interval.0,
            interval.1
        );

        cam.start(&Config {
            interval,
            resolution,
            format,
            ..Default::default()
        })?;

        Ok(Self { cam, resolution })
    }

    /// Resolution the device is capturing at.
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

/// Consecutive undecodable frames after which the device counts as failed.
const MAX_CORRUPT_FRAMES: usize = 30;

impl FrameSource for LinuxCamera {
    fn capture(&mut self) -> Result<RgbImage, Error> {
        decode_next(|| Ok(self.cam.capture()?))
    }
}

/// Grab JPEG frames until one decodes, skipping corrupt ones.
fn decode_next<B>(mut grab: impl FnMut() -> Result<B, Error>) -> Result<RgbImage, Error>
where
    B: std::ops::Deref<Target = [u8]>,
{
    let mut corrupt = 0;
    loop {
        let frame = grab()?;
        match turbojpeg::decompress_image::<image::Rgb<u8>>(&frame[..]) {
            Ok(image) => return Ok(fit_to_canvas(image)),
            Err(err) => {
                corrupt += 1;
                log::warn!("Skipping frame that failed to decode: {err}");
                if corrupt >= MAX_CORRUPT_FRAMES {
                    let msg = format!("{corrupt} consecutive frames failed to decode");
                    return Err(simple_error!(msg).into());
                }
            }
        }
    }
}

/// Resize a frame to the canvas size unless it already matches.
pub fn fit_to_canvas(image: RgbImage) -> RgbImage {
    if image.dimensions() == (CANVAS_WIDTH, CANVAS_HEIGHT) {
        return image;
    }

    image::imageops::resize(&image, CANVAS_WIDTH, CANVAS_HEIGHT, FilterType::Triangle)
}

/// Get the canvas resolution if supported, otherwise the maximum supported resolution.
fn get_canvas_or_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
    let canvas = (CANVAS_WIDTH, CANVAS_HEIGHT);
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => {
            if resolutions.contains(&canvas) {
                Some(canvas)
            } else {
                resolutions
                    .iter()
                    // Get the highest resolution in terms of number of pixels
                    .max_by_key(|res| res.0 * res.1)
                    .copied()
            }
        }
        rscam::ResolutionInfo::Stepwise { min, max, step: _ } => {
            let fits = (min.0..=max.0).contains(&canvas.0) && (min.1..=max.1).contains(&canvas.1);
            Some(if fits { canvas } else { max })
        }
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the shortest frame interval, i.e. the highest frame rate, for the given resolution.
fn get_min_frame_interval(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), Error> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame intervals: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            // Intervals are (numerator, denominator) seconds per frame
            .max_by_key(|(num, den)| den.checked_div(*num).unwrap_or(0))
            .copied(),
        rscam::IntervalInfo::Stepwise { min, max: _, step: _ } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(Result::ok).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}
