use crate::{CameraSource, Display, Error, Frame, KeySource, PixelFormat, Result};
use opencv::prelude::*;
use opencv::{core, highgui, imgproc, videoio};
use std::collections::HashSet;
use std::time::Duration;
use time::OffsetDateTime;

const TRACKBAR_NAME: &str = " Threshold:";

fn backend(e: opencv::Error) -> Error {
    Error::Backend(e.to_string())
}

/// Webcam or video file through `videoio`. Frames are delivered as `Bgr8`,
/// the native OpenCV channel order.
pub struct OpenCvCamera {
    cap: videoio::VideoCapture,
}

impl CameraSource for OpenCvCamera {
    fn open(spec: &str) -> Result<Self> {
        let cap = match spec.trim().parse::<i32>() {
            Ok(idx) => videoio::VideoCapture::new(idx, videoio::CAP_ANY),
            Err(_) => videoio::VideoCapture::from_file(spec, videoio::CAP_ANY),
        }
        .map_err(backend)?;
        if !cap.is_opened().map_err(backend)? {
            return Err(Error::NotFound(spec.to_string()));
        }
        tracing::debug!(device = spec, "opencv capture opened");
        Ok(Self { cap })
    }

    fn read(&mut self) -> Result<Frame> {
        let mut mat = core::Mat::default();
        let ok = self.cap.read(&mut mat).map_err(backend)?;
        if !ok || mat.empty() {
            return Err(Error::Io("empty frame".into()));
        }
        let mat = if mat.is_continuous() {
            mat
        } else {
            mat.try_clone().map_err(backend)?
        };
        let data = mat.data_bytes().map_err(backend)?.to_vec();
        Ok(Frame {
            width: mat.cols() as u32,
            height: mat.rows() as u32,
            pixel_format: PixelFormat::Bgr8,
            data,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    fn is_open(&self) -> bool {
        self.cap.is_opened().unwrap_or(false)
    }
}

/// Build an owned BGR (or single-channel) Mat that `imshow` understands.
fn frame_to_mat(frame: &Frame) -> Result<core::Mat> {
    if !frame.has_data() {
        return Err(Error::Io("frame has no pixel data".into()));
    }
    let flat = core::Mat::from_slice(&frame.data[..frame.expected_len()]).map_err(backend)?;
    let shaped = flat
        .reshape(frame.pixel_format.channels() as i32, frame.height as i32)
        .map_err(backend)?;
    match frame.pixel_format {
        PixelFormat::Bgr8 | PixelFormat::Gray8 => shaped.try_clone().map_err(backend),
        PixelFormat::Rgb8 => {
            let mut bgr = core::Mat::default();
            imgproc::cvt_color(&shaped, &mut bgr, imgproc::COLOR_RGB2BGR, 0).map_err(backend)?;
            Ok(bgr)
        }
    }
}

/// `highgui` windows, threshold trackbars and `wait_key` input.
#[derive(Default)]
pub struct HighGuiDisplay {
    controls: HashSet<String>,
}

impl HighGuiDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for HighGuiDisplay {
    fn show_image(&mut self, window: &str, image: &Frame) -> Result<()> {
        let mat = frame_to_mat(image)?;
        highgui::imshow(window, &mat).map_err(backend)
    }

    fn destroy_window(&mut self, window: &str) -> Result<()> {
        self.controls.remove(window);
        // Destroying a window that was never shown raises in some builds
        if let Err(e) = highgui::destroy_window(window) {
            tracing::debug!(window, error = %e, "destroy_window ignored");
        }
        Ok(())
    }

    fn create_threshold_control(&mut self, window: &str, initial: u8, max: u8) -> Result<()> {
        highgui::named_window(window, highgui::WINDOW_AUTOSIZE).map_err(backend)?;
        if self.controls.insert(window.to_string()) {
            highgui::create_trackbar(TRACKBAR_NAME, window, None, max as i32, None)
                .map_err(backend)?;
        }
        highgui::set_trackbar_pos(TRACKBAR_NAME, window, initial as i32).map_err(backend)
    }

    fn threshold_control(&mut self, window: &str) -> Result<Option<u8>> {
        if !self.controls.contains(window) {
            return Ok(None);
        }
        let pos = highgui::get_trackbar_pos(TRACKBAR_NAME, window).map_err(backend)?;
        Ok(Some(pos.clamp(0, 255) as u8))
    }
}

impl KeySource for HighGuiDisplay {
    fn poll_key(&mut self, wait: Duration) -> Result<Option<i32>> {
        let key = highgui::wait_key(wait.as_millis().min(i32::MAX as u128) as i32)
            .map_err(backend)?;
        Ok((key >= 0).then_some(key & 0xff))
    }
}
