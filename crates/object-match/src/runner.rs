//! The interactive frame loop: read, react to the previous key, preview,
//! match, then wait briefly for the next key.

use crate::render::{contour_overlay, draw_matches, mask_frame, Palette};
use crate::session::{CaptureSession, MatchReport, SessionState, Snapshot};
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use vision_capture::{CameraSource, Display, Frame, KeySource, PixelFormat};

pub const CAMERA_WINDOW: &str = "Camera";
pub const CAPTURE_WINDOW: &str = "Captured Image";
pub const THRESHOLD_WINDOW: &str = "Threshold Output";
pub const CROPPED_WINDOW: &str = "Cropped Image";
pub const CONTOURS_WINDOW: &str = "Contours";

const PREVIEW_WINDOWS: [&str; 4] = [
    CAPTURE_WINDOW,
    THRESHOLD_WINDOW,
    CROPPED_WINDOW,
    CONTOURS_WINDOW,
];

/// Side of the blank camera window shown when live frames are not displayed.
pub const PLACEHOLDER_SIDE: u32 = 250;

pub const KEY_ESC: i32 = 27;
pub const KEY_SPACE: i32 = 32;

/// "Image N" with N counted from 1.
pub fn snapshot_window(index: usize) -> String {
    format!("Image {}", index + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Quit,
    StartCapture,
    Commit,
}

impl Signal {
    pub fn from_key(key: i32) -> Option<Self> {
        match key {
            KEY_ESC => Some(Signal::Quit),
            k if k == 'q' as i32 => Some(Signal::Quit),
            KEY_SPACE => Some(Signal::StartCapture),
            10 | 13 => Some(Signal::Commit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Show every snapshot after the loop and wait for one more key.
    pub hold_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Quit,
    FrameLimit,
    SourceClosed,
    ReadFailure,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub reason: ExitReason,
    pub frames: u64,
    /// Match counts from the last processed frame.
    pub last_reports: Vec<MatchReport>,
    pub snapshots: Vec<Snapshot>,
}

fn ui<T>(r: vision_capture::Result<T>) -> Result<T> {
    r.map_err(|e| Error::Display(e.to_string()))
}

/// Open a camera, treating both an open error and a closed device as
/// `DeviceUnavailable`.
pub fn open_source<C: CameraSource>(spec: &str) -> Result<C> {
    let camera = C::open(spec).map_err(|e| Error::DeviceUnavailable(format!("{spec}: {e}")))?;
    if !camera.is_open() {
        return Err(Error::DeviceUnavailable(format!("{spec}: not open")));
    }
    Ok(camera)
}

fn show_preview<D: Display>(
    display: &mut D,
    session: &CaptureSession,
    palette: &mut Palette,
) -> Result<()> {
    let Some(seg) = session.preview() else {
        return Ok(());
    };
    ui(display.show_image(THRESHOLD_WINDOW, &mask_frame(&seg.mask)))?;
    ui(display.show_image(CROPPED_WINDOW, &seg.crop))?;
    ui(display.show_image(CONTOURS_WINDOW, &contour_overlay(seg, palette)))
}

fn report_preview<T>(r: Result<T>) -> Result<()> {
    match r {
        Ok(_) => Ok(()),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "preview");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

struct Loop<'a, D> {
    display: &'a mut D,
    session: CaptureSession,
    palette: Palette,
}

impl<D: Display> Loop<'_, D> {
    fn handle_signal(&mut self, signal: Signal, frame: &Frame) -> Result<()> {
        match signal {
            Signal::StartCapture => {
                ui(self.display.show_image(CAPTURE_WINDOW, frame))?;
                let r = self.session.start_capture(frame).map(|_| ());
                let cfg = self.session.config();
                let (initial, max) = (cfg.default_threshold, cfg.max_threshold);
                ui(self
                    .display
                    .create_threshold_control(CAPTURE_WINDOW, initial, max))?;
                report_preview(r)?;
                show_preview(self.display, &self.session, &mut self.palette)
            }
            Signal::Commit if self.session.state() == SessionState::Previewing => {
                match self.session.commit() {
                    Ok(_) => {
                        for w in PREVIEW_WINDOWS {
                            ui(self.display.destroy_window(w))?;
                        }
                        Ok(())
                    }
                    Err(e) => report_preview::<()>(Err(e)),
                }
            }
            Signal::Commit | Signal::Quit => Ok(()),
        }
    }

    fn poll_threshold(&mut self) -> Result<()> {
        if self.session.state() != SessionState::Previewing {
            return Ok(());
        }
        let Some(value) = ui(self.display.threshold_control(CAPTURE_WINDOW))? else {
            return Ok(());
        };
        if value == self.session.threshold() {
            return Ok(());
        }
        debug!(value, "threshold control moved");
        let r = self.session.on_threshold_changed(value).map(|_| ());
        report_preview(r)?;
        show_preview(self.display, &self.session, &mut self.palette)
    }

    fn match_live(&mut self, frame: &Frame) -> Result<Vec<MatchReport>> {
        let found = match self.session.match_frame(frame) {
            Ok(found) => found,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "matching skipped");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let show = self.session.config().show_matches;
        let mut reports = Vec::with_capacity(found.matches.len());
        for m in &found.matches {
            let report = m.report();
            info!(
                "{} - Good Matches: {}",
                snapshot_window(report.snapshot_index),
                report.good_match_count
            );
            if show {
                let snap = &self.session.snapshots()[m.snapshot_index];
                if let Some(view) = draw_matches(
                    frame,
                    &found.live.keypoints,
                    snap.image(),
                    &snap.features().keypoints,
                    &m.result.good_matches,
                    &mut self.palette,
                ) {
                    ui(self
                        .display
                        .show_image(&snapshot_window(m.snapshot_index), &view))?;
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Drive `session` until a quit key, frame limit, or the source ends.
///
/// Keys are acted on in the iteration after they are polled, once the next
/// frame is in hand. A failed read ends the loop normally; committed
/// snapshots are returned in the outcome either way.
pub fn run<C, D, K>(
    camera: &mut C,
    display: &mut D,
    keys: &mut K,
    session: CaptureSession,
    opts: &RunOptions,
) -> Result<RunOutcome>
where
    C: CameraSource,
    D: Display,
    K: KeySource,
{
    if !camera.is_open() {
        return Err(Error::DeviceUnavailable("camera is not open".into()));
    }
    let poll: Duration = session.config().poll_interval();
    let show_camera = session.config().show_matches;
    let mut state = Loop {
        display,
        session,
        palette: Palette::default(),
    };
    if !show_camera {
        // Keys only reach a GUI backend while one of its windows exists
        let side = PLACEHOLDER_SIDE;
        let black = vec![0; (side * side * 3) as usize];
        let blank = Frame::new(side, side, PixelFormat::Bgr8, black);
        ui(state.display.show_image(CAMERA_WINDOW, &blank))?;
    }
    let mut pending: Option<Signal> = None;
    let mut frames = 0u64;
    let mut last_reports = Vec::new();

    let reason = loop {
        if pending == Some(Signal::Quit) {
            break ExitReason::Quit;
        }
        if !camera.is_open() {
            break ExitReason::SourceClosed;
        }
        if opts.max_frames.is_some_and(|max| frames >= max) {
            break ExitReason::FrameLimit;
        }
        let frame = match camera.read() {
            Ok(f) if f.has_data() => f,
            Ok(_) => {
                warn!(error = %Error::FrameReadFailure("empty frame".into()), "stopping");
                break ExitReason::ReadFailure;
            }
            Err(e) => {
                warn!(error = %Error::FrameReadFailure(e.to_string()), "stopping");
                break ExitReason::ReadFailure;
            }
        };
        frames += 1;

        if show_camera {
            ui(state.display.show_image(CAMERA_WINDOW, &frame))?;
        }
        if let Some(signal) = pending.take() {
            state.handle_signal(signal, &frame)?;
        }
        state.poll_threshold()?;
        last_reports = state.match_live(&frame)?;

        pending = ui(keys.poll_key(poll))?.and_then(Signal::from_key);
    };

    info!(?reason, frames, snapshots = state.session.snapshots().len(), "capture loop finished");
    ui(state.display.destroy_window(CAMERA_WINDOW))?;
    let snapshots = state.session.into_snapshots();
    for (i, snap) in snapshots.iter().enumerate() {
        ui(state.display.show_image(&snapshot_window(i), snap.image()))?;
    }
    if opts.hold_final {
        ui(keys.poll_key(Duration::ZERO))?;
    }

    Ok(RunOutcome {
        reason,
        frames,
        last_reports,
        snapshots,
    })
}
