use crate::{Frame, Result};
use std::time::Duration;

pub trait CameraSource {
    /// Open a camera source by device index or path string.
    fn open(spec: &str) -> Result<Self>
    where
        Self: Sized;

    /// Read a single frame.
    fn read(&mut self) -> Result<Frame>;

    /// Whether the underlying device is still attached.
    fn is_open(&self) -> bool;
}

/// Window sink for frames and debug overlays. Purely presentational.
pub trait Display {
    fn show_image(&mut self, window: &str, image: &Frame) -> Result<()>;

    fn destroy_window(&mut self, window: &str) -> Result<()>;

    /// Attach a threshold slider to `window`.
    fn create_threshold_control(&mut self, window: &str, initial: u8, max: u8) -> Result<()>;

    /// Current slider position, or `None` if no control exists on `window`.
    fn threshold_control(&mut self, window: &str) -> Result<Option<u8>> {
        let _ = window;
        Ok(None)
    }
}

/// Source of discrete key codes.
pub trait KeySource {
    /// Wait up to `wait` for a key press. `Duration::ZERO` blocks until a key arrives
    /// on interactive backends.
    fn poll_key(&mut self, wait: Duration) -> Result<Option<i32>>;
}
