//! vision-capture: frame sources, display sinks and key input for the match demo
//!
//! The default build enables the `mock` backends so binaries and tests run on
//! any host. The `opencv` feature adds a `videoio` camera and a `highgui`
//! display that also serves as the key source.

mod types;
pub use types::{Frame, PixelFormat, Rect};

mod error;
pub use error::{Error, Result};

mod traits;
pub use traits::{CameraSource, Display, KeySource};

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockCamera, NullDisplay, ScriptedKeys};

#[cfg(feature = "opencv")]
mod opencv_backend;
#[cfg(feature = "opencv")]
pub use opencv_backend::{HighGuiDisplay, OpenCvCamera};
