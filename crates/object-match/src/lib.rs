//! object-match: snapshot an object out of a camera frame, then count feature
//! matches between every later frame and each stored snapshot.
//!
//! Segmentation is a blurred binary threshold followed by external contour
//! extraction; the largest region's bounding box becomes the snapshot.
//! Matching uses Hessian keypoints with 64-float descriptors, a randomized
//! kd-forest for nearest neighbours, and a distance filter relative to the
//! best match.

mod error;
pub use error::{Error, Result};

mod config;
pub use config::MatchConfig;

pub mod contours;
pub mod flann;
pub mod matcher;
pub mod render;
pub mod runner;
pub mod segment;
pub mod session;
pub mod surf;

pub use matcher::{DMatch, FeatureMatcher, MatchResult};
pub use runner::{open_source, run, ExitReason, RunOptions, RunOutcome, Signal};
pub use segment::{Segmentation, Segmenter};
pub use session::{CaptureSession, MatchReport, SessionState, Snapshot};
pub use surf::{Features, KeyPoint};
