use crate::matcher::{FeatureMatcher, IndexedFeatures, MatchResult};
use crate::segment::{PreparedFrame, Segmentation, Segmenter};
use crate::surf::Features;
use crate::{Error, MatchConfig, Result};
use serde::Serialize;
use tracing::{info, warn};
use vision_capture::{Frame, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Previewing,
}

/// A committed crop. Never modified after commit.
#[derive(Debug, Clone)]
pub struct Snapshot {
    image: Frame,
    bounds: Rect,
    threshold: u8,
    features: IndexedFeatures,
}

impl Snapshot {
    pub fn image(&self) -> &Frame {
        &self.image
    }

    /// Where the crop was cut from in its source frame.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn features(&self) -> &Features {
        self.features.features()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub snapshot_index: usize,
    pub good_match_count: usize,
}

/// Per-snapshot outcome for one live frame.
#[derive(Debug, Clone)]
pub struct SnapshotMatch {
    pub snapshot_index: usize,
    pub result: MatchResult,
}

impl SnapshotMatch {
    pub fn report(&self) -> MatchReport {
        MatchReport {
            snapshot_index: self.snapshot_index,
            good_match_count: self.result.good_match_count,
        }
    }
}

/// Matches of one live frame against every snapshot, sharing the frame's
/// features across snapshots.
#[derive(Debug, Clone, Default)]
pub struct FrameMatches {
    pub live: Features,
    pub matches: Vec<SnapshotMatch>,
}

struct Preview {
    prepared: PreparedFrame,
    current: Option<Segmentation>,
}

/// Capture → threshold preview → commit, plus per-frame matching against
/// the committed snapshots.
pub struct CaptureSession {
    config: MatchConfig,
    segmenter: Segmenter,
    matcher: FeatureMatcher,
    threshold: u8,
    preview: Option<Preview>,
    snapshots: Vec<Snapshot>,
}

impl CaptureSession {
    pub fn new(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            segmenter: Segmenter::new(&config),
            matcher: FeatureMatcher::new(&config),
            threshold: config.default_threshold,
            preview: None,
            snapshots: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        if self.preview.is_some() {
            SessionState::Previewing
        } else {
            SessionState::Idle
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Segmentation at the current threshold, if the last attempt found a region.
    pub fn preview(&self) -> Option<&Segmentation> {
        self.preview.as_ref().and_then(|p| p.current.as_ref())
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<Snapshot> {
        self.snapshots
    }

    /// Begin (or restart) a capture from `frame`. An in-progress preview is
    /// discarded without committing and the threshold returns to its default.
    pub fn start_capture(&mut self, frame: &Frame) -> Result<&Segmentation> {
        let prepared = self.segmenter.prepare(frame)?;
        if self.preview.is_some() {
            info!("capture restarted, previous preview discarded");
        }
        self.threshold = self.config.default_threshold;
        self.preview = Some(Preview {
            prepared,
            current: None,
        });
        info!(threshold = self.threshold, "capture started");
        self.resegment()
    }

    /// Re-run segmentation on the cached capture at `value`.
    pub fn on_threshold_changed(&mut self, value: u8) -> Result<&Segmentation> {
        if self.preview.is_none() {
            return Err(Error::NotPreviewing);
        }
        self.threshold = value.min(self.config.max_threshold);
        self.resegment()
    }

    fn resegment(&mut self) -> Result<&Segmentation> {
        let preview = self.preview.as_mut().ok_or(Error::NotPreviewing)?;
        match self
            .segmenter
            .segment_prepared(&preview.prepared, self.threshold)
        {
            Ok(seg) => Ok(&*preview.current.insert(seg)),
            Err(e) => {
                warn!(threshold = self.threshold, error = %e, "preview has no region");
                preview.current = None;
                Err(e)
            }
        }
    }

    /// Store the current crop as a snapshot and return to idle. Returns the
    /// new snapshot's index.
    pub fn commit(&mut self) -> Result<usize> {
        let preview = self.preview.as_ref().ok_or(Error::NotPreviewing)?;
        let current = preview.current.as_ref().ok_or(Error::NoRegionFound {
            threshold: self.threshold,
        })?;
        // The preview survives a failed extraction
        let features = self.matcher.extract(&current.crop)?;
        let Some(Preview {
            current: Some(seg), ..
        }) = self.preview.take()
        else {
            return Err(Error::NotPreviewing);
        };

        let snapshot = Snapshot {
            bounds: seg.bounds(),
            threshold: seg.threshold,
            features: self.matcher.index(features),
            image: seg.crop,
        };
        self.snapshots.push(snapshot);
        self.threshold = self.config.default_threshold;
        let index = self.snapshots.len() - 1;
        info!(
            snapshot = index + 1,
            keypoints = self.snapshots[index].features().len(),
            "snapshot committed"
        );
        Ok(index)
    }

    /// Match `frame` against every snapshot, in commit order.
    pub fn match_frame(&self, frame: &Frame) -> Result<FrameMatches> {
        if self.snapshots.is_empty() {
            return Ok(FrameMatches::default());
        }
        let live = self.matcher.extract(frame)?;
        let matches = self
            .snapshots
            .iter()
            .enumerate()
            .map(|(snapshot_index, s)| SnapshotMatch {
                snapshot_index,
                result: self.matcher.match_indexed(&live, &s.features),
            })
            .collect();
        Ok(FrameMatches { live, matches })
    }
}
