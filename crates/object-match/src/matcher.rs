use crate::flann::KdForest;
use crate::surf::{Features, Surf};
use crate::{Error, MatchConfig, Result};
use serde::Serialize;
use tracing::debug;
use vision_capture::Frame;

/// One query descriptor paired with its nearest train descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub good_matches: Vec<DMatch>,
    pub good_match_count: usize,
    pub min_dist: f64,
    pub max_dist: f64,
    pub query_keypoints: usize,
    pub train_keypoints: usize,
}

/// Train-side features with their search index built once.
#[derive(Debug, Clone)]
pub struct IndexedFeatures {
    features: Features,
    forest: KdForest,
}

impl IndexedFeatures {
    pub fn features(&self) -> &Features {
        &self.features
    }
}

#[derive(Debug, Clone)]
pub struct FeatureMatcher {
    surf: Surf,
    ratio: f64,
    floor: f64,
    kd_trees: usize,
    kd_checks: usize,
}

impl Default for FeatureMatcher {
    fn default() -> Self {
        Self::new(&MatchConfig::default())
    }
}

impl FeatureMatcher {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            surf: Surf::new(config.detector_sensitivity, config.octaves),
            ratio: config.match_ratio_multiplier,
            floor: config.match_floor,
            kd_trees: config.kd_trees,
            kd_checks: config.kd_checks,
        }
    }

    pub fn extract(&self, frame: &Frame) -> Result<Features> {
        let gray = frame
            .to_gray_image()
            .ok_or(Error::InvalidImage("match input has no pixel data"))?;
        Ok(self.surf.detect_and_compute(&gray))
    }

    pub fn index(&self, features: Features) -> IndexedFeatures {
        let forest = KdForest::build(features.descriptors.clone(), self.kd_trees);
        IndexedFeatures { features, forest }
    }

    /// Nearest train descriptor for every query descriptor, then the
    /// distance filter.
    pub fn match_indexed(&self, query: &Features, train: &IndexedFeatures) -> MatchResult {
        let matches: Vec<DMatch> = query
            .descriptors
            .iter()
            .enumerate()
            .filter_map(|(query_idx, d)| {
                train.forest.nearest(d, self.kd_checks).map(|n| DMatch {
                    query_idx,
                    train_idx: n.index,
                    distance: n.distance,
                })
            })
            .collect();
        let (good_matches, min_dist, max_dist) = filter_good(&matches, self.ratio, self.floor);
        debug!(
            query = query.len(),
            train = train.features.len(),
            raw = matches.len(),
            good = good_matches.len(),
            min_dist,
            "matched"
        );
        MatchResult {
            good_match_count: good_matches.len(),
            good_matches,
            min_dist,
            max_dist,
            query_keypoints: query.len(),
            train_keypoints: train.features.len(),
        }
    }

    pub fn match_features(&self, query: &Features, train: &Features) -> MatchResult {
        self.match_indexed(query, &self.index(train.clone()))
    }

    /// Full pipeline on two rasters: `a` is the query, `b` the train side.
    pub fn match_images(&self, a: &Frame, b: &Frame) -> Result<MatchResult> {
        let fa = self.extract(a)?;
        let fb = self.extract(b)?;
        Ok(self.match_features(&fa, &fb))
    }
}

/// Keep matches with `distance <= max(ratio * min_dist, floor)`. Returns the
/// survivors and the min/max distance (100 and 0 when there are no matches).
pub fn filter_good(matches: &[DMatch], ratio: f64, floor: f64) -> (Vec<DMatch>, f64, f64) {
    let (mut min_dist, mut max_dist) = (100.0f64, 0.0f64);
    for m in matches {
        let d = m.distance as f64;
        min_dist = min_dist.min(d);
        max_dist = max_dist.max(d);
    }
    let limit = (ratio * min_dist).max(floor);
    let good = matches
        .iter()
        .filter(|m| m.distance as f64 <= limit)
        .copied()
        .collect();
    (good, min_dist, max_dist)
}
