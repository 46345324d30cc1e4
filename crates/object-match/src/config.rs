use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for segmentation, detection and match filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum determinant-of-Hessian response for a keypoint (SURF `minHessian`).
    pub detector_sensitivity: f64,
    /// A match is good when `distance <= max(match_ratio_multiplier * min_dist, match_floor)`.
    pub match_ratio_multiplier: f64,
    pub match_floor: f64,
    pub default_threshold: u8,
    pub max_threshold: u8,
    /// Side of the box blur applied before thresholding. Must be odd.
    pub blur_kernel: u32,
    /// Douglas-Peucker tolerance in pixels.
    pub poly_epsilon: f64,
    pub octaves: usize,
    pub kd_trees: usize,
    /// Leaf points examined per query before the kd-forest search stops.
    pub kd_checks: usize,
    pub show_matches: bool,
    pub poll_interval_ms: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            detector_sensitivity: 400.0,
            match_ratio_multiplier: 2.0,
            match_floor: 0.02,
            default_threshold: 100,
            max_threshold: 255,
            blur_kernel: 3,
            poly_epsilon: 3.0,
            octaves: 4,
            kd_trees: 4,
            kd_checks: 32,
            show_matches: true,
            poll_interval_ms: 1,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::InvalidConfig(msg));
        if !self.detector_sensitivity.is_finite() || self.detector_sensitivity < 0.0 {
            return bad(format!(
                "detector_sensitivity must be >= 0, got {}",
                self.detector_sensitivity
            ));
        }
        if !self.match_ratio_multiplier.is_finite() || self.match_ratio_multiplier <= 0.0 {
            return bad(format!(
                "match_ratio_multiplier must be > 0, got {}",
                self.match_ratio_multiplier
            ));
        }
        if !self.match_floor.is_finite() || self.match_floor < 0.0 {
            return bad(format!("match_floor must be >= 0, got {}", self.match_floor));
        }
        if self.default_threshold > self.max_threshold {
            return bad(format!(
                "default_threshold {} exceeds max_threshold {}",
                self.default_threshold, self.max_threshold
            ));
        }
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 {
            return bad(format!("blur_kernel must be odd, got {}", self.blur_kernel));
        }
        if !self.poly_epsilon.is_finite() || self.poly_epsilon < 0.0 {
            return bad(format!("poly_epsilon must be >= 0, got {}", self.poly_epsilon));
        }
        if !(1..=6).contains(&self.octaves) {
            return bad(format!("octaves must be in 1..=6, got {}", self.octaves));
        }
        if self.kd_trees == 0 || self.kd_checks == 0 {
            return bad("kd_trees and kd_checks must be positive".to_string());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
