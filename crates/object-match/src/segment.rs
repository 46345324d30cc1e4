//! Threshold → external contours → largest-area bounding box crop.

use crate::contours::{
    approx_closed_polygon, bounding_rect, contour_area, find_external_contours,
    min_enclosing_circle, Circle, Contour, Point,
};
use crate::{Error, MatchConfig, Result};
use image::GrayImage;
use imageproc::filter::box_filter;
use tracing::debug;
use vision_capture::{Frame, Rect};

/// A captured frame together with its blurred gray version, so the threshold
/// can be re-applied without touching the color data again.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    frame: Frame,
    gray: GrayImage,
}

#[derive(Debug, Clone)]
pub struct RegionCandidate {
    pub contour: Contour,
    pub polygon: Vec<Point>,
    pub bounds: Rect,
    pub circle: Option<Circle>,
    pub area: f64,
}

/// Result of one threshold pass over a prepared frame.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub threshold: u8,
    pub mask: GrayImage,
    pub candidates: Vec<RegionCandidate>,
    pub selected: usize,
    pub crop: Frame,
}

impl Segmentation {
    pub fn selected_region(&self) -> Option<&RegionCandidate> {
        self.candidates.get(self.selected)
    }

    pub fn bounds(&self) -> Rect {
        self.selected_region().map(|r| r.bounds).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    blur_kernel: u32,
    poly_epsilon: f64,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(&MatchConfig::default())
    }
}

impl Segmenter {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            blur_kernel: config.blur_kernel,
            poly_epsilon: config.poly_epsilon,
        }
    }

    /// Clone the frame and derive the blurred gray buffer once.
    pub fn prepare(&self, frame: &Frame) -> Result<PreparedFrame> {
        let gray = frame
            .to_gray_image()
            .ok_or(Error::InvalidImage("capture frame has no pixel data"))?;
        let radius = self.blur_kernel / 2;
        let gray = if radius == 0 {
            gray
        } else {
            box_filter(&gray, radius, radius)
        };
        Ok(PreparedFrame {
            frame: frame.clone(),
            gray,
        })
    }

    pub fn segment(&self, frame: &Frame, threshold: u8) -> Result<Segmentation> {
        self.segment_prepared(&self.prepare(frame)?, threshold)
    }

    pub fn segment_prepared(&self, prepared: &PreparedFrame, threshold: u8) -> Result<Segmentation> {
        let mask = threshold_binary(&prepared.gray, threshold);
        let fg = foreground_count(&mask);
        let total = mask.width() as usize * mask.height() as usize;
        // A uniform mask has no figure/ground split to crop from
        if fg == 0 || fg == total {
            debug!(threshold, fg, "uniform mask");
            return Err(Error::NoRegionFound { threshold });
        }

        let candidates: Vec<RegionCandidate> = find_external_contours(&mask)
            .into_iter()
            .filter_map(|contour| {
                let polygon = approx_closed_polygon(&contour.points, self.poly_epsilon);
                let bounds = bounding_rect(&polygon)?;
                Some(RegionCandidate {
                    area: contour_area(&contour.points),
                    circle: min_enclosing_circle(&polygon),
                    contour,
                    polygon,
                    bounds,
                })
            })
            .collect();

        let selected = select_largest(&candidates).ok_or(Error::NoRegionFound { threshold })?;
        let bounds = candidates[selected].bounds;
        let crop = prepared
            .frame
            .crop(&bounds)
            .ok_or(Error::InvalidImage("selected region outside capture frame"))?;
        debug!(
            threshold,
            contours = candidates.len(),
            selected,
            x = bounds.x,
            y = bounds.y,
            w = bounds.width,
            h = bounds.height,
            "segmented"
        );
        Ok(Segmentation {
            threshold,
            mask,
            candidates,
            selected,
            crop,
        })
    }
}

/// Index of the largest raw contour area; the earliest wins ties.
pub fn select_largest(candidates: &[RegionCandidate]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in candidates.iter().enumerate() {
        match best {
            Some((_, area)) if c.area <= area => {}
            _ => best = Some((i, c.area)),
        }
    }
    best.map(|(i, _)| i)
}

/// Pixels at or above `threshold` become 255, the rest 0.
pub fn threshold_binary(src: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = GrayImage::new(src.width(), src.height());
    let buf: &mut [u8] = &mut out;
    for (o, &v) in buf.iter_mut().zip(src.as_raw()) {
        *o = if v >= threshold { 255 } else { 0 };
    }
    out
}

pub fn foreground_count(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v > 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_capture::PixelFormat;

    fn scene(w: u32, h: u32, bg: u8, rects: &[(Rect, u8)]) -> Frame {
        let mut data = vec![bg; (w * h * 3) as usize];
        for (r, v) in rects {
            for y in r.y..r.bottom() {
                for x in r.x..r.right() {
                    let i = ((y * w + x) * 3) as usize;
                    data[i..i + 3].copy_from_slice(&[*v, v.saturating_sub(20), *v]);
                }
            }
        }
        Frame::new(w, h, PixelFormat::Rgb8, data)
    }

    #[test]
    fn threshold_is_monotonic() {
        let data: Vec<u8> = (0..64u32 * 48).map(|i| ((i * 37 + i / 64 * 11) % 256) as u8).collect();
        let gray = GrayImage::from_raw(64, 48, data).unwrap();
        let mut prev = usize::MAX;
        for t in (0..=255u32).step_by(5) {
            let n = foreground_count(&threshold_binary(&gray, t as u8));
            assert!(n <= prev, "threshold {t} grew foreground");
            prev = n;
        }
    }

    #[test]
    fn prepared_gray_is_box_blurred() {
        let mut data = vec![0u8; 5 * 5 * 3];
        data[(2 * 5 + 2) * 3..(2 * 5 + 3) * 3].copy_from_slice(&[90, 90, 90]);
        let frame = Frame::new(5, 5, PixelFormat::Rgb8, data);
        let prepared = Segmenter::default().prepare(&frame).unwrap();
        assert_eq!(prepared.gray.get_pixel(2, 2)[0], 10);
        assert_eq!(prepared.gray.get_pixel(1, 1)[0], 10);
        assert_eq!(prepared.gray.get_pixel(0, 0)[0], 0);
        assert_eq!(prepared.frame, frame);
    }

    #[test]
    fn solid_rectangle_bounds_are_recovered() {
        let target = Rect::new(40, 30, 50, 35);
        let frame = scene(160, 120, 10, &[(target, 220)]);
        let seg = Segmenter::default().segment(&frame, 100).unwrap();
        let b = seg.bounds();
        let tol = 3i64;
        assert!((b.x as i64 - target.x as i64).abs() <= tol);
        assert!((b.y as i64 - target.y as i64).abs() <= tol);
        assert!((b.right() as i64 - target.right() as i64).abs() <= tol);
        assert!((b.bottom() as i64 - target.bottom() as i64).abs() <= tol);
        assert_eq!(seg.crop.width, b.width);
        assert_eq!(seg.crop.height, b.height);
        assert_eq!(seg.crop.pixel_format, PixelFormat::Rgb8);
    }

    #[test]
    fn largest_region_wins() {
        let small = Rect::new(5, 5, 12, 12);
        let big = Rect::new(60, 40, 40, 30);
        let frame = scene(128, 96, 0, &[(small, 250), (big, 250)]);
        let seg = Segmenter::default().segment(&frame, 100).unwrap();
        assert_eq!(seg.candidates.len(), 2);
        assert_eq!(seg.selected, 1);
        assert!(seg.bounds().x >= 58 && seg.bounds().x <= 62);
    }

    #[test]
    fn crop_comes_from_the_unblurred_frame() {
        let r = Rect::new(10, 10, 20, 20);
        let frame = scene(64, 64, 0, &[(r, 200)]);
        let seg = Segmenter::default().segment(&frame, 100).unwrap();
        let expected = frame.crop(&seg.bounds()).unwrap();
        assert_eq!(seg.crop, expected);
    }

    #[test]
    fn black_frame_has_no_region() {
        let frame = scene(32, 32, 0, &[]);
        let err = Segmenter::default().segment(&frame, 100).unwrap_err();
        assert!(matches!(err, Error::NoRegionFound { threshold: 100 }));
    }

    #[test]
    fn uniform_bright_frame_has_no_region() {
        let frame = scene(32, 32, 200, &[]);
        assert!(matches!(
            Segmenter::default().segment(&frame, 100),
            Err(Error::NoRegionFound { .. })
        ));
    }

    #[test]
    fn empty_frame_is_invalid() {
        let frame = Frame::new(0, 0, PixelFormat::Rgb8, Vec::new());
        assert!(matches!(
            Segmenter::default().segment(&frame, 100),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn tie_goes_to_first_region() {
        let a = RegionCandidate {
            contour: Contour { points: vec![] },
            polygon: vec![],
            bounds: Rect::new(0, 0, 1, 1),
            circle: None,
            area: 4.0,
        };
        let mut b = a.clone();
        b.bounds = Rect::new(5, 5, 1, 1);
        assert_eq!(select_largest(&[a.clone(), b]), Some(0));
        assert_eq!(select_largest(&[]), None);
        let zero = RegionCandidate { area: 0.0, ..a };
        assert_eq!(select_largest(&[zero.clone(), zero]), Some(0));
    }
}
