//! Debug drawings: contour overlays and side-by-side match views.

use crate::contours::Point;
use crate::matcher::DMatch;
use crate::segment::Segmentation;
use crate::surf::KeyPoint;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as DrawRect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vision_capture::Frame;

pub const OVERLAY_SEED: u64 = 12345;

/// Colour source for overlays. One instance lives for the whole session so
/// successive drawings keep advancing the same sequence.
#[derive(Debug, Clone)]
pub struct Palette {
    rng: StdRng,
}

impl Default for Palette {
    fn default() -> Self {
        Self::seeded(OVERLAY_SEED)
    }
}

impl Palette {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_color(&mut self) -> Rgb<u8> {
        Rgb([
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
            self.rng.gen_range(0..255),
        ])
    }
}

pub fn mask_frame(mask: &GrayImage) -> Frame {
    Frame::from_gray_image(mask.clone())
}

fn draw_polygon(canvas: &mut RgbImage, poly: &[Point], color: Rgb<u8>) {
    if let [single] = poly {
        if single.x >= 0
            && single.y >= 0
            && (single.x as u32) < canvas.width()
            && (single.y as u32) < canvas.height()
        {
            canvas.put_pixel(single.x as u32, single.y as u32, color);
        }
        return;
    }
    for (i, &a) in poly.iter().enumerate() {
        let b = poly[(i + 1) % poly.len()];
        draw_line_segment_mut(
            canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            color,
        );
    }
}

/// Black canvas with every candidate's polygon, bounding box and enclosing
/// circle in its own colour.
pub fn contour_overlay(seg: &Segmentation, palette: &mut Palette) -> Frame {
    let mut canvas = RgbImage::new(seg.mask.width(), seg.mask.height());
    for region in &seg.candidates {
        let color = palette.next_color();
        draw_polygon(&mut canvas, &region.polygon, color);
        let b = region.bounds;
        for inset in 0..2u32 {
            if b.width > 2 * inset && b.height > 2 * inset {
                let r = DrawRect::at((b.x + inset) as i32, (b.y + inset) as i32)
                    .of_size(b.width - 2 * inset, b.height - 2 * inset);
                draw_hollow_rect_mut(&mut canvas, r, color);
            }
        }
        if let Some(c) = region.circle {
            let center = (c.center.0.round() as i32, c.center.1.round() as i32);
            let radius = c.radius as i32;
            draw_hollow_circle_mut(&mut canvas, center, radius, color);
            if radius > 0 {
                draw_hollow_circle_mut(&mut canvas, center, radius - 1, color);
            }
        }
    }
    Frame::from_rgb_image(canvas)
}

/// `query` on the left, `train` on the right, one line per good match.
/// Keypoints without a good match are not drawn.
pub fn draw_matches(
    query: &Frame,
    query_kp: &[KeyPoint],
    train: &Frame,
    train_kp: &[KeyPoint],
    good: &[DMatch],
    palette: &mut Palette,
) -> Option<Frame> {
    let left = query.to_rgb_image()?;
    let right = train.to_rgb_image()?;
    let mut canvas = RgbImage::new(
        left.width() + right.width(),
        left.height().max(right.height()),
    );
    image::imageops::replace(&mut canvas, &left, 0, 0);
    image::imageops::replace(&mut canvas, &right, left.width() as i64, 0);

    let offset = left.width() as f32;
    for m in good {
        let (Some(a), Some(b)) = (query_kp.get(m.query_idx), train_kp.get(m.train_idx)) else {
            continue;
        };
        let color = palette.next_color();
        let pa = (a.x, a.y);
        let pb = (b.x + offset, b.y);
        draw_hollow_circle_mut(
            &mut canvas,
            (pa.0 as i32, pa.1 as i32),
            (a.size() / 2.0).max(1.0) as i32,
            color,
        );
        draw_hollow_circle_mut(
            &mut canvas,
            (pb.0 as i32, pb.1 as i32),
            (b.size() / 2.0).max(1.0) as i32,
            color,
        );
        draw_line_segment_mut(&mut canvas, pa, pb, color);
    }
    Some(Frame::from_rgb_image(canvas))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segmenter;
    use vision_capture::{PixelFormat, Rect};

    fn square_scene() -> Frame {
        let (w, h) = (48u32, 40u32);
        let mut data = vec![0u8; (w * h * 3) as usize];
        for y in 10..30 {
            for x in 12..36 {
                let i = ((y * w + x) * 3) as usize;
                data[i..i + 3].copy_from_slice(&[220, 220, 220]);
            }
        }
        Frame::new(w, h, PixelFormat::Rgb8, data)
    }

    #[test]
    fn palette_is_deterministic() {
        let mut a = Palette::default();
        let mut b = Palette::seeded(OVERLAY_SEED);
        for _ in 0..5 {
            assert_eq!(a.next_color(), b.next_color());
        }
    }

    #[test]
    fn overlay_draws_on_the_region_border() {
        let seg = Segmenter::default().segment(&square_scene(), 100).unwrap();
        let overlay = contour_overlay(&seg, &mut Palette::default());
        assert_eq!((overlay.width, overlay.height), (48, 40));
        assert_eq!(overlay.pixel_format, PixelFormat::Rgb8);
        let rgb = overlay.to_rgb_image().unwrap();
        let Rect { x, y, .. } = seg.bounds();
        assert_ne!(rgb.get_pixel(x + 5, y).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn match_view_is_side_by_side() {
        let a = square_scene();
        let b = Frame::new(10, 60, PixelFormat::Gray8, vec![7; 600]);
        let kp = KeyPoint {
            x: 20.0,
            y: 20.0,
            scale: 1.2,
            orientation: 0.0,
            response: 1000.0,
            octave: 0,
        };
        let good = [DMatch {
            query_idx: 0,
            train_idx: 0,
            distance: 0.0,
        }];
        let view = draw_matches(&a, &[kp], &b, &[KeyPoint { x: 5.0, ..kp }], &good, &mut Palette::default())
            .unwrap();
        assert_eq!((view.width, view.height), (58, 60));
        let rgb = view.to_rgb_image().unwrap();
        assert_eq!(rgb.get_pixel(50, 50).0, [7, 7, 7]);
    }

    #[test]
    fn match_view_needs_pixel_data() {
        let empty = Frame::new(0, 0, PixelFormat::Rgb8, Vec::new());
        assert!(draw_matches(&empty, &[], &square_scene(), &[], &[], &mut Palette::default()).is_none());
    }
}
