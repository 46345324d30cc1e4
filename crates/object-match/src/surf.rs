//! Fast-Hessian keypoints and 64-dimensional oriented Haar descriptors.
//!
//! The detector samples box-filter approximations of the second derivatives
//! on a pyramid of filter sizes (`9, 15, 21, 27` for the first octave,
//! doubling the size increment and the sampling step per octave) and keeps
//! local maxima of the Hessian determinant above a sensitivity threshold.
//! Each keypoint gets a dominant orientation from Haar responses in a disc
//! around it, then a descriptor of summed responses over a rotated 4×4 grid.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, sum_image_pixels};
use std::f32::consts::PI;

pub const DESCRIPTOR_LEN: usize = 64;
pub type Descriptor = [f32; DESCRIPTOR_LEN];

const LAYERS: usize = 4;

// (x1, y1, x2, y2, weight) on the 9×9 base filter
const DXX: [[i32; 5]; 3] = [[0, 2, 3, 7, 1], [3, 2, 6, 7, -2], [6, 2, 9, 7, 1]];
const DYY: [[i32; 5]; 3] = [[2, 0, 7, 3, 1], [2, 3, 7, 6, -2], [2, 6, 7, 9, 1]];
const DXY: [[i32; 5]; 4] = [
    [1, 1, 4, 4, 1],
    [5, 1, 8, 4, -1],
    [1, 5, 4, 8, -1],
    [5, 5, 8, 8, 1],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    /// Blob scale; 1.2 for the 9×9 filter.
    pub scale: f32,
    /// Radians, counter-clockwise from +x in image coordinates.
    pub orientation: f32,
    pub response: f32,
    pub octave: usize,
}

impl KeyPoint {
    /// Side of the box filter that produced the keypoint, for drawing.
    pub fn size(&self) -> f32 {
        self.scale / 1.2 * 9.0
    }
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Summed-area table whose box sums are clipped to the image.
struct Integral {
    width: usize,
    height: usize,
    sums: ImageBuffer<Luma<u64>, Vec<u64>>,
}

impl Integral {
    fn new(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            sums: integral_image::<_, u64>(gray),
        }
    }

    /// Sum over `[x, x + w) × [y, y + h)`; the part outside the image counts as zero.
    fn box_sum(&self, x: i64, y: i64, w: i64, h: i64) -> f32 {
        let (x0, y0) = (x.max(0), y.max(0));
        let x1 = (x + w).min(self.width as i64);
        let y1 = (y + h).min(self.height as i64);
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        let [sum] = sum_image_pixels(
            &self.sums,
            x0 as u32,
            y0 as u32,
            (x1 - 1) as u32,
            (y1 - 1) as u32,
        );
        sum as f32
    }
}

#[derive(Debug, Clone, Copy)]
struct HaarBox {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
    weight: f32,
}

fn resize_pattern<const N: usize>(src: &[[i32; 5]; N], size: usize) -> [HaarBox; N] {
    let ratio = size as f32 / 9.0;
    src.map(|[x1, y1, x2, y2, w]| {
        let (dx1, dy1) = ((ratio * x1 as f32).round() as i64, (ratio * y1 as f32).round() as i64);
        let (dx2, dy2) = ((ratio * x2 as f32).round() as i64, (ratio * y2 as f32).round() as i64);
        let (bw, bh) = (dx2 - dx1, dy2 - dy1);
        HaarBox {
            x: dx1,
            y: dy1,
            w: bw,
            h: bh,
            weight: w as f32 / (bw * bh).max(1) as f32,
        }
    })
}

fn apply(ii: &Integral, boxes: &[HaarBox], tx: i64, ty: i64) -> f32 {
    boxes
        .iter()
        .map(|b| b.weight * ii.box_sum(tx + b.x, ty + b.y, b.w, b.h))
        .sum()
}

/// Side of the box filter for `layer` of `octave`.
pub fn filter_size(octave: usize, layer: usize) -> usize {
    3 * ((1 << (octave + 1)) * (layer + 1) + 1)
}

struct ResponseLayer {
    size: usize,
    cols: usize,
    rows: usize,
    step: usize,
    det: Vec<f32>,
}

impl ResponseLayer {
    fn build(ii: &Integral, size: usize, step: usize) -> Self {
        let (w, h) = (ii.width, ii.height);
        let (cols, rows) = (w.div_ceil(step), h.div_ceil(step));
        let dxx = resize_pattern(&DXX, size);
        let dyy = resize_pattern(&DYY, size);
        let dxy = resize_pattern(&DXY, size);
        let half = size / 2;
        let mut det = vec![0.0f32; cols * rows];
        for gy in 0..rows {
            let y = gy * step;
            if y < half || y + half >= h {
                continue;
            }
            for gx in 0..cols {
                let x = gx * step;
                if x < half || x + half >= w {
                    continue;
                }
                let (tx, ty) = ((x - half) as i64, (y - half) as i64);
                let xx = apply(ii, &dxx, tx, ty);
                let yy = apply(ii, &dyy, tx, ty);
                let xy = apply(ii, &dxy, tx, ty);
                det[gy * cols + gx] = xx * yy - 0.81 * xy * xy;
            }
        }
        Self {
            size,
            cols,
            rows,
            step,
            det,
        }
    }

    fn at(&self, gx: usize, gy: usize) -> f32 {
        self.det[gy * self.cols + gx]
    }
}

/// Haar response in x with side `s` centred on `(x, y)`.
fn haar_x(ii: &Integral, x: i64, y: i64, s: i64) -> f32 {
    let h = s / 2;
    ii.box_sum(x, y - h, h, s) - ii.box_sum(x - h, y - h, h, s)
}

fn haar_y(ii: &Integral, x: i64, y: i64, s: i64) -> f32 {
    let h = s / 2;
    ii.box_sum(x - h, y, s, h) - ii.box_sum(x - h, y - h, s, h)
}

fn wavelet_side(extent: f32) -> i64 {
    ((extent / 2.0).round() as i64 * 2).max(2)
}

fn gaussian(x: f32, y: f32, sigma: f32) -> f32 {
    (-(x * x + y * y) / (2.0 * sigma * sigma)).exp()
}

#[derive(Debug, Clone)]
pub struct Surf {
    threshold: f32,
    octaves: usize,
}

impl Surf {
    pub fn new(threshold: f64, octaves: usize) -> Self {
        Self {
            threshold: threshold as f32,
            octaves: octaves.max(1),
        }
    }

    pub fn detect_and_compute(&self, gray: &GrayImage) -> Features {
        let ii = Integral::new(gray);
        let keypoints = self.detect(&ii);
        self.describe(&ii, keypoints)
    }

    /// Scale-space maxima of the Hessian determinant, unoriented.
    fn detect(&self, ii: &Integral) -> Vec<KeyPoint> {
        let (w, h) = (ii.width, ii.height);
        let mut out = Vec::new();
        for octave in 0..self.octaves {
            let step = 1usize << octave;
            if filter_size(octave, LAYERS - 1) >= w.min(h) {
                break;
            }
            let layers: Vec<ResponseLayer> = (0..LAYERS)
                .map(|l| ResponseLayer::build(ii, filter_size(octave, l), step))
                .collect();
            for mid in 1..LAYERS - 1 {
                self.maxima_in_layer(&layers, mid, octave, w, h, &mut out);
            }
        }
        out
    }

    fn maxima_in_layer(
        &self,
        layers: &[ResponseLayer],
        mid: usize,
        octave: usize,
        w: usize,
        h: usize,
        out: &mut Vec<KeyPoint>,
    ) {
        let cur = &layers[mid];
        let step = cur.step;
        // Every neighbour must be a full response of the largest filter
        let half = layers[mid + 1].size / 2;
        for gy in 1..cur.rows.saturating_sub(1) {
            let y = gy * step;
            if y < half + step || y + step + half >= h {
                continue;
            }
            for gx in 1..cur.cols.saturating_sub(1) {
                let x = gx * step;
                if x < half + step || x + step + half >= w {
                    continue;
                }
                let v = cur.at(gx, gy);
                if v <= self.threshold {
                    continue;
                }
                let is_max = layers[mid - 1..=mid + 1].iter().enumerate().all(|(li, layer)| {
                    (gy - 1..=gy + 1).all(|ny| {
                        (gx - 1..=gx + 1).all(|nx| {
                            (li == 1 && nx == gx && ny == gy) || layer.at(nx, ny) < v
                        })
                    })
                });
                if is_max {
                    out.push(KeyPoint {
                        x: x as f32,
                        y: y as f32,
                        scale: 1.2 * cur.size as f32 / 9.0,
                        orientation: 0.0,
                        response: v,
                        octave,
                    });
                }
            }
        }
    }

    /// Assign orientations and compute descriptors.
    fn describe(&self, ii: &Integral, mut keypoints: Vec<KeyPoint>) -> Features {
        let descriptors = keypoints
            .iter_mut()
            .map(|kp| {
                kp.orientation = orientation(ii, kp);
                descriptor(ii, kp)
            })
            .collect();
        Features {
            keypoints,
            descriptors,
        }
    }
}

/// Dominant direction of Haar gradients within radius `6s`, found with a
/// sliding π/3 window.
fn orientation(ii: &Integral, kp: &KeyPoint) -> f32 {
    let s = kp.scale;
    let side = wavelet_side(4.0 * s);
    let mut samples: Vec<(f32, f32, f32)> = Vec::with_capacity(113);
    for j in -6i32..=6 {
        for i in -6i32..=6 {
            if i * i + j * j >= 36 {
                continue;
            }
            let g = gaussian(i as f32, j as f32, 2.5);
            let px = (kp.x + i as f32 * s).round() as i64;
            let py = (kp.y + j as f32 * s).round() as i64;
            let dx = g * haar_x(ii, px, py, side);
            let dy = g * haar_y(ii, px, py, side);
            if dx != 0.0 || dy != 0.0 {
                samples.push((dx, dy, dy.atan2(dx)));
            }
        }
    }

    let window = PI / 3.0;
    let (mut best, mut best_ori) = (0.0f32, 0.0f32);
    let mut start = 0.0f32;
    while start < 2.0 * PI {
        let (mut sx, mut sy) = (0.0f32, 0.0f32);
        for &(dx, dy, ang) in &samples {
            let rel = (ang - start).rem_euclid(2.0 * PI);
            if rel < window {
                sx += dx;
                sy += dy;
            }
        }
        let mag = sx * sx + sy * sy;
        if mag > best {
            best = mag;
            best_ori = sy.atan2(sx);
        }
        start += 0.15;
    }
    best_ori
}

/// 4×4 subregions of 5×5 samples over a `20s` window aligned with the
/// keypoint orientation; each subregion contributes Σdx, Σdy, Σ|dx|, Σ|dy|.
fn descriptor(ii: &Integral, kp: &KeyPoint) -> Descriptor {
    let s = kp.scale;
    let (co, si) = (kp.orientation.cos(), kp.orientation.sin());
    let side = wavelet_side(2.0 * s);
    let mut desc = [0.0f32; DESCRIPTOR_LEN];

    for sj in 0..4 {
        for si_ in 0..4 {
            let (mut sdx, mut sdy, mut adx, mut ady) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for l in 0..5 {
                for k in 0..5 {
                    let u = (si_ * 5 + k) as f32 - 9.5;
                    let v = (sj * 5 + l) as f32 - 9.5;
                    let px = (kp.x + (u * co - v * si) * s).round() as i64;
                    let py = (kp.y + (u * si + v * co) * s).round() as i64;
                    let g = gaussian(u, v, 3.3);
                    let rx = haar_x(ii, px, py, side);
                    let ry = haar_y(ii, px, py, side);
                    let dx = g * (rx * co + ry * si);
                    let dy = g * (-rx * si + ry * co);
                    sdx += dx;
                    sdy += dy;
                    adx += dx.abs();
                    ady += dy.abs();
                }
            }
            let base = (sj * 4 + si_) * 4;
            desc[base..base + 4].copy_from_slice(&[sdx, sdy, adx, ady]);
        }
    }

    let norm = desc.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        desc.iter_mut().for_each(|v| *v /= norm);
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn blobs(w: u32, h: u32, seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let spots: Vec<(f32, f32, f32, f32)> = (0..30)
            .map(|_| {
                (
                    rng.gen_range(0.0..w as f32),
                    rng.gen_range(0.0..h as f32),
                    rng.gen_range(2.0..6.0),
                    rng.gen_range(-90.0..160.0),
                )
            })
            .collect();
        GrayImage::from_fn(w, h, |x, y| {
            let v: f32 = spots
                .iter()
                .map(|&(cx, cy, s, a)| a * gaussian(x as f32 - cx, y as f32 - cy, s))
                .sum();
            Luma([(70.0 + v).clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn filter_sizes_follow_the_octave_pattern() {
        let first: Vec<usize> = (0..4).map(|l| filter_size(0, l)).collect();
        assert_eq!(first, vec![9, 15, 21, 27]);
        let second: Vec<usize> = (0..4).map(|l| filter_size(1, l)).collect();
        assert_eq!(second, vec![15, 27, 39, 51]);
    }

    #[test]
    fn base_pattern_weights_are_area_normalized() {
        let dxx = resize_pattern(&DXX, 9);
        assert_eq!((dxx[1].x, dxx[1].w, dxx[1].h), (3, 3, 5));
        assert!((dxx[1].weight + 2.0 / 15.0).abs() < 1e-6);
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(96, 96, Luma([128]));
        let f = Surf::new(400.0, 4).detect_and_compute(&img);
        assert!(f.is_empty());
    }

    #[test]
    fn bright_blob_is_detected_near_its_centre() {
        let img = GrayImage::from_fn(64, 64, |x, y| {
            let g = gaussian(x as f32 - 30.0, y as f32 - 32.0, 4.0);
            Luma([(20.0 + 210.0 * g) as u8])
        });
        let f = Surf::new(400.0, 4).detect_and_compute(&img);
        assert!(!f.is_empty());
        let best = f
            .keypoints
            .iter()
            .max_by(|a, b| a.response.total_cmp(&b.response))
            .unwrap();
        assert!((best.x - 30.0).abs() <= 3.0 && (best.y - 32.0).abs() <= 3.0, "{best:?}");
    }

    #[test]
    fn descriptors_are_unit_length_and_aligned() {
        let f = Surf::new(400.0, 4).detect_and_compute(&blobs(160, 120, 7));
        assert!(!f.is_empty());
        assert_eq!(f.keypoints.len(), f.descriptors.len());
        for d in &f.descriptors {
            let n: f32 = d.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((n - 1.0).abs() < 1e-3 || n == 0.0);
        }
    }

    #[test]
    fn higher_sensitivity_keeps_fewer_keypoints() {
        let img = blobs(160, 120, 11);
        let loose = Surf::new(100.0, 4).detect_and_compute(&img).len();
        let strict = Surf::new(5000.0, 4).detect_and_compute(&img).len();
        assert!(strict <= loose);
    }

    #[test]
    fn box_sums_match_brute_force() {
        let data: Vec<u8> = (0..12u32 * 9).map(|i| (i * 29 % 251) as u8).collect();
        let gray = GrayImage::from_raw(12, 9, data.clone()).unwrap();
        let ii = Integral::new(&gray);
        let brute = |x0: usize, y0: usize, x1: usize, y1: usize| -> f32 {
            let mut s = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    s += data[y * 12 + x] as u64;
                }
            }
            s as f32
        };
        assert_eq!(ii.box_sum(0, 0, 12, 9), brute(0, 0, 12, 9));
        assert_eq!(ii.box_sum(3, 2, 4, 5), brute(3, 2, 7, 7));
    }

    #[test]
    fn box_sums_are_clipped_to_the_image() {
        let ii = Integral::new(&GrayImage::from_pixel(4, 4, Luma([10])));
        assert_eq!(ii.box_sum(-2, -2, 4, 4), 40.0);
        assert_eq!(ii.box_sum(3, 3, 10, 10), 10.0);
        assert_eq!(ii.box_sum(8, 0, 2, 2), 0.0);
        assert_eq!(ii.box_sum(1, 1, 0, 3), 0.0);
    }

    #[test]
    fn tiny_images_are_handled() {
        let img = GrayImage::from_pixel(5, 5, Luma([200]));
        assert!(Surf::new(400.0, 4).detect_and_compute(&img).is_empty());
    }
}
