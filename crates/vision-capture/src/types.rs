use image::{GrayImage, RgbImage};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    Bgr8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Axis-aligned pixel rectangle (x, y is the top-left corner).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    pub ts: Option<OffsetDateTime>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
            ts: None,
        }
    }

    /// Number of bytes the declared geometry requires.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.channels()
    }

    /// True when the frame has non-zero size and a buffer covering it.
    pub fn has_data(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.expected_len()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Copy out a sub-rectangle. Returns `None` if the rectangle is empty or
    /// does not lie fully inside the frame.
    pub fn crop(&self, rect: &Rect) -> Option<Frame> {
        if !self.has_data()
            || rect.width == 0
            || rect.height == 0
            || rect.right() > self.width
            || rect.bottom() > self.height
        {
            return None;
        }
        let ch = self.pixel_format.channels();
        let stride = self.width as usize * ch;
        let row_len = rect.width as usize * ch;
        let mut data = Vec::with_capacity(row_len * rect.height as usize);
        for y in rect.y..rect.bottom() {
            let start = y as usize * stride + rect.x as usize * ch;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Some(Frame {
            width: rect.width,
            height: rect.height,
            pixel_format: self.pixel_format,
            data,
            ts: self.ts,
        })
    }

    /// Single-channel luma (BT.601, fixed point as used by most camera stacks).
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        if !self.has_data() {
            return None;
        }
        let n = self.width as usize * self.height as usize;
        let buf = match self.pixel_format {
            PixelFormat::Gray8 => self.data[..n].to_vec(),
            PixelFormat::Rgb8 => self.data[..n * 3]
                .chunks_exact(3)
                .map(|p| luma(p[0], p[1], p[2]))
                .collect(),
            PixelFormat::Bgr8 => self.data[..n * 3]
                .chunks_exact(3)
                .map(|p| luma(p[2], p[1], p[0]))
                .collect(),
        };
        GrayImage::from_raw(self.width, self.height, buf)
    }

    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if !self.has_data() {
            return None;
        }
        let n = self.width as usize * self.height as usize;
        let buf = match self.pixel_format {
            PixelFormat::Rgb8 => self.data[..n * 3].to_vec(),
            PixelFormat::Bgr8 => self.data[..n * 3]
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0]])
                .collect(),
            PixelFormat::Gray8 => self.data[..n].iter().flat_map(|&v| [v, v, v]).collect(),
        };
        RgbImage::from_raw(self.width, self.height, buf)
    }

    pub fn from_gray_image(img: GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Frame::new(width, height, PixelFormat::Gray8, img.into_raw())
    }

    pub fn from_rgb_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Frame::new(width, height, PixelFormat::Rgb8, img.into_raw())
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
}
