//! Grayscale image regions and the preprocessing applied before liveness

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegionError {
    #[error("Pixel buffer size mismatch: expected {expected}, got {actual}")]
    BufferSize { expected: usize, actual: usize },
}

/// 8-bit grayscale image, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct GrayRegion {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

/// Face bounding box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl BoundingBox {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (usize, usize) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

impl GrayRegion {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, RegionError> {
        let expected = width * height;
        if pixels.len() != expected {
            return Err(RegionError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u8) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn same_size(&self, other: &GrayRegion) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    /// Pixel lookup with coordinates clamped to the border
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> u8 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.get(cx, cy)
    }

    pub fn mean_brightness(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f32 / self.pixels.len() as f32
    }

    /// Histogram equalization, used to recover contrast in low light
    pub fn equalize_histogram(&self) -> GrayRegion {
        if self.is_empty() {
            return self.clone();
        }

        let mut hist = [0usize; 256];
        for &p in &self.pixels {
            hist[p as usize] += 1;
        }

        let mut cdf = [0usize; 256];
        let mut running = 0usize;
        for (i, count) in hist.iter().enumerate() {
            running += count;
            cdf[i] = running;
        }

        let total = self.pixels.len();
        let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
        if total == cdf_min {
            // Single intensity; nothing to stretch
            return self.clone();
        }

        let scale = 255.0 / (total - cdf_min) as f32;
        let lut: Vec<u8> = cdf
            .iter()
            .map(|&c| ((c.saturating_sub(cdf_min)) as f32 * scale).round().clamp(0.0, 255.0) as u8)
            .collect();

        GrayRegion {
            width: self.width,
            height: self.height,
            pixels: self.pixels.iter().map(|&p| lut[p as usize]).collect(),
        }
    }

    /// Bilinear resize to `width` x `height`
    pub fn resize(&self, width: usize, height: usize) -> GrayRegion {
        if self.is_empty() || width == 0 || height == 0 {
            return GrayRegion::empty();
        }
        if width == self.width && height == self.height {
            return self.clone();
        }

        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;

        GrayRegion::from_fn(width, height, |x, y| {
            let fx = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
            let fy = ((y as f32 + 0.5) * sy - 0.5).max(0.0);
            let x0 = (fx.floor() as usize).min(self.width - 1);
            let y0 = (fy.floor() as usize).min(self.height - 1);
            let x1 = (x0 + 1).min(self.width - 1);
            let y1 = (y0 + 1).min(self.height - 1);
            let tx = fx - x0 as f32;
            let ty = fy - y0 as f32;

            let top = self.get(x0, y0) as f32 * (1.0 - tx) + self.get(x1, y0) as f32 * tx;
            let bottom = self.get(x0, y1) as f32 * (1.0 - tx) + self.get(x1, y1) as f32 * tx;
            (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8
        })
    }

    /// Crop a `size` x `size` square centered on the box, clipped to the frame
    /// and resized back to `size` x `size`. Returns `None` if nothing remains.
    pub fn crop_centered(&self, bbox: &BoundingBox, size: usize) -> Option<GrayRegion> {
        if self.is_empty() || size == 0 {
            return None;
        }

        let (cx, cy) = bbox.center();
        let half = size / 2;
        let x0 = cx.saturating_sub(half).min(self.width);
        let y0 = cy.saturating_sub(half).min(self.height);
        let x1 = (x0 + size).min(self.width);
        let y1 = (y0 + size).min(self.height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let crop = GrayRegion::from_fn(x1 - x0, y1 - y0, |x, y| self.get(x0 + x, y0 + y));
        Some(crop.resize(size, size))
    }
}
