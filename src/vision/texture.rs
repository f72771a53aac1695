//! Local binary pattern texture measures
//!
//! Printed photos and screens are flatter than skin: their LBP codes cluster
//! into few values, so the code variance stays low.

use super::region::GrayRegion;

/// Neighbour offsets in bit order, clockwise from top-left
const NEIGHBOURS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

/// LBP codes for interior pixels (border pixels have no full neighbourhood)
pub fn lbp_codes(region: &GrayRegion) -> Vec<u8> {
    let (w, h) = (region.width(), region.height());
    if w < 3 || h < 3 {
        return Vec::new();
    }

    let mut codes = Vec::with_capacity((w - 2) * (h - 2));
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = region.get(x, y);
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let nx = (x as isize + dx) as usize;
                let ny = (y as isize + dy) as usize;
                if region.get(nx, ny) >= center {
                    code |= 1 << bit;
                }
            }
            codes.push(code);
        }
    }
    codes
}

/// Variance of the interior LBP codes
pub fn lbp_variance(region: &GrayRegion) -> f32 {
    let codes = lbp_codes(region);
    if codes.is_empty() {
        return 0.0;
    }
    let n = codes.len() as f64;
    let mean = codes.iter().map(|&c| c as f64).sum::<f64>() / n;
    let var = codes
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var as f32
}

/// Code produced wherever all eight neighbours are at least the centre,
/// which is every pixel of a flat patch
pub const UNIFORM_CODE: u8 = 255;

/// Normalized 256-bin histogram of the interior LBP codes, excluding
/// [`UNIFORM_CODE`]. A flat region yields an all-zero histogram.
pub fn lbp_histogram(region: &GrayRegion) -> Vec<f32> {
    let mut hist = vec![0.0f32; 256];
    let mut total = 0usize;
    for c in lbp_codes(region) {
        if c != UNIFORM_CODE {
            hist[c as usize] += 1.0;
            total += 1;
        }
    }
    if total == 0 {
        return hist;
    }
    for bin in hist.iter_mut() {
        *bin /= total as f32;
    }
    hist
}

/// Pearson correlation between two histograms, in [-1, 1]
pub fn histogram_correlation(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;

    let mut num = 0.0f32;
    let mut den_a = 0.0f32;
    let mut den_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }

    let den = (den_a * den_b).sqrt();
    if den <= f32::EPSILON {
        return 0.0;
    }
    (num / den).clamp(-1.0, 1.0)
}
