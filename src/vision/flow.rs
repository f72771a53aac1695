//! Dense optical flow (Horn-Schunck) between two equally sized regions

use super::region::GrayRegion;

/// Horn-Schunck solver parameters
#[derive(Debug, Clone, Copy)]
pub struct FlowParams {
    /// Smoothness weight, in intensity units
    pub smoothness: f32,
    pub iterations: usize,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            smoothness: 10.0,
            iterations: 32,
        }
    }
}

/// Per-pixel displacement field
#[derive(Debug, Clone)]
pub struct FlowField {
    pub width: usize,
    pub height: usize,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
}

impl FlowField {
    pub fn mean_magnitude(&self) -> f32 {
        if self.u.is_empty() {
            return 0.0;
        }
        let total: f32 = self
            .u
            .iter()
            .zip(self.v.iter())
            .map(|(u, v)| (u * u + v * v).sqrt())
            .sum();
        total / self.u.len() as f32
    }
}

/// Estimate dense flow from `prev` to `next`.
///
/// Returns `None` for empty or differently sized regions.
pub fn horn_schunck(prev: &GrayRegion, next: &GrayRegion, params: FlowParams) -> Option<FlowField> {
    if prev.is_empty() || !prev.same_size(next) {
        return None;
    }

    let (w, h) = (prev.width(), prev.height());
    let n = w * h;
    let mut ex = vec![0.0f32; n];
    let mut ey = vec![0.0f32; n];
    let mut et = vec![0.0f32; n];

    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            let grad_x = |img: &GrayRegion| {
                (img.get_clamped(xi + 1, yi) as f32 - img.get_clamped(xi - 1, yi) as f32) * 0.5
            };
            let grad_y = |img: &GrayRegion| {
                (img.get_clamped(xi, yi + 1) as f32 - img.get_clamped(xi, yi - 1) as f32) * 0.5
            };
            let i = y * w + x;
            ex[i] = 0.5 * (grad_x(prev) + grad_x(next));
            ey[i] = 0.5 * (grad_y(prev) + grad_y(next));
            et[i] = next.get(x, y) as f32 - prev.get(x, y) as f32;
        }
    }

    let alpha2 = params.smoothness * params.smoothness;
    let mut u = vec![0.0f32; n];
    let mut v = vec![0.0f32; n];

    for _ in 0..params.iterations {
        let u_avg = neighbour_average(&u, w, h);
        let v_avg = neighbour_average(&v, w, h);
        for i in 0..n {
            let denom = alpha2 + ex[i] * ex[i] + ey[i] * ey[i];
            let residual = ex[i] * u_avg[i] + ey[i] * v_avg[i] + et[i];
            u[i] = u_avg[i] - ex[i] * residual / denom;
            v[i] = v_avg[i] - ey[i] * residual / denom;
        }
    }

    Some(FlowField {
        width: w,
        height: h,
        u,
        v,
    })
}

/// 4-neighbour average with border replication
fn neighbour_average(field: &[f32], w: usize, h: usize) -> Vec<f32> {
    let at = |x: isize, y: isize| {
        let cx = x.clamp(0, w as isize - 1) as usize;
        let cy = y.clamp(0, h as isize - 1) as usize;
        field[cy * w + cx]
    };

    let mut out = vec![0.0f32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            out[y as usize * w + x as usize] =
                0.25 * (at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(shift: f32) -> GrayRegion {
        GrayRegion::from_fn(48, 48, |x, y| {
            let fx = x as f32 - shift;
            (128.0 + 50.0 * (0.4 * fx).sin() + 30.0 * (0.3 * y as f32).sin()) as u8
        })
    }

    #[test]
    fn test_identical_frames_have_no_flow() {
        let a = wave(0.0);
        let flow = horn_schunck(&a, &a, FlowParams::default()).unwrap();
        assert!(flow.mean_magnitude() < 1e-6);
    }

    #[test]
    fn test_horizontal_shift_detected() {
        let a = wave(0.0);
        let b = wave(1.0);
        let flow = horn_schunck(&a, &b, FlowParams::default()).unwrap();
        assert!(flow.mean_magnitude() > 0.2);
        // Pattern shifted right: net horizontal flow is positive
        assert!(flow.u.iter().sum::<f32>() > 0.0);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let a = GrayRegion::from_fn(8, 8, |_, _| 0);
        let b = GrayRegion::from_fn(9, 8, |_, _| 0);
        assert!(horn_schunck(&a, &b, FlowParams::default()).is_none());
        assert!(horn_schunck(&GrayRegion::empty(), &GrayRegion::empty(), FlowParams::default())
            .is_none());
    }
}
