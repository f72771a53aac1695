//! Liveness analyzer: motion + texture (+ optional blink) anti-spoofing score
//!
//! Input is a short burst of grayscale regions cropped from the same tracked
//! face location at a fixed cadence. A photo or a screen held still produces
//! almost no optical flow and a flat LBP texture; a live face produces both.
//!
//! Any missing or zero-size region aborts the analysis. The result is then a
//! failed report with score 0, never an error.

use super::flow::{horn_schunck, FlowParams};
use super::region::GrayRegion;
use super::texture::{histogram_correlation, lbp_histogram, lbp_variance};
use serde::{Deserialize, Serialize};

/// Configuration for the liveness analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Number of regions captured per burst (k >= 2)
    pub burst_frames: usize,
    /// Capture cadence between regions (ms)
    pub frame_spacing_ms: u64,
    /// Side length regions are cropped/resized to (px)
    pub region_size: usize,
    /// Saturation rate for the motion score: 1 - exp(-alpha * magnitude)
    pub motion_alpha: f32,
    /// Scale for the texture score: 1 - exp(-variance / scale)
    pub texture_scale: f32,
    pub motion_weight: f32,
    pub texture_weight: f32,
    /// Weight of the auxiliary blink signal (<= 0.2)
    pub blink_weight: f32,
    /// Eye-aspect-ratio below which an eye counts as closed
    pub blink_ear_threshold: f32,
    /// Aggregate score required to pass
    pub threshold: f32,
    /// Bursts darker than this mean brightness are histogram-equalized first
    pub low_light_brightness: f32,
    pub flow_smoothness: f32,
    pub flow_iterations: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            burst_frames: 4,
            frame_spacing_ms: 100,
            region_size: 160,
            motion_alpha: 0.4,
            texture_scale: 500.0,
            motion_weight: 0.6,
            texture_weight: 0.35,
            blink_weight: 0.05,
            blink_ear_threshold: 0.2,
            threshold: 0.62,
            low_light_brightness: 60.0,
            flow_smoothness: 10.0,
            flow_iterations: 32,
        }
    }
}

/// Outcome of one liveness analysis. Recomputed on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessReport {
    pub optical_score: f32,
    pub texture_score: f32,
    pub blink_score: f32,
    pub aggregate_score: f32,
    pub pass: bool,
    pub frames_analysed: usize,
    pub low_light: bool,
}

impl LivenessReport {
    /// Report for an aborted burst
    pub fn failed() -> Self {
        Self {
            optical_score: 0.0,
            texture_score: 0.0,
            blink_score: 0.0,
            aggregate_score: 0.0,
            pass: false,
            frames_analysed: 0,
            low_light: false,
        }
    }
}

/// Scores region bursts for liveness
#[derive(Debug, Clone)]
pub struct LivenessAnalyzer {
    config: LivenessConfig,
    /// Reference LBP histogram of live skin, if one was calibrated
    reference: Option<Vec<f32>>,
}

impl LivenessAnalyzer {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            reference: None,
        }
    }

    /// Score texture by correlation with a calibrated live-skin region.
    /// Flat regions correlate with nothing and score 0.
    pub fn with_reference(mut self, reference: &GrayRegion) -> Self {
        self.reference = Some(lbp_histogram(reference));
        self
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Analyze a burst of regions. `blink` is the optional auxiliary signal in [0, 1].
    pub fn analyze(&self, regions: &[GrayRegion], blink: Option<f32>) -> LivenessReport {
        if regions.len() < 2 {
            log::warn!(
                "Liveness aborted: need at least 2 regions, got {}",
                regions.len()
            );
            return LivenessReport::failed();
        }

        if regions.iter().any(|r| r.is_empty()) {
            log::warn!("Liveness aborted: empty region in burst");
            return LivenessReport::failed();
        }

        if regions.iter().any(|r| !r.same_size(&regions[0])) {
            log::warn!("Liveness aborted: regions differ in size");
            return LivenessReport::failed();
        }

        let brightness =
            regions.iter().map(|r| r.mean_brightness()).sum::<f32>() / regions.len() as f32;
        let low_light = brightness < self.config.low_light_brightness;
        let equalized: Vec<GrayRegion>;
        let regions = if low_light {
            log::debug!("Low light burst (mean {:.0}), equalizing", brightness);
            equalized = regions.iter().map(|r| r.equalize_histogram()).collect();
            &equalized[..]
        } else {
            regions
        };

        let optical_score = self.motion_score(regions);
        let texture_score = self.texture_score(&regions[0]);
        let blink_score = blink.unwrap_or(0.0).clamp(0.0, 1.0);

        let aggregate_score = (self.config.motion_weight * optical_score
            + self.config.texture_weight * texture_score
            + self.config.blink_weight * blink_score)
            .clamp(0.0, 1.0);
        let pass = aggregate_score >= self.config.threshold;

        log::info!(
            "Liveness: optical={:.3} texture={:.3} blink={:.1} aggregate={:.3} threshold={:.2} result={}",
            optical_score,
            texture_score,
            blink_score,
            aggregate_score,
            self.config.threshold,
            if pass { "PASS" } else { "FAIL" }
        );

        LivenessReport {
            optical_score,
            texture_score,
            blink_score,
            aggregate_score,
            pass,
            frames_analysed: regions.len(),
            low_light,
        }
    }

    fn motion_score(&self, regions: &[GrayRegion]) -> f32 {
        let params = FlowParams {
            smoothness: self.config.flow_smoothness,
            iterations: self.config.flow_iterations,
        };

        let mut total = 0.0f32;
        let mut pairs = 0usize;
        for pair in regions.windows(2) {
            if let Some(flow) = horn_schunck(&pair[0], &pair[1], params) {
                total += flow.mean_magnitude();
                pairs += 1;
            }
        }

        if pairs == 0 {
            return 0.0;
        }
        let magnitude = total / pairs as f32;
        saturate(magnitude, self.config.motion_alpha)
    }

    fn texture_score(&self, region: &GrayRegion) -> f32 {
        match &self.reference {
            Some(reference) => {
                histogram_correlation(&lbp_histogram(region), reference).clamp(0.0, 1.0)
            }
            None => {
                let scale = self.config.texture_scale.max(f32::EPSILON);
                saturate(lbp_variance(region), 1.0 / scale)
            }
        }
    }
}

/// Map a non-negative measure into [0, 1): 1 - exp(-rate * x)
fn saturate(x: f32, rate: f32) -> f32 {
    if !x.is_finite() || x <= 0.0 {
        return 0.0;
    }
    (1.0 - (-rate * x).exp()).clamp(0.0, 1.0)
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

    fn analyzer() -> LivenessAnalyzer {
        LivenessAnalyzer::new(LivenessConfig::default())
    }

    #[test]
    fn test_static_burst_fails() {
        let frame = wave(0.0);
        let report = analyzer().analyze(&[frame.clone(), frame.clone(), frame], None);
        assert_eq!(report.optical_score, 0.0);
        assert!(!report.pass);
        assert_eq!(report.frames_analysed, 3);
    }

    #[test]
    fn test_moving_burst_scores_motion() {
        let burst: Vec<GrayRegion> = (0..4).map(|i| wave(i as f32)).collect();
        let report = analyzer().analyze(&burst, None);
        assert!(report.optical_score > 0.05);
        assert!(report.texture_score > 0.0);
        assert!(report.aggregate_score > 0.0);
    }

    #[test]
    fn test_flat_surface_has_no_texture() {
        let flat = GrayRegion::from_fn(32, 32, |_, _| 120);
        let report = analyzer().analyze(&[flat.clone(), flat], None);
        assert_eq!(report.texture_score, 0.0);
        assert_eq!(report.aggregate_score, 0.0);
        assert!(!report.pass);
    }

    #[test]
    fn test_empty_region_aborts_with_zero() {
        let report = analyzer().analyze(&[wave(0.0), GrayRegion::empty(), wave(2.0)], None);
        assert_eq!(report, LivenessReport::failed());
    }

    #[test]
    fn test_single_region_aborts() {
        assert_eq!(analyzer().analyze(&[wave(0.0)], None), LivenessReport::failed());
        assert_eq!(analyzer().analyze(&[], None), LivenessReport::failed());
    }

    #[test]
    fn test_size_mismatch_aborts() {
        let small = GrayRegion::from_fn(16, 16, |x, _| x as u8);
        assert_eq!(
            analyzer().analyze(&[wave(0.0), small], None),
            LivenessReport::failed()
        );
    }

    #[test]
    fn test_blink_contributes_to_aggregate() {
        let frame = wave(0.0);
        let without = analyzer().analyze(&[frame.clone(), frame.clone()], None);
        let with = analyzer().analyze(&[frame.clone(), frame], Some(1.0));
        assert!((with.aggregate_score - without.aggregate_score - 0.05).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_controls_pass() {
        let burst: Vec<GrayRegion> = (0..4).map(|i| wave(i as f32)).collect();
        let lenient = LivenessAnalyzer::new(LivenessConfig {
            threshold: 0.01,
            ..LivenessConfig::default()
        });
        assert!(lenient.analyze(&burst, None).pass);
    }

    #[test]
    fn test_low_light_burst_is_equalized() {
        let dark: Vec<GrayRegion> = (0..3)
            .map(|i| GrayRegion::from_fn(32, 32, |x, y| ((x + y + i) % 20) as u8))
            .collect();
        let report = analyzer().analyze(&dark, None);
        assert!(report.low_light);
    }

    #[test]
    fn test_reference_texture_correlation() {
        let skin = wave(0.0);
        let analyzer = analyzer().with_reference(&skin);
        let report = analyzer.analyze(&[skin.clone(), skin], None);
        assert!((report.texture_score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_reference_rejects_flat_surface() {
        let analyzer = analyzer().with_reference(&wave(0.0));
        let flat = GrayRegion::from_fn(48, 48, |_, _| 120);
        let report = analyzer.analyze(&[flat.clone(), flat], None);
        assert_eq!(report.texture_score, 0.0);
        assert!(!report.pass);
    }

    #[test]
    fn test_saturate_bounds() {
        assert_eq!(saturate(0.0, 0.4), 0.0);
        assert_eq!(saturate(-1.0, 0.4), 0.0);
        assert_eq!(saturate(f32::NAN, 0.4), 0.0);
        assert!(saturate(1000.0, 0.4) <= 1.0);
    }
}
