use serde::{Deserialize, Serialize};

/// RMS treated as strong speech when normalizing quality
const STRONG_SPEECH_RMS: f32 = 0.20;

/// Mono PCM clip, samples in [-1, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Convert i16 PCM to a float clip
    pub fn from_i16(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            samples: samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect(),
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as f32 / self.sample_rate as f32 * 1000.0) as u64
    }
}

/// Minimum signal a clip must carry before it is worth embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalQualityConfig {
    pub min_duration_ms: u64,
    pub min_rms: f32,
    pub min_peak: f32,
    /// Mean zero-crossing rate below this is treated as unvoiced hum
    pub min_zero_crossing_rate: f32,
}

impl Default for SignalQualityConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 1000,
            min_rms: 0.003,
            min_peak: 0.01,
            min_zero_crossing_rate: 0.005,
        }
    }
}

/// Measured signal properties of one clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub duration_ms: u64,
    pub rms: f32,
    pub peak: f32,
    pub zero_crossing_rate: f32,
    /// RMS normalized so ~0.20 RMS (strong speech) maps to 1.0
    pub quality: f32,
    /// Why the clip is unusable, if it is
    pub weakness: Option<String>,
}

impl SignalReport {
    pub fn is_usable(&self) -> bool {
        self.weakness.is_none()
    }
}

/// Measure a clip against the configured floors
pub fn analyze_clip(clip: &AudioClip, config: &SignalQualityConfig) -> SignalReport {
    let duration_ms = clip.duration_ms();
    let rms = compute_rms(&clip.samples);
    let peak = clip.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    let zero_crossing_rate = zero_crossing_rate(&clip.samples, 400);
    let quality = (rms / STRONG_SPEECH_RMS).clamp(0.0, 1.0);

    let weakness = if duration_ms < config.min_duration_ms {
        Some(format!(
            "clip too short: {}ms (minimum {}ms)",
            duration_ms, config.min_duration_ms
        ))
    } else if rms < config.min_rms || peak < config.min_peak {
        Some(format!("level too low: rms={:.4} peak={:.4}", rms, peak))
    } else if zero_crossing_rate < config.min_zero_crossing_rate {
        Some(format!("no voiced content: zcr={:.4}", zero_crossing_rate))
    } else {
        None
    };

    SignalReport {
        duration_ms,
        rms,
        peak,
        zero_crossing_rate,
        quality,
        weakness,
    }
}

/// Root-mean-square level
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Mean per-frame rate of sign changes
pub fn zero_crossing_rate(samples: &[f32], frame_size: usize) -> f32 {
    if frame_size < 2 || samples.len() < frame_size {
        return 0.0;
    }

    let rates: Vec<f32> = samples
        .chunks_exact(frame_size)
        .map(|frame| {
            let crossings = frame
                .windows(2)
                .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
                .count();
            crossings as f32 / (frame_size - 1) as f32
        })
        .collect();

    rates.iter().sum::<f32>() / rates.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, amplitude: f32, ms: u64) -> AudioClip {
        let rate = 16000;
        let n = (rate as u64 * ms / 1000) as usize;
        let samples = (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect();
        AudioClip::new(samples, rate)
    }

    #[test]
    fn test_rms() {
        assert_eq!(compute_rms(&[]), 0.0);
        assert!((compute_rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_voiced_tone_is_usable() {
        let report = analyze_clip(&tone(220.0, 0.3, 1500), &SignalQualityConfig::default());
        assert!(report.is_usable(), "{:?}", report.weakness);
        assert_eq!(report.duration_ms, 1500);
        assert!(report.quality > 0.9);
    }

    #[test]
    fn test_silence_is_too_weak() {
        let silent = AudioClip::new(vec![0.0; 32000], 16000);
        let report = analyze_clip(&silent, &SignalQualityConfig::default());
        assert!(!report.is_usable());
        assert_eq!(report.quality, 0.0);
    }

    #[test]
    fn test_short_clip_is_too_weak() {
        let report = analyze_clip(&tone(220.0, 0.3, 300), &SignalQualityConfig::default());
        assert!(report.weakness.unwrap().contains("too short"));
    }

    #[test]
    fn test_dc_offset_is_unvoiced() {
        let hum = AudioClip::new(vec![0.2; 32000], 16000);
        let report = analyze_clip(&hum, &SignalQualityConfig::default());
        assert!(report.weakness.unwrap().contains("voiced"));
    }

    #[test]
    fn test_from_i16() {
        let clip = AudioClip::from_i16(&[i16::MAX, 0], 8000);
        assert!((clip.samples[0] - 1.0).abs() < 1e-6);
        assert_eq!(clip.duration_ms(), 0);
    }
}
