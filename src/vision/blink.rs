//! Eye-aspect-ratio blink signal, an auxiliary liveness input

use super::region::GrayRegion;
use serde::{Deserialize, Serialize};

/// Six eye contour points: outer corner, two upper lid points, inner corner,
/// two lower lid points (p0..p5)
pub type EyeLandmarks = [(f32, f32); 6];

/// Landmarks for both eyes in one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePair {
    pub left: EyeLandmarks,
    pub right: EyeLandmarks,
}

/// External facial landmark detector. `None` when no eyes were found.
pub trait EyeLandmarkProvider: Send + Sync {
    fn locate(&self, region: &GrayRegion) -> Option<EyePair>;
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Eye aspect ratio: (|p1-p5| + |p2-p4|) / (2 |p0-p3|)
pub fn eye_aspect_ratio(eye: &EyeLandmarks) -> f32 {
    let vertical = distance(eye[1], eye[5]) + distance(eye[2], eye[4]);
    let horizontal = distance(eye[0], eye[3]);
    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    vertical / (2.0 * horizontal)
}

/// 1.0 if either eye closes below `ear_threshold` in any frame, else 0.0
pub fn blink_score(frames: &[EyePair], ear_threshold: f32) -> f32 {
    let blinked = frames.iter().any(|pair| {
        let ear = eye_aspect_ratio(&pair.left).min(eye_aspect_ratio(&pair.right));
        ear > 0.0 && ear < ear_threshold
    });
    if blinked {
        1.0
    } else {
        0.0
    }
}
