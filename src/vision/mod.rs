//! Face-side signal processing: regions, optical flow, texture and liveness

pub mod blink;
pub mod flow;
pub mod liveness;
pub mod region;
pub mod texture;

pub use blink::{blink_score, eye_aspect_ratio, EyeLandmarkProvider, EyePair};
pub use liveness::{LivenessAnalyzer, LivenessConfig, LivenessReport};
pub use region::{BoundingBox, GrayRegion, RegionError};
