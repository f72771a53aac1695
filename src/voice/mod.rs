//! Voice-side signal handling
//!
//! Clip level/voicing checks run before a clip is handed to the speaker
//! embedding provider, plus the challenge phrase prompt.

pub mod challenge;
pub mod clip;

pub use challenge::{default_phrases, pick_phrase};
pub use clip::{analyze_clip, AudioClip, SignalQualityConfig, SignalReport};
