//! Spoken challenge phrases shown before the voice capture

use chacha20poly1305::aead::OsRng;
use rand_core::RngCore;

pub fn default_phrases() -> Vec<String> {
    ["blue river", "quiet forest", "silver moon", "soft thunder", "clear morning"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Pick one phrase at random. Empty lists yield `None`.
pub fn pick_phrase(phrases: &[String]) -> Option<&str> {
    if phrases.is_empty() {
        return None;
    }
    let index = (OsRng.next_u32() as usize) % phrases.len();
    Some(phrases[index].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_from_list() {
        let phrases = default_phrases();
        for _ in 0..20 {
            let phrase = pick_phrase(&phrases).unwrap();
            assert!(phrases.iter().any(|p| p == phrase));
        }
    }

    #[test]
    fn test_empty_list() {
        assert!(pick_phrase(&[]).is_none());
    }
}
