//! Render options carried in a job's free-text metadata.
//!
//! The only directive today is the orbit animation: `orbit=<frames>` anywhere
//! in the metadata (case-insensitive key). Missing, malformed, or out-of-range
//! values fall back to a single still render; they are never an error.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Key that introduces the orbit directive.
pub const ORBIT_KEY: &str = "orbit=";

/// Inclusive bounds for the orbit frame count.
pub const MIN_ORBIT_FRAMES: u32 = 1;
pub const MAX_ORBIT_FRAMES: u32 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Number of orbit frames to render, if an animation was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit_frames: Option<u32>,
}

impl RenderOptions {
    pub fn still() -> Self {
        Self { orbit_frames: None }
    }

    pub fn is_animation(&self) -> bool {
        self.orbit_frames.is_some()
    }

    /// Extract options from job metadata.
    pub fn parse(metadata: &str) -> Self {
        Self {
            orbit_frames: parse_orbit(metadata),
        }
    }
}

fn parse_orbit(metadata: &str) -> Option<u32> {
    // ASCII lowercasing keeps byte offsets aligned with the original text.
    let lowered = metadata.to_ascii_lowercase();
    let start = lowered.find(ORBIT_KEY)? + ORBIT_KEY.len();
    let rest = &metadata[start..];
    let token = rest
        .split(|c: char| c.is_ascii_whitespace())
        .next()
        .unwrap_or_default();

    let Some(frames) = leading_integer(token) else {
        if !token.is_empty() {
            warn!(token, "ignoring unparseable orbit directive");
        }
        return None;
    };

    if !(i64::from(MIN_ORBIT_FRAMES)..=i64::from(MAX_ORBIT_FRAMES)).contains(&frames) {
        warn!(
            frames,
            min = MIN_ORBIT_FRAMES,
            max = MAX_ORBIT_FRAMES,
            "orbit frame count out of range, rendering a still instead"
        );
        return None;
    }

    u32::try_from(frames).ok()
}

/// Parse an optionally signed run of leading digits ("10," -> 10).
fn leading_integer(token: &str) -> Option<i64> {
    let (sign, digits) = match token.as_bytes().first() {
        Some(b'-') => (-1, &token[1..]),
        Some(b'+') => (1, &token[1..]),
        _ => (1, token),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", None)]
    #[case("please render this", None)]
    #[case("orbit=10", Some(10))]
    #[case("ORBIT=30 thanks", Some(30))]
    #[case("look: Orbit=1", Some(1))]
    #[case("orbit=300", Some(300))]
    #[case("orbit=301", None)]
    #[case("orbit=500", None)]
    #[case("orbit=0", None)]
    #[case("orbit=-4", None)]
    #[case("orbit=", None)]
    #[case("orbit= 12", None)]
    #[case("orbit=abc", None)]
    #[case("orbit=12fps", Some(12))]
    #[case("orbit=99999999999999999999999", None)]
    fn orbit_directive(#[case] metadata: &str, #[case] expected: Option<u32>) {
        assert_eq!(RenderOptions::parse(metadata).orbit_frames, expected);
    }

    #[test]
    fn first_directive_wins() {
        let options = RenderOptions::parse("orbit=5 and later orbit=9");
        assert_eq!(options.orbit_frames, Some(5));
    }

    #[test]
    fn non_ascii_prefix_keeps_offsets() {
        let options = RenderOptions::parse("ÄÖÜ orbit=7");
        assert_eq!(options.orbit_frames, Some(7));
        assert!(options.is_animation());
    }
}
