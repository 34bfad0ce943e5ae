use serde::Deserialize;

use crate::media::Frame;

/// Largest raw timestamp step accepted as continuous playback.
const MAX_JITTER_MS: i64 = 250;
/// Step applied in place of a detected discontinuity.
const DEFAULT_FRAME_TIME_MS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    /// Start at zero and smooth out discontinuities.
    Full,
    /// Start at zero, otherwise keep the source spacing.
    Zero,
    Off,
}

/// Per-segment timestamp normalizer.
///
/// In `Full` and `Zero` mode the first frame becomes 0 and the output never
/// runs backwards. The internal clock follows the source so interleaved audio
/// and video with slightly out-of-order timestamps do not drift.
#[derive(Debug, Default)]
pub struct JitterCorrector {
    last_raw: Option<i64>,
    base: Option<i64>,
    clock: i64,
    last_output: i64,
}

impl JitterCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correct(&mut self, frame: &mut Frame, mode: JitterMode) {
        if mode == JitterMode::Off {
            return;
        }
        if !frame.is_av() {
            frame.timestamp = 0;
            return;
        }

        let raw = frame.timestamp;
        match mode {
            JitterMode::Full => {
                self.clock = match self.last_raw {
                    None => 0,
                    Some(last) => {
                        let mut delta = raw - last;
                        if !(-MAX_JITTER_MS..=MAX_JITTER_MS).contains(&delta) {
                            delta = DEFAULT_FRAME_TIME_MS;
                        }
                        self.clock + delta
                    }
                };
                self.last_raw = Some(raw);
            }
            JitterMode::Zero => {
                let base = *self.base.get_or_insert(raw);
                self.clock = (raw - base).max(0);
            }
            JitterMode::Off => return,
        }

        self.last_output = self.last_output.max(self.clock);
        frame.timestamp = self.last_output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mode: JitterMode, timestamps: &[i64]) -> Vec<i64> {
        let mut jitter = JitterCorrector::new();
        timestamps
            .iter()
            .map(|&ts| {
                let mut frame = Frame::video(ts, vec![0x27, 0x01]);
                jitter.correct(&mut frame, mode);
                frame.timestamp
            })
            .collect()
    }

    fn assert_monotonic_from_zero(out: &[i64]) {
        assert_eq!(out[0], 0);
        assert!(out.windows(2).all(|w| w[0] <= w[1]), "{out:?}");
    }

    #[test]
    fn test_off_passes_through() {
        assert_eq!(run(JitterMode::Off, &[500, 100, 900]), vec![500, 100, 900]);
    }

    #[test]
    fn test_full_starts_at_zero_and_keeps_spacing() {
        assert_eq!(
            run(JitterMode::Full, &[10_000, 10_040, 10_080]),
            vec![0, 40, 80]
        );
    }

    #[test]
    fn test_full_replaces_large_jumps() {
        let out = run(JitterMode::Full, &[1000, 1040, 90_000, 90_040, 200]);
        assert_eq!(out, vec![0, 40, 50, 90, 100]);
        assert_monotonic_from_zero(&out);
    }

    #[test]
    fn test_full_interleaved_does_not_drift() {
        // audio slightly ahead of video
        let out = run(JitterMode::Full, &[100, 95, 120, 118, 140]);
        assert_eq!(out, vec![0, 0, 20, 20, 40]);
    }

    #[test]
    fn test_zero_mode() {
        let out = run(JitterMode::Zero, &[5000, 5040, 4000, 5100]);
        assert_eq!(out, vec![0, 40, 40, 100]);
        assert_monotonic_from_zero(&out);
    }

    #[test]
    fn test_metadata_pinned_to_zero() {
        let mut jitter = JitterCorrector::new();
        let mut meta = Frame::metadata(vec![0x02]);
        meta.timestamp = 777;
        jitter.correct(&mut meta, JitterMode::Full);
        assert_eq!(meta.timestamp, 0);
    }

    #[test]
    fn test_random_walk_is_monotonic() {
        let mut ts = 50_000i64;
        let mut input = Vec::new();
        for i in 0..500i64 {
            // deterministic mix of forward steps, small reorders and big jumps
            ts += match i % 7 {
                0 => -30,
                3 => 4000,
                5 => -9000,
                _ => 23,
            };
            input.push(ts);
        }
        assert_monotonic_from_zero(&run(JitterMode::Full, &input));
        assert_monotonic_from_zero(&run(JitterMode::Zero, &input));
    }
}
