// src/morse/timing.rs  —  WPM → element durations (PARIS standard)
use std::time::Duration;

/// All timing derived from a single dit length.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub dit: Duration,      // 1 unit
    pub dah: Duration,      // 3 units
    pub elem_gap: Duration, // 1 unit  (between dits/dahs in same char)
    pub char_gap: Duration, // 3 units (between characters)
    pub word_gap: Duration, // 7 units (between words)
}

impl Timing {
    /// PARIS standard: dit = 1200 ms / wpm.
    pub fn from_wpm(wpm: u8) -> Self {
        let wpm = wpm.max(1) as u64;
        let dit_ms = 1200 / wpm;
        Self::from_dit_ms(dit_ms)
    }

    pub fn from_dit_ms(dit_ms: u64) -> Self {
        let dit_ms = dit_ms.max(1);
        Self {
            dit: Duration::from_millis(dit_ms),
            dah: Duration::from_millis(dit_ms * 3),
            elem_gap: Duration::from_millis(dit_ms),
            char_gap: Duration::from_millis(dit_ms * 3),
            word_gap: Duration::from_millis(dit_ms * 7),
        }
    }

    /// Farnsworth: characters keyed at `char_wpm`, inter-char/word spacing
    /// stretched to match the slower effective `eff_wpm`.
    pub fn farnsworth(char_wpm: u8, eff_wpm: u8) -> Self {
        let base = Self::from_wpm(char_wpm);
        let eff_dit_ms = 1200 / (eff_wpm.max(1) as u64);
        let base_dit_ms = base.dit.as_millis() as u64;
        let extra_char = (eff_dit_ms * 3).max(base_dit_ms * 3);
        let extra_word = (eff_dit_ms * 7).max(base_dit_ms * 7);
        Self {
            char_gap: Duration::from_millis(extra_char),
            word_gap: Duration::from_millis(extra_word),
            ..base
        }
    }

    pub fn wpm(&self) -> f64 {
        1200.0 / self.dit.as_millis().max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_wpm_dit_is_sixty_ms() {
        let t = Timing::from_wpm(20);
        assert_eq!(t.dit, Duration::from_millis(60));
        assert_eq!(t.dah, Duration::from_millis(180));
        assert_eq!(t.word_gap, Duration::from_millis(420));
    }
}
