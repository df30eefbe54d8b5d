// src/morse/encoder.rs  —  Text → keyed element sequence → enveloped PCM
//
// Two-stage design: first build a sequence of (key_down, Duration)
// elements, then render that sequence to audio samples with raised-cosine
// on/off ramps instead of a hard on/off switch, to suppress keying clicks.

use crate::morse::table;
use crate::morse::Timing;
use std::time::Duration;

pub type ToneSeq = Vec<(bool, Duration)>; // (key_down, duration)

/// `<AR>`, `<SK>`, ... are prosigns: keyed as their letters run together,
/// with no inter-character gap. Anything not matching `<...>` or a bare
/// character is silently skipped.
pub fn encode(text: &str, timing: &Timing) -> ToneSeq {
    let mut seq = Vec::new();
    let words: Vec<&str> = text.split_whitespace().collect();

    for (wi, word) in words.iter().enumerate() {
        if let Some(name) = word.strip_prefix('<').and_then(|w| w.strip_suffix('>')) {
            if let Some(code) = table::prosign_code(name) {
                push_code(&mut seq, &code, timing);
            }
        } else {
            let chars: Vec<char> = word.chars().collect();
            for (ci, &ch) in chars.iter().enumerate() {
                if let Some(code) = table::char_to_code(ch) {
                    push_code(&mut seq, code, timing);
                    if ci + 1 < chars.len() {
                        seq.push((false, timing.char_gap));
                    }
                }
            }
        }
        if wi + 1 < words.len() {
            seq.push((false, timing.word_gap));
        }
    }
    seq
}

fn push_code(seq: &mut ToneSeq, code: &str, t: &Timing) {
    let elems: Vec<char> = code.chars().collect();
    for (i, &el) in elems.iter().enumerate() {
        let dur = if el == '-' { t.dah } else { t.dit };
        seq.push((true, dur));
        if i + 1 < elems.len() {
            seq.push((false, t.elem_gap));
        }
    }
}

/// Duration of a raised-cosine on/off ramp, clamped to the 4-6 ms range.
const RAMP_MS: f32 = 5.0;

/// Render a tone sequence into mono f32 PCM at `sample_rate`, with
/// `ramp_ms` raised-cosine envelopes on every key-on/key-off edge to
/// suppress key clicks. `volume` is linear gain in `0.0..=1.0`.
pub fn render(seq: &ToneSeq, tone_hz: f32, volume: f32, sample_rate: u32) -> Vec<f32> {
    let volume = volume.clamp(0.0, 1.0);
    let total_samples: usize = seq
        .iter()
        .map(|(_, dur)| duration_to_samples(*dur, sample_rate))
        .sum();
    let mut out = Vec::with_capacity(total_samples);

    let ramp_samples = ((RAMP_MS / 1000.0) * sample_rate as f32) as usize;
    let mut phase: f32 = 0.0;
    let step = tone_hz / sample_rate as f32;

    for (key_down, dur) in seq {
        let n = duration_to_samples(*dur, sample_rate);
        if !*key_down {
            out.extend(std::iter::repeat(0.0).take(n));
            phase = 0.0;
            continue;
        }
        let ramp = ramp_samples.min(n / 2).max(1);
        for i in 0..n {
            let carrier = (phase * std::f32::consts::TAU).sin();
            phase = (phase + step).fract();
            let env = if i < ramp {
                raised_cosine(i as f32 / ramp as f32)
            } else if i >= n - ramp {
                raised_cosine((n - 1 - i) as f32 / ramp as f32)
            } else {
                1.0
            };
            out.push((carrier * env * volume).clamp(-1.0, 1.0));
        }
    }
    out
}

fn raised_cosine(t: f32) -> f32 {
    0.5 - 0.5 * (std::f32::consts::PI * t).cos()
}

fn duration_to_samples(dur: Duration, sample_rate: u32) -> usize {
    ((dur.as_secs_f64()) * sample_rate as f64).round() as usize
}

/// Render a sequence as fixed-size blocks, for incremental / cancellable
/// playback (output: blocks of samples written to AudioSink).
pub fn render_blocks(seq: &ToneSeq, tone_hz: f32, volume: f32, sample_rate: u32, block_size: usize) -> Vec<Vec<f32>> {
    render(seq, tone_hz, volume, sample_rate)
        .chunks(block_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prosign_has_no_interletter_gap() {
        let t = Timing::from_wpm(20);
        let seq = encode("<AR>", &t);
        // AR = .-.-.  — five elements, no char_gap anywhere in the sequence
        assert!(seq.iter().all(|(down, dur)| *down || *dur != t.char_gap));
    }

    #[test]
    fn word_gap_present_between_words_only() {
        let t = Timing::from_wpm(20);
        let seq = encode("CQ DE", &t);
        let word_gaps = seq.iter().filter(|(down, dur)| !down && *dur == t.word_gap).count();
        assert_eq!(word_gaps, 1);
    }

    #[test]
    fn render_is_silent_when_key_up() {
        let t = Timing::from_wpm(20);
        let samples = render(&vec![(false, t.word_gap)], 700.0, 0.5, 8000);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn render_clips_within_unit_amplitude() {
        let t = Timing::from_wpm(20);
        let seq = encode("E", &t);
        let samples = render(&seq, 700.0, 1.0, 8000);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }
}
