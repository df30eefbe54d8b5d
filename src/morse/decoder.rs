// src/morse/decoder.rs  —  Realtime PCM → DecodedMessage pipeline
//
// Pipeline: block intake + noise floor → tone selection (fixed or
// FFT-autotune) → Goertzel power → hysteresis keying → symbol timing with
// adaptive WPM → character emission → message-boundary flush.
//
// The front end is a DSP tone detector fed whole PCM blocks; its output
// drives the same accumulating-dit/dah-string shape used to flush
// characters and then messages, whether the keying came from a microphone
// or the iambic keyer's loopback.

use crate::event::{Event, EventSink};
use crate::morse::table;
use rustfft::{num_complex::Complex, FftPlanner};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyState {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedToken {
    pub ch: char,
    pub confidence: f32,
    pub wpm_est: f32,
}

#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum DecoderOutput {
    Token(DecodedToken),
    Message(DecodedMessage),
}

#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub sample_rate: u32,
    /// Block size in frames; nominal 512, valid 64..=1024.
    pub block_size: usize,
    pub auto_tone: bool,
    pub tone_hz_rx: f32,
    pub retune_ms: u64,
    pub alpha_noise: f32,
    pub power_smooth: f32,
    pub threshold_on: f32,
    pub threshold_off: f32,
    pub min_key_down_ms: u64,
    pub auto_wpm: bool,
    pub wpm_target: u8,
    pub gap_char_dots: f32,
    pub min_up_ratio: f32,
    pub message_gap_s: f32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 512,
            auto_tone: true,
            tone_hz_rx: 700.0,
            retune_ms: 500,
            alpha_noise: 0.01,
            power_smooth: 0.3,
            threshold_on: 3.0,
            threshold_off: 1.8,
            min_key_down_ms: 8,
            auto_wpm: true,
            wpm_target: 20,
            gap_char_dots: 2.5,
            min_up_ratio: 0.0,
            message_gap_s: 1.0,
        }
    }
}

const FFT_WINDOW_MS: u64 = 40;
const TONE_SEARCH_LO_HZ: f32 = 300.0;
const TONE_SEARCH_HI_HZ: f32 = 1200.0;
/// Window of recent key-down durations kept for the low-percentile WPM estimate.
const DIT_WINDOW: usize = 12;

pub struct Decoder {
    cfg: DecoderConfig,
    now_ms: f64,

    noise_floor_rms: f32,
    p_ref: f32,

    tone_hz: f32,
    retune_buf: VecDeque<f32>,
    last_retune_ms: f64,

    key_state: KeyState,
    down_since_ms: f64,
    up_since_ms: f64,
    char_flushed: bool,
    word_flushed: bool,
    message_flushed: bool,

    dit_ms: f64,
    dit_history: VecDeque<f64>,

    accumulator: String,
    char_down_ms: f64,
    char_span_ms: f64,
    message_buf: String,
}

impl Decoder {
    pub fn new(cfg: DecoderConfig) -> Self {
        let dit_ms = 1200.0 / cfg.wpm_target.max(1) as f64;
        Self {
            tone_hz: cfg.tone_hz_rx,
            cfg,
            now_ms: 0.0,
            noise_floor_rms: 1e-6,
            p_ref: 1e-6,
            retune_buf: VecDeque::new(),
            last_retune_ms: 0.0,
            key_state: KeyState::Up,
            down_since_ms: 0.0,
            up_since_ms: 0.0,
            char_flushed: true,
            word_flushed: true,
            message_flushed: true,
            dit_ms,
            dit_history: VecDeque::new(),
            accumulator: String::new(),
            char_down_ms: 0.0,
            char_span_ms: 0.0,
            message_buf: String::new(),
        }
    }

    pub fn wpm_est(&self) -> f32 {
        (1200.0 / self.dit_ms.max(1.0)) as f32
    }

    pub fn current_code(&self) -> &str {
        &self.accumulator
    }

    /// Reset noise-floor/reference-power state without touching keying state
    /// or the accumulated pattern (Calibrate resets noise floor, not keying state).
    pub fn calibrate(&mut self) {
        self.p_ref = (self.noise_floor_rms * self.noise_floor_rms).max(1e-9);
    }

    /// Feed one block of `N` mono f32 samples. `N` should stay within
    /// 64..=1024; callers outside that range still work, just with coarser
    /// tone-detection latency.
    pub fn push_block(&mut self, samples: &[f32], sink: &dyn EventSink) -> Vec<DecoderOutput> {
        let mut out = Vec::new();
        if samples.is_empty() {
            return out;
        }

        let block_ms = 1000.0 * samples.len() as f64 / self.cfg.sample_rate as f64;

        // ── noise floor ──────────────────────────────────────────────────
        let rms = rms_of(samples);
        self.noise_floor_rms = ema(self.noise_floor_rms, rms, self.cfg.alpha_noise);

        // ── tone selection ───────────────────────────────────────────────
        if self.cfg.auto_tone {
            self.maybe_retune(samples);
        } else {
            self.tone_hz = self.cfg.tone_hz_rx;
        }

        // ── Goertzel power, normalized ───────────────────────────────────
        let power = goertzel_power(samples, self.tone_hz, self.cfg.sample_rate as f32);
        if self.key_state == KeyState::Up {
            // P_ref tracks the ambient/noise reference power; only adapt it
            // while the key is up so an active tone doesn't drag its own
            // baseline up and collapse the ratio toward 1.
            self.p_ref = ema(self.p_ref, power, self.cfg.power_smooth).max(1e-9);
        }
        let ratio = power / self.p_ref.max(1e-9);

        self.now_ms += block_ms;

        // ── hysteresis keying ────────────────────────────────────────────
        match self.key_state {
            KeyState::Up => {
                if ratio >= self.cfg.threshold_on {
                    self.key_state = KeyState::Down;
                    self.down_since_ms = self.now_ms;
                }
            }
            KeyState::Down => {
                let dwell = self.now_ms - self.down_since_ms;
                if ratio <= self.cfg.threshold_off && dwell >= self.cfg.min_key_down_ms as f64 {
                    self.key_state = KeyState::Up;
                    self.up_since_ms = self.now_ms;
                    self.on_key_up_edge(dwell);
                    self.char_flushed = false;
                    self.word_flushed = false;
                    self.message_flushed = false;
                }
            }
        }

        // ── gap classification (level-triggered, so a trailing silence at
        //    end-of-transmission still flushes without waiting for the next
        //    key-down) ──────────────────────────────────────────────────────
        if self.key_state == KeyState::Up {
            let up_elapsed = self.now_ms - self.up_since_ms;
            let char_gap_ms = 5.0 * self.dit_ms;
            let intra_char_ms = self.cfg.gap_char_dots as f64 * self.dit_ms;

            if !self.char_flushed && up_elapsed >= intra_char_ms && !self.accumulator.is_empty() {
                if let Some(tok) = self.flush_char(sink) {
                    out.push(DecoderOutput::Token(tok));
                }
                self.char_flushed = true;
            }
            if !self.word_flushed && up_elapsed >= char_gap_ms {
                self.message_buf.push(' ');
                self.word_flushed = true;
            }
            if !self.message_flushed && up_elapsed >= (self.cfg.message_gap_s as f64 * 1000.0) {
                self.message_flushed = true;
                if !self.message_buf.trim().is_empty() {
                    let text = self.message_buf.trim().to_string();
                    self.message_buf.clear();
                    out.push(DecoderOutput::Message(DecodedMessage { text }));
                }
            }
        }

        out
    }

    fn on_key_up_edge(&mut self, down_dwell_ms: f64) {
        let is_dah = down_dwell_ms >= 2.0 * self.dit_ms;
        self.accumulator.push(if is_dah { '-' } else { '.' });
        self.char_down_ms += down_dwell_ms;
        self.char_span_ms += down_dwell_ms;

        if self.cfg.auto_wpm && !is_dah {
            self.dit_history.push_back(down_dwell_ms);
            if self.dit_history.len() > DIT_WINDOW {
                self.dit_history.pop_front();
            }
            let p20 = low_percentile(&self.dit_history, 0.20);
            if p20 > 0.0 {
                self.dit_ms = self.dit_ms * 0.8 + p20 * 0.2;
            }
        } else if !self.cfg.auto_wpm {
            self.dit_ms = 1200.0 / self.cfg.wpm_target.max(1) as f64;
        }
    }

    fn flush_char(&mut self, sink: &dyn EventSink) -> Option<DecodedToken> {
        let code = std::mem::take(&mut self.accumulator);
        // account for the intra-element gaps already implied by the pattern
        self.char_span_ms += self.cfg.gap_char_dots as f64 * self.dit_ms;
        let up_ratio = if self.char_span_ms > 0.0 {
            (self.char_down_ms / self.char_span_ms) as f32
        } else {
            1.0
        };
        self.char_down_ms = 0.0;
        self.char_span_ms = 0.0;

        if up_ratio < self.cfg.min_up_ratio {
            sink.emit(
                Event::new("decoder.low_confidence", "character rejected below min_up_ratio")
                    .with("code", code.clone())
                    .with("up_ratio", up_ratio.to_string()),
            );
            return None;
        }

        let ch = match table::code_to_char(&code) {
            Some(c) => c,
            None => {
                sink.emit(
                    Event::new("decoder.unknown_pattern", format!("unrecognized pattern '{code}'"))
                        .with("code", code.clone()),
                );
                '*'
            }
        };
        self.message_buf.push(ch);
        Some(DecodedToken { ch, confidence: up_ratio.clamp(0.0, 1.0), wpm_est: self.wpm_est() })
    }

    fn maybe_retune(&mut self, samples: &[f32]) {
        self.retune_buf.extend(samples.iter().copied());
        let window_samples = (FFT_WINDOW_MS as f64 / 1000.0 * self.cfg.sample_rate as f64) as usize;
        while self.retune_buf.len() > window_samples {
            self.retune_buf.pop_front();
        }
        if self.retune_buf.len() < window_samples {
            return;
        }
        if self.now_ms - self.last_retune_ms < self.cfg.retune_ms as f64 {
            return;
        }
        self.last_retune_ms = self.now_ms;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_samples);
        let mut buf: Vec<Complex<f32>> = self
            .retune_buf
            .iter()
            .map(|s| Complex { re: *s, im: 0.0 })
            .collect();
        fft.process(&mut buf);

        let bin_hz = self.cfg.sample_rate as f32 / window_samples as f32;
        let lo_bin = (TONE_SEARCH_LO_HZ / bin_hz).floor() as usize;
        let hi_bin = ((TONE_SEARCH_HI_HZ / bin_hz).ceil() as usize).min(buf.len() / 2);

        if lo_bin >= hi_bin {
            return;
        }
        let (best_bin, _) = buf[lo_bin..hi_bin]
            .iter()
            .enumerate()
            .map(|(i, c)| (i + lo_bin, c.norm()))
            .fold((lo_bin, 0.0f32), |acc, cur| if cur.1 > acc.1 { cur } else { acc });

        self.tone_hz = best_bin as f32 * bin_hz;
    }
}

fn rms_of(samples: &[f32]) -> f32 {
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn ema(prev: f32, new: f32, alpha: f32) -> f32 {
    let v = prev * (1.0 - alpha) + new * alpha;
    if v.is_finite() { v } else { prev }
}

/// Goertzel power at `freq_hz`, normalized so a full-scale sine over the
/// whole block reads approximately 1.0 — keeps `ratio` dimensionless
/// regardless of block size.
fn goertzel_power(samples: &[f32], freq_hz: f32, sample_rate: f32) -> f32 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }
    let k = (0.5 + n as f32 * freq_hz / sample_rate) as usize;
    let w = 2.0 * std::f32::consts::PI * k as f32 / n as f32;
    let cosine = w.cos();
    let coeff = 2.0 * cosine;
    let (mut q1, mut q2) = (0.0f32, 0.0f32);
    for &s in samples {
        let q0 = coeff * q1 - q2 + s;
        q2 = q1;
        q1 = q0;
    }
    let real = q1 - q2 * cosine;
    let imag = q2 * w.sin();
    let mag2 = real * real + imag * imag;
    let norm = (n as f32 / 2.0).powi(2);
    mag2 / norm.max(1e-9)
}

fn low_percentile(values: &VecDeque<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v: Vec<f64> = values.iter().copied().collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((v.len() as f64 - 1.0) * p).round() as usize;
    v[idx.min(v.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CollectingEventSink;
    use crate::morse::encoder;
    use crate::morse::Timing;

    fn feed_text(text: &str, wpm: u8, tone_hz: f32, sample_rate: u32) -> String {
        let timing = Timing::from_wpm(wpm);
        let mut seq = encoder::encode(text, &timing);
        // trailing silence long enough to force a message flush
        seq.push((false, std::time::Duration::from_millis(1200)));
        let samples = encoder::render(&seq, tone_hz, 0.8, sample_rate);

        let cfg = DecoderConfig {
            sample_rate,
            block_size: 512,
            auto_tone: false,
            tone_hz_rx: tone_hz,
            auto_wpm: false,
            wpm_target: wpm,
            ..Default::default()
        };
        let mut decoder = Decoder::new(cfg);
        let sink = CollectingEventSink::new();
        let mut decoded_messages = Vec::new();
        for block in samples.chunks(512) {
            for output in decoder.push_block(block, &sink) {
                if let DecoderOutput::Message(m) = output {
                    decoded_messages.push(m.text);
                }
            }
        }
        decoded_messages.join(" ")
    }

    #[test]
    fn roundtrip_simple_word() {
        let decoded = feed_text("THE QUICK FOX", 20, 700.0, 8000);
        assert_eq!(decoded, "THE QUICK FOX");
    }

    #[test]
    fn roundtrip_digits() {
        let decoded = feed_text("CQ 123", 20, 700.0, 8000);
        assert_eq!(decoded, "CQ 123");
    }

    #[test]
    fn calibrate_does_not_touch_accumulator() {
        let cfg = DecoderConfig { auto_tone: false, ..Default::default() };
        let mut d = Decoder::new(cfg);
        d.accumulator.push_str(".-");
        d.calibrate();
        assert_eq!(d.accumulator, ".-");
    }

    #[test]
    fn dah_boundary_is_inclusive() {
        let cfg = DecoderConfig { auto_tone: false, auto_wpm: false, wpm_target: 20, ..Default::default() };
        let mut d = Decoder::new(cfg);
        // exactly 2*dit_ms should classify as dah: the "< 2*T_dit" boundary is inclusive on the dah side
        d.dit_ms = 60.0;
        d.on_key_up_edge(120.0);
        assert_eq!(d.accumulator, "-");
    }
}
