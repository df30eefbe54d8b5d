// src/audio/mod.rs  —  AudioSource/AudioSink traits + mixer + cpal backend
//
// Device enumeration and the host's audio callback mechanics live outside
// the core; it only sees these two traits. Output is a realtime `AudioSink`
// (push blocks, never blocks the caller) and input an `AudioSource` (pull
// captured blocks), so neither side of the non-blocking callback boundary
// owns device lifecycle.

use crate::event::EventSink;
use anyhow::Result;

pub trait AudioSource: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    /// Pull the next captured block, if one is ready. Never blocks. Soft
    /// errors (e.g. an input overrun) are reported through `sink` rather
    /// than returned, since there's still a block — or lack of one — to
    /// hand back either way.
    fn poll_block(&mut self, sink: &dyn EventSink) -> Option<Vec<f32>>;
    fn sample_rate(&self) -> u32;
}

pub trait AudioSink: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    /// Queue a block for playback. Never blocks; sidetone and TX audio are
    /// mixed additively downstream.
    fn push_block(&mut self, samples: &[f32]);
    fn sample_rate(&self) -> u32;
}

/// Additive mixing with a hard limiter at ±1.0. Applied wherever two sample
/// streams (sidetone + scripted TX) need to share one output.
pub fn mix_additive(a: &[f32], b: &[f32]) -> Vec<f32> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let sa = a.get(i).copied().unwrap_or(0.0);
            let sb = b.get(i).copied().unwrap_or(0.0);
            (sa + sb).clamp(-1.0, 1.0)
        })
        .collect()
}

#[cfg(feature = "audio-cpal")]
mod cpal_backend;
#[cfg(feature = "audio-cpal")]
pub use cpal_backend::{list_devices, CpalAudioSink, CpalAudioSource};

/// Enumerate available devices, if the cpal backend is compiled in.
#[cfg(feature = "audio-cpal")]
pub fn enumerate_devices() -> Result<(Vec<String>, Vec<String>)> {
    list_devices()
}

#[cfg(not(feature = "audio-cpal"))]
pub fn enumerate_devices() -> Result<(Vec<String>, Vec<String>)> {
    Ok((Vec::new(), Vec::new()))
}

/// No-op sink: drops every block. Used for `--simulate`, tests, and as a
/// fallback when no output device is available.
pub struct NullAudioSink {
    sample_rate: u32,
}

impl NullAudioSink {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioSink for NullAudioSink {
    fn open(&mut self) -> Result<()> { Ok(()) }
    fn close(&mut self) -> Result<()> { Ok(()) }
    fn push_block(&mut self, _samples: &[f32]) {}
    fn sample_rate(&self) -> u32 { self.sample_rate }
}

/// No-op source: never produces a block. Used for `--simulate` (text-driven
/// input bypasses the decoder entirely) and tests that feed the decoder
/// directly.
pub struct NullAudioSource {
    sample_rate: u32,
}

impl NullAudioSource {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl AudioSource for NullAudioSource {
    fn open(&mut self) -> Result<()> { Ok(()) }
    fn close(&mut self) -> Result<()> { Ok(()) }
    fn poll_block(&mut self, _sink: &dyn EventSink) -> Option<Vec<f32>> { None }
    fn sample_rate(&self) -> u32 { self.sample_rate }
}

/// Build the best available output sink, falling back to `NullAudioSink`.
pub fn create_sink(sample_rate: u32, device_index: Option<usize>) -> Box<dyn AudioSink> {
    #[cfg(feature = "audio-cpal")]
    {
        match CpalAudioSink::new(device_index) {
            Ok(a) => return Box::new(a),
            Err(e) => log::warn!("cpal output init failed: {e} — using NullAudioSink"),
        }
    }
    #[cfg(not(feature = "audio-cpal"))]
    let _ = device_index;
    Box::new(NullAudioSink::new(sample_rate))
}

/// Build the best available input source, falling back to `NullAudioSource`.
pub fn create_source(sample_rate: u32, device_index: Option<usize>) -> Box<dyn AudioSource> {
    #[cfg(feature = "audio-cpal")]
    {
        match CpalAudioSource::new(device_index) {
            Ok(a) => return Box::new(a),
            Err(e) => log::warn!("cpal input init failed: {e} — using NullAudioSource"),
        }
    }
    #[cfg(not(feature = "audio-cpal"))]
    let _ = device_index;
    Box::new(NullAudioSource::new(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_clips_at_unit_amplitude() {
        let a = vec![0.8, -0.8];
        let b = vec![0.8, -0.8];
        let mixed = mix_additive(&a, &b);
        assert_eq!(mixed, vec![1.0, -1.0]);
    }
}
