// src/audio/cpal_backend.rs  —  cpal input/output backends
//
// The sink accepts pre-rendered blocks (already shaped by
// `morse::encoder::render`, already mixed) and the source hands back
// captured mic blocks for the decoder. Both sides use a bounded queue so the
// realtime callback never blocks or allocates — on overrun the oldest data
// is dropped rather than stalling the audio thread.

use super::{AudioSink, AudioSource};
use crate::event::{Event, EventSink};
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MAX_QUEUED_BLOCKS: usize = 64;

struct SinkQueue {
    samples: VecDeque<f32>,
}

pub struct CpalAudioSink {
    queue: Arc<Mutex<SinkQueue>>,
    sample_rate: u32,
    _stream: Stream,
}

unsafe impl Send for CpalAudioSink {}

impl CpalAudioSink {
    pub fn new(device_index: Option<usize>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_index {
            Some(i) => host
                .output_devices()?
                .nth(i)
                .ok_or_else(|| anyhow!("no output device at index {i}"))?,
            None => host
                .default_output_device()
                .ok_or_else(|| anyhow!("no default output device"))?,
        };
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;

        let queue = Arc::new(Mutex::new(SinkQueue { samples: VecDeque::new() }));
        let q = Arc::clone(&queue);
        let stream = match config.sample_format() {
            SampleFormat::F32 => build_output_stream::<f32>(&device, &config.into(), q)?,
            SampleFormat::I16 => build_output_stream::<i16>(&device, &config.into(), q)?,
            SampleFormat::U16 => build_output_stream::<u16>(&device, &config.into(), q)?,
            fmt => return Err(anyhow!("unsupported output sample format {fmt:?}")),
        };
        stream.play()?;
        Ok(Self { queue, sample_rate, _stream: stream })
    }
}

fn build_output_stream<S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<SinkQueue>>,
) -> Result<Stream>
where
    S: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let ch = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [S], _: &cpal::OutputCallbackInfo| {
            let mut q = queue.lock().unwrap();
            for frame in data.chunks_mut(ch) {
                let sample = q.samples.pop_front().unwrap_or(0.0);
                let out = S::from_sample(sample);
                for smp in frame.iter_mut() {
                    *smp = out;
                }
            }
        },
        |e| log::error!("audio output error: {e}"),
        None,
    )?;
    Ok(stream)
}

impl AudioSink for CpalAudioSink {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut q = self.queue.lock().unwrap();
        q.samples.clear();
        Ok(())
    }

    fn push_block(&mut self, samples: &[f32]) {
        let mut q = self.queue.lock().unwrap();
        q.samples.extend(samples.iter().copied());
        let cap = MAX_QUEUED_BLOCKS * samples.len().max(1);
        while q.samples.len() > cap {
            q.samples.pop_front();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

struct SourceQueue {
    blocks: VecDeque<Vec<f32>>,
    overruns: u64,
}

pub struct CpalAudioSource {
    queue: Arc<Mutex<SourceQueue>>,
    sample_rate: u32,
    _stream: Stream,
}

unsafe impl Send for CpalAudioSource {}

impl CpalAudioSource {
    pub fn new(device_index: Option<usize>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_index {
            Some(i) => host
                .input_devices()?
                .nth(i)
                .ok_or_else(|| anyhow!("no input device at index {i}"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("no default input device"))?,
        };
        let config = device.default_input_config()?;
        let sample_rate = config.sample_rate().0;

        let queue = Arc::new(Mutex::new(SourceQueue { blocks: VecDeque::new(), overruns: 0 }));
        let q = Arc::clone(&queue);
        let stream = match config.sample_format() {
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config.into(), q)?,
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config.into(), q)?,
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config.into(), q)?,
            fmt => return Err(anyhow!("unsupported input sample format {fmt:?}")),
        };
        stream.play()?;
        Ok(Self { queue, sample_rate, _stream: stream })
    }
}

fn build_input_stream<S>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<SourceQueue>>,
) -> Result<Stream>
where
    S: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<S>,
{
    let ch = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[S], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(ch)
                .map(|frame| f32::from_sample(frame[0]))
                .collect();
            let mut q = queue.lock().unwrap();
            q.blocks.push_back(mono);
            while q.blocks.len() > MAX_QUEUED_BLOCKS {
                q.blocks.pop_front();
                q.overruns += 1;
            }
        },
        |e| log::error!("audio input error: {e}"),
        None,
    )?;
    Ok(stream)
}

/// List available input/output device names, in the index order `--input-
/// device`/`--output-device` select against.
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()?
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect();
    let outputs = host
        .output_devices()?
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect();
    Ok((inputs, outputs))
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut q = self.queue.lock().unwrap();
        q.blocks.clear();
        Ok(())
    }

    fn poll_block(&mut self, sink: &dyn EventSink) -> Option<Vec<f32>> {
        let mut q = self.queue.lock().unwrap();
        if q.overruns > 0 {
            let dropped = q.overruns;
            log::warn!("audio input overrun, dropped {dropped} block(s)");
            sink.emit(
                Event::new("decoder.overrun", format!("dropped {dropped} block(s)"))
                    .with("blocks_dropped", dropped.to_string()),
            );
            q.overruns = 0;
        }
        q.blocks.pop_front()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
