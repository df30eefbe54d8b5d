// src/main.rs  —  cw-qso-trainer entry point
//
// Wires the injected collaborators (AudioSource/AudioSink, Clock, Rng,
// PatternProvider, CallPool/ParkPool, EventSink) the core only knows as
// traits into the concrete runtime: cpal devices, wall-clock time, OS
// randomness, and the embedded or file-backed rule set. Config is loaded
// first, then dispatches across audio/keyboard/simulate/demo modes.

mod audio;
mod clock;
mod config;
mod error;
mod event;
mod keyer;
mod morse;
mod qso;
mod rng;

use anyhow::{Context, Result};
use clap::Parser;
use clock::{Clock, SystemClock};
use config::{AppConfig, Cli, InputMode};
use error::ConfigError;
use event::{Event, EventSink, RecordingEventSink};
use morse::decoder::{Decoder, DecoderConfig, DecodedMessage, DecoderOutput};
use morse::{encoder, Timing};
use qso::{
    CallPool, CsvParkPool, DefaultPatternProvider, Effect, EngineConfig, FileCallPool, ParkPool,
    PatternEngine, QsoEngine, StaticCallPool, StaticParkPool, YamlPatternProvider,
};
use rng::SmallRngSource;
use serde::Serialize;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SAMPLE_RATE: u32 = 44_100;
const BLOCK_SIZE: usize = 512;

#[derive(Debug, Serialize)]
struct SessionLogEntry {
    ts: u64,
    call: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    park_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p2p: Option<bool>,
    wpm_used: u8,
    tone_used: f32,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            2
        }
    };
    std::process::exit(code);
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        log::LevelFilter::Warn
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    if cli.print_config {
        print!("{}", config::DEFAULT_CONFIG_TOML);
        return Ok(0);
    }
    if cli.write_config {
        let path = AppConfig::write_default_config(&cli).context("writing default config")?;
        println!("Config written to: {}", path.display());
        println!("Edit it to set your callsign, station pool, QSO style, etc.");
        return Ok(0);
    }
    if cli.list_devices {
        let (inputs, outputs) = match audio::enumerate_devices() {
            Ok(v) => v,
            Err(e) => {
                log::error!("enumerating audio devices: {e:#}");
                return Ok(3);
            }
        };
        println!("Input devices:");
        for (i, name) in inputs.iter().enumerate() {
            println!("  [{i}] {name}");
        }
        println!("Output devices:");
        for (i, name) in outputs.iter().enumerate() {
            println!("  [{i}] {name}");
        }
        return Ok(0);
    }

    let cfg = match AppConfig::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{e:#}");
            return Ok(2);
        }
    };

    if let Err(e) = validate_device_indices(&cfg) {
        log::error!("{e:#}");
        return Ok(2);
    }

    let engine = match build_engine(&cfg) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("{e:#}");
            return Ok(2);
        }
    };

    let sink = RecordingEventSink::new();

    if cfg.demo {
        run_demo(&cfg, engine, &sink)
    } else if cfg.simulate {
        run_simulate(&cfg, engine, &sink)
    } else {
        match cfg.input_mode {
            InputMode::Audio => run_audio(&cfg, engine, &sink),
            InputMode::Keyboard => run_keyboard(&cfg, engine, &sink),
        }
    }
}

/// Bounds-checks `--input-device`/`--output-device` against the host's
/// actual device list. Skipped (not rejected) when enumeration comes back
/// empty — that means the cpal backend isn't compiled in, not that every
/// index is out of range.
fn validate_device_indices(cfg: &AppConfig) -> Result<(), ConfigError> {
    let (inputs, outputs) = audio::enumerate_devices().unwrap_or_default();
    if !outputs.is_empty() {
        if let Some(idx) = cfg.output_device {
            if idx >= outputs.len() {
                return Err(ConfigError::UnknownDevice(idx));
            }
        }
    }
    if !inputs.is_empty() && cfg.input_mode == InputMode::Audio {
        if let Some(idx) = cfg.input_device {
            if idx >= inputs.len() {
                return Err(ConfigError::UnknownDevice(idx));
            }
        }
    }
    Ok(())
}

fn build_engine(cfg: &AppConfig) -> Result<QsoEngine> {
    let call_pool: Box<dyn CallPool> = match &cfg.other_calls_file {
        Some(path) => Box::new(
            FileCallPool::load(path).with_context(|| format!("loading call pool {}", path.display()))?,
        ),
        None => Box::new(StaticCallPool::new()),
    };
    let park_pool: Box<dyn ParkPool> = match &cfg.parks_file {
        Some(path) => Box::new(
            CsvParkPool::load(path).with_context(|| format!("loading parks file {}", path.display()))?,
        ),
        None => Box::new(StaticParkPool::new()),
    };
    let patterns = match &cfg.pattern_file {
        Some(path) => match YamlPatternProvider::load(path) {
            Ok(p) => PatternEngine::new(Box::new(p)),
            Err(e) => {
                log::warn!("[config.patterns_invalid] {path:?}: {e} — falling back to built-in rules");
                PatternEngine::new(Box::new(DefaultPatternProvider::new()))
            }
        },
        None => PatternEngine::new(Box::new(DefaultPatternProvider::new())),
    };
    let rng = Box::new(SmallRngSource::from_entropy());
    let engine_cfg = EngineConfig::from_app_config(cfg);
    let mut engine = QsoEngine::new(cfg.my_call.clone(), engine_cfg, call_pool, park_pool, patterns, rng);
    engine.set_my_park_ref(cfg.my_park_ref.clone());
    Ok(engine)
}

fn tx_timing(cfg: &AppConfig, wpm: u8) -> Timing {
    match cfg.farnsworth_wpm {
        Some(eff) if eff < wpm => Timing::farnsworth(wpm, eff),
        _ => Timing::from_wpm(wpm),
    }
}

fn decoder_config(cfg: &AppConfig, sample_rate: u32) -> DecoderConfig {
    DecoderConfig {
        sample_rate,
        block_size: BLOCK_SIZE,
        auto_tone: cfg.auto_tone,
        tone_hz_rx: cfg.tone_hz,
        auto_wpm: cfg.auto_wpm,
        wpm_target: cfg.wpm_target,
        message_gap_s: cfg.message_gap_sec,
        ..DecoderConfig::default()
    }
}

/// Apply the effects of one `feed`/`tick` call: TX audio, event logging,
/// completed-QSO bookkeeping, and a status line for the operator. Every
/// `Event` — including `qso_complete`, fully fielded — passes through
/// `sink`, which is also the ring buffer `write_export` later drains.
fn apply_effects(
    cfg: &AppConfig,
    effects: Vec<Effect>,
    sink: &dyn EventSink,
    audio_sink: &mut dyn audio::AudioSink,
) {
    for effect in effects {
        match effect {
            Effect::TxText(text, wpm, tone) => {
                println!("TX: {text}  ({wpm} wpm, {tone:.0} Hz)");
                let timing = tx_timing(cfg, wpm);
                let keyed =
                    wrap_prosign_literals(&text, &[cfg.prosign_literal.as_str(), cfg.s4_prefix.as_str()]);
                let seq = encoder::encode(&keyed, &timing);
                let blocks =
                    encoder::render_blocks(&seq, tone, cfg.volume, audio_sink.sample_rate(), BLOCK_SIZE);
                for block in blocks {
                    audio_sink.push_block(&block);
                }
            }
            Effect::LogEvent(event) => {
                println!("[{}] {}", event.kind, event.message);
                sink.emit(event);
            }
            Effect::CompleteQso(record) => {
                println!(
                    "QSO complete: {}{}{}",
                    record.call,
                    if record.is_p2p { " (P2P)" } else { "" },
                    record.park_ref.as_deref().map(|r| format!(" {r}")).unwrap_or_default(),
                );
                let mut event = Event::new("qso_complete", format!("worked {}", record.call))
                    .with("ts", unix_ms().to_string())
                    .with("call", record.call)
                    .with("wpm_used", record.wpm_used.to_string())
                    .with("tone_used", record.tone_used.to_string());
                if record.is_p2p {
                    event = event.with("p2p", "true");
                }
                if let Some(park_ref) = record.park_ref {
                    event = event.with("park_ref", park_ref);
                }
                sink.emit(event);
            }
            Effect::StateChange(state) => {
                log::info!("[qso.state] -> {state:?}");
            }
        }
    }
}

/// A `--prosign-literal`/`--s4-prefix` word keyed into a rendered TX string
/// isn't delimited by `<...>` the way `encoder::encode` otherwise recognizes
/// a prosign, since the pattern templates splice it in as plain text (so
/// the printed/logged TX line reads exactly as the worked examples show,
/// with no angle brackets). Wrap each whole-word occurrence before handing
/// the text to the encoder so it's still keyed with no inter-letter gap.
fn wrap_prosign_literals(text: &str, literals: &[&str]) -> String {
    text.split(' ')
        .map(|word| {
            if literals.contains(&word) {
                format!("<{word}>")
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn unix_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Builds the session log by draining `sink`'s ring buffer for `qso_complete`
/// events and reshaping their fields back into `SessionLogEntry` records.
fn write_export(path: &std::path::Path, sink: &RecordingEventSink) -> Result<()> {
    let entries: Vec<SessionLogEntry> = sink
        .drain()
        .into_iter()
        .filter(|e| e.kind == "qso_complete")
        .map(|e| SessionLogEntry {
            ts: e.fields.get("ts").and_then(|v| v.parse().ok()).unwrap_or(0),
            call: e.fields.get("call").cloned().unwrap_or_default(),
            park_ref: e.fields.get("park_ref").cloned(),
            p2p: e.fields.get("p2p").map(|_| true),
            wpm_used: e.fields.get("wpm_used").and_then(|v| v.parse().ok()).unwrap_or(0),
            tone_used: e.fields.get("tone_used").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        })
        .collect();
    let json = serde_json::to_string_pretty(&entries).context("serializing session log")?;
    std::fs::write(path, json).with_context(|| format!("writing session log {}", path.display()))?;
    Ok(())
}

// ── --demo ────────────────────────────────────────────────────────────────
fn run_demo(cfg: &AppConfig, mut engine: QsoEngine, sink: &RecordingEventSink) -> Result<i32> {
    println!("-- demo QSO --");
    let mut audio_sink = audio::NullAudioSink::new(SAMPLE_RATE);

    let cq = match cfg.cq_mode {
        config::CqMode::Simple => format!("CQ CQ {0} {0} K", cfg.my_call),
        config::CqMode::Pota => format!("CQ POTA DE {} K", cfg.my_call),
        config::CqMode::Sota => format!("CQ SOTA DE {} K", cfg.my_call),
    };
    apply_effects(cfg, engine.feed(&DecodedMessage { text: cq }), sink, &mut audio_sink);
    for _ in 0..20 {
        apply_effects(cfg, engine.tick(200), sink, &mut audio_sink);
    }

    let report = if cfg.allow_599 { "599 599" } else { "5NN 5NN" };
    apply_effects(
        cfg,
        engine.feed(&DecodedMessage { text: report.to_string() }),
        sink,
        &mut audio_sink,
    );
    let signoff = if cfg.use_prosigns {
        format!("{} 73 EE", cfg.prosign_literal)
    } else {
        "73 EE".to_string()
    };
    apply_effects(cfg, engine.feed(&DecodedMessage { text: signoff }), sink, &mut audio_sink);

    if let Some(path) = &cfg.export {
        write_export(path, sink)?;
        println!("Session log written to {}", path.display());
    }
    Ok(0)
}

// ── --simulate ───────────────────────────────────────────────────────────
fn run_simulate(cfg: &AppConfig, mut engine: QsoEngine, sink: &RecordingEventSink) -> Result<i32> {
    println!("Simulate mode — type protocol text directly; /reset, /export, /quit");
    let mut audio_sink = audio::NullAudioSink::new(SAMPLE_RATE);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/quit" => break,
            "/reset" => {
                engine.reset();
                println!("(reset to S0)");
                continue;
            }
            "/export" => {
                if let Some(path) = &cfg.export {
                    write_export(path, sink)?;
                    println!("Session log written to {}", path.display());
                } else {
                    println!("(no --export path configured)");
                }
                continue;
            }
            _ => {}
        }
        apply_effects(cfg, engine.feed(&DecodedMessage { text: line.to_string() }), sink, &mut audio_sink);
        apply_effects(cfg, engine.tick(2000), sink, &mut audio_sink);
    }

    if let Some(path) = &cfg.export {
        write_export(path, sink)?;
    }
    Ok(0)
}

// ── keyboard input mode ──────────────────────────────────────────────────
// No hardware paddle is attached; two keyboard keys stand in for the
// dit/dah paddles and drive the same `IambicKeyer` a real paddle adapter
// would. Each keyed element is rendered to PCM and fed both to the output
// sink (sidetone) and directly into a live `Decoder` (self-loopback), so
// the rest of the pipeline sees the operator's own keying exactly as it
// would see a microphone.
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

const KEYER_TICK_MS: f64 = 5.0;

fn run_keyboard(cfg: &AppConfig, mut engine: QsoEngine, sink: &RecordingEventSink) -> Result<i32> {
    use crossterm::event::KeyCode;
    use keyer::keyboard::{KeyboardKeyer, KeyboardPaddle, TerminalPaddleReader, PaddleKeyEvent};
    use keyer::{IambicKeyer, KeyerEvent, KeyerInput, Symbol};

    println!("Keyboard paddle mode — hold Left Arrow for dit, Right Arrow for dah, Esc to quit");
    crossterm::terminal::enable_raw_mode().context("enabling raw terminal mode for paddle input")?;
    let _raw_guard = RawModeGuard;

    let paddle = KeyboardPaddle::new();
    let mut reader = TerminalPaddleReader::new(paddle.clone(), KeyCode::Left, KeyCode::Right);
    let mut keyer_input = KeyboardKeyer::new(paddle);
    let timing = Timing::from_wpm(cfg.wpm_target);
    let mut iambic = IambicKeyer::new(timing);

    let mut audio_sink = audio::create_sink(SAMPLE_RATE, cfg.output_device);
    let _ = audio_sink.open();
    let mut decoder = Decoder::new(decoder_config(cfg, SAMPLE_RATE));

    let tick_dur = std::time::Duration::from_millis(KEYER_TICK_MS as u64);
    loop {
        if matches!(reader.poll(), Some(PaddleKeyEvent::Quit)) {
            break;
        }
        let paddle_state = keyer_input.poll();
        match iambic.tick(paddle_state, KEYER_TICK_MS) {
            Some(KeyerEvent::KeyDown(sym)) => {
                let dur = match sym {
                    Symbol::Dit => timing.dit,
                    Symbol::Dah => timing.dah,
                };
                let samples = encoder::render(&vec![(true, dur)], cfg.tone_hz, cfg.volume, SAMPLE_RATE);
                feed_live(cfg, &samples, audio_sink.as_mut(), &mut decoder, sink, &mut engine);
            }
            Some(KeyerEvent::KeyUp) => {
                let samples = encoder::render(&vec![(false, timing.elem_gap)], cfg.tone_hz, cfg.volume, SAMPLE_RATE);
                feed_live(cfg, &samples, audio_sink.as_mut(), &mut decoder, sink, &mut engine);
            }
            None if iambic.is_idle() => {
                let n = (KEYER_TICK_MS / 1000.0 * SAMPLE_RATE as f64) as usize;
                let silence = vec![0.0f32; n];
                feed_live(cfg, &silence, audio_sink.as_mut(), &mut decoder, sink, &mut engine);
            }
            None => {}
        }
        std::thread::sleep(tick_dur);
    }

    if let Some(path) = &cfg.export {
        write_export(path, sink)?;
    }
    Ok(0)
}

/// Push one chunk of already-rendered PCM to the sidetone output and to the
/// decoder's own input path, applying any effects a completed `DecodedMessage`
/// triggers and advancing the state machine's timers by the chunk's duration.
fn feed_live(
    cfg: &AppConfig,
    samples: &[f32],
    audio_sink: &mut dyn audio::AudioSink,
    decoder: &mut Decoder,
    sink: &RecordingEventSink,
    engine: &mut QsoEngine,
) {
    for block in samples.chunks(BLOCK_SIZE) {
        audio_sink.push_block(block);
        for out in decoder.push_block(block, sink) {
            if let DecoderOutput::Message(msg) = out {
                println!("RX: {}", msg.text);
                apply_effects(cfg, engine.feed(&msg), sink, audio_sink);
            }
        }
    }
    let dt_ms = (samples.len() as u64 * 1000) / SAMPLE_RATE as u64;
    apply_effects(cfg, engine.tick(dt_ms), sink, audio_sink);
}

// ── audio input mode ──────────────────────────────────────────────────────
fn run_audio(cfg: &AppConfig, mut engine: QsoEngine, sink: &RecordingEventSink) -> Result<i32> {
    let mut audio_source = audio::create_source(SAMPLE_RATE, cfg.input_device);
    let mut audio_sink = audio::create_sink(SAMPLE_RATE, cfg.output_device);
    if audio_source.open().is_err() || audio_sink.open().is_err() {
        log::error!("failed to open an audio device");
        return Ok(3);
    }

    let mut decoder = Decoder::new(decoder_config(cfg, audio_source.sample_rate()));
    println!("Listening... (Ctrl-C to stop)");

    // Station call delays and message_gap_s are real-world waits, not audio
    // sample counts, so the engine's clock ticks off wall time rather than
    // the block size the audio backend happens to deliver.
    let clock = SystemClock::new();
    let mut last_tick_ms = clock.now_ms();

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    while !stop.load(Ordering::SeqCst) {
        match audio_source.poll_block(sink) {
            Some(block) => {
                for out in decoder.push_block(&block, sink) {
                    match out {
                        DecoderOutput::Token(tok) => {
                            log::debug!("[decoder] char={} wpm_est={:.1}", tok.ch, tok.wpm_est);
                        }
                        DecoderOutput::Message(msg) => {
                            println!("RX: {}", msg.text);
                            apply_effects(cfg, engine.feed(&msg), sink, audio_sink.as_mut());
                        }
                    }
                }
                let now_ms = clock.now_ms();
                let dt_ms = now_ms.saturating_sub(last_tick_ms);
                last_tick_ms = now_ms;
                apply_effects(cfg, engine.tick(dt_ms), sink, audio_sink.as_mut());
            }
            None => std::thread::sleep(std::time::Duration::from_millis(5)),
        }
    }

    println!("\nStopping...");
    if let Some(path) = &cfg.export {
        write_export(path, sink)?;
        println!("Session log written to {}", path.display());
    }
    let _ = audio_source.close();
    let _ = audio_sink.close();
    Ok(130)
}
