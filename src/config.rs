// src/config.rs  —  Runtime configuration (CLI + TOML)
use crate::error::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The example config is embedded directly in the binary at compile time.
/// Users can write it out with:  cw-qso-trainer --write-config
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config.toml.example");

// ── CLI ───────────────────────────────────────────────────────────────────────
#[derive(Parser, Debug)]
#[command(
    name = "cw-qso-trainer",
    about = "On-air CW QSO trainer — realtime decoder, sidetone encoder, scripted multi-station QSO engine",
    version,
)]
pub struct Cli {
    /// Config file path (default: ~/.config/cw-qso-trainer/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Own callsign (e.g. EA1ABC)
    #[arg(long)]
    pub my_call: Option<String>,

    /// Fallback remote call used when the station pool is empty
    #[arg(long)]
    pub other_call: Option<String>,

    /// CQ variant
    #[arg(long)]
    pub cq_mode: Option<CqMode>,

    /// Dynamic call pool file (overrides the embedded default pool)
    #[arg(long)]
    pub other_calls_file: Option<PathBuf>,

    /// POTA park references CSV
    #[arg(long)]
    pub parks_file: Option<PathBuf>,

    /// YAML file overriding the built-in validation/template rule set
    #[arg(long)]
    pub pattern_file: Option<PathBuf>,

    /// Own park reference, for P2P exchanges
    #[arg(long)]
    pub my_park_ref: Option<String>,

    /// RX decoder WPM target
    #[arg(long)]
    pub wpm_target: Option<u8>,

    /// Fixed simulator TX speed in WPM
    #[arg(long)]
    pub wpm_out: Option<u8>,

    /// Lower bound of a per-QSO random TX speed range
    #[arg(long)]
    pub wpm_out_start: Option<u8>,

    /// Upper bound of a per-QSO random TX speed range
    #[arg(long)]
    pub wpm_out_end: Option<u8>,

    /// Fixed RX tone in Hz (used when `--fixed-tone`)
    #[arg(long)]
    pub tone_hz: Option<f32>,

    /// Fixed simulator TX tone in Hz
    #[arg(long)]
    pub tone_out_hz: Option<f32>,

    /// Lower bound of a per-QSO random TX tone range
    #[arg(long)]
    pub tone_out_start_hz: Option<f32>,

    /// Upper bound of a per-QSO random TX tone range
    #[arg(long)]
    pub tone_out_end_hz: Option<f32>,

    /// Silence, in seconds, that closes a decoded message
    #[arg(long)]
    pub message_gap_sec: Option<f32>,

    /// Adaptive RX WPM tracking (default)
    #[arg(long, action)]
    pub auto_wpm: bool,
    /// Fixed RX WPM — disables adaptive tracking
    #[arg(long, action, overrides_with = "auto_wpm")]
    pub fixed_wpm: bool,

    /// Adaptive RX tone auto-detection (default)
    #[arg(long, action)]
    pub auto_tone: bool,
    /// Fixed RX tone — disables auto-detection
    #[arg(long, action, overrides_with = "auto_tone")]
    pub fixed_tone: bool,

    /// Maximum number of simulated stations queued per CQ
    #[arg(long)]
    pub max_stations: Option<u8>,

    /// Probability (0-100) that a POTA CQ draws a Park-to-Park station
    #[arg(long)]
    pub p2p_percent: Option<u8>,

    /// Probability (0-100) that, after a fully drained queue, a fresh
    /// station calls in unprompted rather than returning to S0
    #[arg(long)]
    pub incoming_call_percent: Option<u8>,

    /// Accept `599` as well as `5NN` in signal reports
    #[arg(long, action)]
    pub allow_599: bool,

    /// Accept sign-off without `TU`
    #[arg(long, action)]
    pub allow_tu: bool,

    /// Disable prosign framing in TX templates
    #[arg(long, action)]
    pub disable_prosigns: bool,

    /// Literal text keyed as the closing prosign (default AR)
    #[arg(long)]
    pub prosign_literal: Option<String>,

    /// Legacy-flow acknowledgement prefix
    #[arg(long)]
    pub s4_prefix: Option<S4Prefix>,

    /// Input source
    #[arg(long)]
    pub input_mode: Option<InputMode>,

    /// Input (microphone) device index
    #[arg(long)]
    pub input_device: Option<usize>,

    /// Output (speaker) device index
    #[arg(long)]
    pub output_device: Option<usize>,

    /// Enumerate audio devices and exit
    #[arg(long, action)]
    pub list_devices: bool,

    /// Drive the QSO from stdin text instead of audio/keyer input
    #[arg(long, action)]
    pub simulate: bool,

    /// Direct-flow exchange (default): report-reply collapses legacy S3/S4
    #[arg(long, action)]
    pub direct_flow: bool,
    /// Legacy-flow exchange: user sends the full ack including prosign
    #[arg(long, action, overrides_with = "direct_flow")]
    pub legacy_flow: bool,

    /// Write the built-in default config.toml to the config path and exit
    #[arg(long, action)]
    pub write_config: bool,

    /// Print the built-in default config.toml to stdout and exit
    #[arg(long, action)]
    pub print_config: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but warnings and errors
    #[arg(short, long, action)]
    pub quiet: bool,

    /// Export the session log as JSON to PATH on exit
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Demo mode: run a complete scripted QSO with no input required
    #[arg(long, action)]
    pub demo: bool,

    /// Effective TX speed for Farnsworth spacing — characters still keyed at
    /// wpm_out, but inter-char/word gaps stretched to this slower rate
    #[arg(long)]
    pub farnsworth_wpm: Option<u8>,
}

// ── Enums shared across CLI + TOML ────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum CqMode {
    Simple,
    Pota,
    Sota,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Audio,
    Keyboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum S4Prefix {
    R,
    Rr,
}

impl S4Prefix {
    pub fn as_str(self) -> &'static str {
        match self {
            S4Prefix::R => "R",
            S4Prefix::Rr => "RR",
        }
    }
}

// ── TOML file structure ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    pub general: Option<GeneralCfg>,
    pub decoder: Option<DecoderCfg>,
    pub encoder: Option<EncoderCfg>,
    pub qso: Option<QsoCfg>,
    pub io: Option<IoCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralCfg {
    pub my_call: Option<String>,
    pub other_call: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderCfg {
    pub wpm_target: Option<u8>,
    pub tone_hz: Option<f32>,
    pub auto_wpm: Option<bool>,
    pub auto_tone: Option<bool>,
    pub message_gap_sec: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderCfg {
    pub wpm_out: Option<u8>,
    pub wpm_out_start: Option<u8>,
    pub wpm_out_end: Option<u8>,
    pub tone_out_hz: Option<f32>,
    pub tone_out_start_hz: Option<f32>,
    pub tone_out_end_hz: Option<f32>,
    pub volume: Option<f32>,
    pub farnsworth_wpm: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QsoCfg {
    pub cq_mode: Option<CqMode>,
    pub other_calls_file: Option<PathBuf>,
    pub parks_file: Option<PathBuf>,
    pub pattern_file: Option<PathBuf>,
    pub my_park_ref: Option<String>,
    pub max_stations: Option<u8>,
    pub p2p_percent: Option<u8>,
    pub incoming_call_percent: Option<u8>,
    pub allow_599: Option<bool>,
    pub allow_tu: Option<bool>,
    pub disable_prosigns: Option<bool>,
    pub prosign_literal: Option<String>,
    pub s4_prefix: Option<S4Prefix>,
    pub direct_flow: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoCfg {
    pub input_mode: Option<InputMode>,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,
}

// ── Resolved / merged config ──────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub my_call: String,
    pub other_call: String,

    pub cq_mode: CqMode,
    pub other_calls_file: Option<PathBuf>,
    pub parks_file: Option<PathBuf>,
    pub pattern_file: Option<PathBuf>,
    pub my_park_ref: Option<String>,
    pub max_stations: u8,
    pub p2p_percent: u8,
    pub incoming_call_percent: u8,
    pub allow_599: bool,
    pub allow_tu: bool,
    pub use_prosigns: bool,
    pub prosign_literal: String,
    pub s4_prefix: S4Prefix,
    pub direct_flow: bool,

    pub wpm_target: u8,
    pub tone_hz: f32,
    pub auto_wpm: bool,
    pub auto_tone: bool,
    pub message_gap_sec: f32,

    pub wpm_out: u8,
    pub wpm_out_start: Option<u8>,
    pub wpm_out_end: Option<u8>,
    pub tone_out_hz: f32,
    pub tone_out_start_hz: Option<f32>,
    pub tone_out_end_hz: Option<f32>,
    pub volume: f32,
    pub farnsworth_wpm: Option<u8>,

    pub input_mode: InputMode,
    pub input_device: Option<usize>,
    pub output_device: Option<usize>,

    pub simulate: bool,
    pub demo: bool,
    pub export: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            my_call: "N0CALL".into(),
            other_call: "N0CALL".into(),

            cq_mode: CqMode::Simple,
            other_calls_file: None,
            parks_file: None,
            pattern_file: None,
            my_park_ref: None,
            max_stations: 3,
            p2p_percent: 0,
            incoming_call_percent: 0,
            allow_599: false,
            allow_tu: false,
            use_prosigns: true,
            prosign_literal: "AR".into(),
            s4_prefix: S4Prefix::Rr,
            direct_flow: true,

            wpm_target: 20,
            tone_hz: 700.0,
            auto_wpm: true,
            auto_tone: true,
            message_gap_sec: 1.0,

            wpm_out: 20,
            wpm_out_start: None,
            wpm_out_end: None,
            tone_out_hz: 600.0,
            tone_out_start_hz: None,
            tone_out_end_hz: None,
            volume: 0.7,
            farnsworth_wpm: None,

            input_mode: InputMode::Audio,
            input_device: None,
            output_device: None,

            simulate: false,
            demo: false,
            export: None,
        }
    }
}

// ── Config loader ─────────────────────────────────────────────────────────────
impl AppConfig {
    /// Write the embedded default config to disk. Returns the path written.
    pub fn write_default_config(cli: &Cli) -> Result<PathBuf, ConfigError> {
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.clone(),
                source,
            })?;
        }
        std::fs::write(&path, DEFAULT_CONFIG_TOML).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let fc: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            cfg.apply_file(&fc);
        }

        cfg.apply_cli(cli);
        Ok(cfg)
    }

    fn apply_file(&mut self, fc: &FileConfig) {
        if let Some(g) = &fc.general {
            if let Some(v) = &g.my_call { self.my_call = v.clone(); }
            if let Some(v) = &g.other_call { self.other_call = v.clone(); }
        }
        if let Some(d) = &fc.decoder {
            if let Some(v) = d.wpm_target { self.wpm_target = v; }
            if let Some(v) = d.tone_hz { self.tone_hz = v; }
            if let Some(v) = d.auto_wpm { self.auto_wpm = v; }
            if let Some(v) = d.auto_tone { self.auto_tone = v; }
            if let Some(v) = d.message_gap_sec { self.message_gap_sec = v; }
        }
        if let Some(e) = &fc.encoder {
            if let Some(v) = e.wpm_out { self.wpm_out = v; }
            if e.wpm_out_start.is_some() { self.wpm_out_start = e.wpm_out_start; }
            if e.wpm_out_end.is_some() { self.wpm_out_end = e.wpm_out_end; }
            if let Some(v) = e.tone_out_hz { self.tone_out_hz = v; }
            if e.tone_out_start_hz.is_some() { self.tone_out_start_hz = e.tone_out_start_hz; }
            if e.tone_out_end_hz.is_some() { self.tone_out_end_hz = e.tone_out_end_hz; }
            if let Some(v) = e.volume { self.volume = v; }
            if e.farnsworth_wpm.is_some() { self.farnsworth_wpm = e.farnsworth_wpm; }
        }
        if let Some(q) = &fc.qso {
            if let Some(v) = q.cq_mode { self.cq_mode = v; }
            if q.other_calls_file.is_some() { self.other_calls_file = q.other_calls_file.clone(); }
            if q.parks_file.is_some() { self.parks_file = q.parks_file.clone(); }
            if q.pattern_file.is_some() { self.pattern_file = q.pattern_file.clone(); }
            if q.my_park_ref.is_some() { self.my_park_ref = q.my_park_ref.clone(); }
            if let Some(v) = q.max_stations { self.max_stations = v; }
            if let Some(v) = q.p2p_percent { self.p2p_percent = v; }
            if let Some(v) = q.incoming_call_percent { self.incoming_call_percent = v; }
            if let Some(v) = q.allow_599 { self.allow_599 = v; }
            if let Some(v) = q.allow_tu { self.allow_tu = v; }
            if let Some(v) = q.disable_prosigns { self.use_prosigns = !v; }
            if let Some(v) = &q.prosign_literal { self.prosign_literal = v.clone(); }
            if let Some(v) = q.s4_prefix { self.s4_prefix = v; }
            if let Some(v) = q.direct_flow { self.direct_flow = v; }
        }
        if let Some(io) = &fc.io {
            if let Some(v) = io.input_mode { self.input_mode = v; }
            if io.input_device.is_some() { self.input_device = io.input_device; }
            if io.output_device.is_some() { self.output_device = io.output_device; }
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = &cli.my_call { self.my_call = v.clone(); }
        if let Some(v) = &cli.other_call { self.other_call = v.clone(); }
        if let Some(v) = cli.cq_mode { self.cq_mode = v; }
        if cli.other_calls_file.is_some() { self.other_calls_file = cli.other_calls_file.clone(); }
        if cli.parks_file.is_some() { self.parks_file = cli.parks_file.clone(); }
        if cli.pattern_file.is_some() { self.pattern_file = cli.pattern_file.clone(); }
        if cli.my_park_ref.is_some() { self.my_park_ref = cli.my_park_ref.clone(); }

        if let Some(v) = cli.wpm_target { self.wpm_target = v; }
        if let Some(v) = cli.wpm_out { self.wpm_out = v; }
        if cli.wpm_out_start.is_some() { self.wpm_out_start = cli.wpm_out_start; }
        if cli.wpm_out_end.is_some() { self.wpm_out_end = cli.wpm_out_end; }

        if let Some(v) = cli.tone_hz { self.tone_hz = v; }
        if let Some(v) = cli.tone_out_hz { self.tone_out_hz = v; }
        if cli.tone_out_start_hz.is_some() { self.tone_out_start_hz = cli.tone_out_start_hz; }
        if cli.tone_out_end_hz.is_some() { self.tone_out_end_hz = cli.tone_out_end_hz; }
        if cli.farnsworth_wpm.is_some() { self.farnsworth_wpm = cli.farnsworth_wpm; }

        if let Some(v) = cli.message_gap_sec { self.message_gap_sec = v; }

        if cli.fixed_wpm { self.auto_wpm = false; }
        if cli.auto_wpm { self.auto_wpm = true; }
        if cli.fixed_tone { self.auto_tone = false; }
        if cli.auto_tone { self.auto_tone = true; }

        if let Some(v) = cli.max_stations { self.max_stations = v; }
        if let Some(v) = cli.p2p_percent { self.p2p_percent = v; }
        if let Some(v) = cli.incoming_call_percent { self.incoming_call_percent = v; }
        if cli.allow_599 { self.allow_599 = true; }
        if cli.allow_tu { self.allow_tu = true; }
        if cli.disable_prosigns { self.use_prosigns = false; }
        if let Some(v) = &cli.prosign_literal { self.prosign_literal = v.clone(); }
        if let Some(v) = cli.s4_prefix { self.s4_prefix = v; }

        if cli.legacy_flow { self.direct_flow = false; }
        if cli.direct_flow { self.direct_flow = true; }

        if let Some(v) = cli.input_mode { self.input_mode = v; }
        if cli.input_device.is_some() { self.input_device = cli.input_device; }
        if cli.output_device.is_some() { self.output_device = cli.output_device; }

        if cli.simulate { self.simulate = true; }
        if cli.demo { self.demo = true; }
        if cli.export.is_some() { self.export = cli.export.clone(); }
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("cw-qso-trainer").join("config.toml")
}

fn config_dir() -> PathBuf {
    if let Ok(v) = std::env::var("XDG_CONFIG_HOME") { return PathBuf::from(v); }
    if let Ok(v) = std::env::var("APPDATA") { return PathBuf::from(v); }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home).join(".config")
}
