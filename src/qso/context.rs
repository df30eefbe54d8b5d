// src/qso/context.rs  —  QSO context, station records, and engine output
//
// The six-state, multi-station protocol model's context record and output
// type, separated from the state-transition logic in `qso/state.rs`.

use crate::config::CqMode;
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

/// A simulated station queued after a CQ. `pending_delay_ms` is consumed
/// once its caller-line TX has been sent.
#[derive(Debug, Clone)]
pub struct Station {
    pub callsign: String,
    pub is_p2p: bool,
    pub park_ref: Option<String>,
    pub pending_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ContextFlags {
    pub use_prosigns: bool,
    pub allow_599: bool,
    pub allow_tu: bool,
}

#[derive(Debug, Clone)]
pub struct QsoContext {
    pub state: State,
    pub my_call: String,
    pub other_call: Option<String>,
    pub other_call_real: Option<String>,
    pub cq_mode: CqMode,
    pub wpm_out: u8,
    pub tone_out: f32,
    pub park_ref: Option<String>,
    pub my_park_ref: Option<String>,
    pub prosign: String,
    pub flags: ContextFlags,
}

impl QsoContext {
    pub fn new(my_call: String, flags: ContextFlags) -> Self {
        Self {
            state: State::S0,
            my_call,
            other_call: None,
            other_call_real: None,
            cq_mode: CqMode::Simple,
            wpm_out: 20,
            tone_out: 600.0,
            park_ref: None,
            my_park_ref: None,
            prosign: String::new(),
            flags,
        }
    }
}

/// One completed QSO, as exported in the session log.
#[derive(Debug, Clone)]
pub struct QsoRecord {
    pub call: String,
    pub is_p2p: bool,
    pub park_ref: Option<String>,
    pub wpm_used: u8,
    pub tone_used: f32,
}

/// Everything `QsoEngine::feed` can hand back to the runtime glue.
#[derive(Debug, Clone)]
pub enum Effect {
    TxText(String, u8, f32),
    LogEvent(Event),
    CompleteQso(QsoRecord),
    StateChange(State),
}
