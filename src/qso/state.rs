// src/qso/state.rs  —  Six-state QSO protocol engine
//
// A pattern-driven, multi-station S0..S6 model. `tick` is the time-only half
// of the contract (firing scheduled station calls); `feed` is the
// message-driven half.

use super::context::{ContextFlags, Effect, QsoContext, QsoRecord, State, Station};
use super::pattern::{normalize, compact_park_ref, PatternEngine, TemplateContext};
use super::pool::{CallPool, ParkPool};
use crate::config::{AppConfig, CqMode};
use crate::event::Event;
use crate::morse::decoder::DecodedMessage;
use crate::rng::Rng;
use std::collections::HashSet;

pub struct EngineConfig {
    pub max_stations: u8,
    pub p2p_percent: u8,
    pub incoming_call_percent: u8,
    pub allow_599: bool,
    pub allow_tu: bool,
    pub use_prosigns: bool,
    pub prosign_literal: String,
    pub s4_prefix: &'static str,
    pub direct_flow: bool,
    pub default_cq_mode: CqMode,
    pub wpm_out: u8,
    pub wpm_out_range: Option<(u8, u8)>,
    pub tone_out: f32,
    pub tone_out_range: Option<(f32, f32)>,
}

impl EngineConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            max_stations: cfg.max_stations.max(1),
            p2p_percent: cfg.p2p_percent,
            incoming_call_percent: cfg.incoming_call_percent,
            allow_599: cfg.allow_599,
            allow_tu: cfg.allow_tu,
            use_prosigns: cfg.use_prosigns,
            prosign_literal: cfg.prosign_literal.clone(),
            s4_prefix: cfg.s4_prefix.as_str(),
            direct_flow: cfg.direct_flow,
            default_cq_mode: cfg.cq_mode,
            wpm_out: cfg.wpm_out,
            wpm_out_range: match (cfg.wpm_out_start, cfg.wpm_out_end) {
                (Some(a), Some(b)) => Some((a, b)),
                _ => None,
            },
            tone_out: cfg.tone_out_hz,
            tone_out_range: match (cfg.tone_out_start_hz, cfg.tone_out_end_hz) {
                (Some(a), Some(b)) => Some((a, b)),
                _ => None,
            },
        }
    }
}

pub struct QsoEngine {
    ctx: QsoContext,
    queue: Vec<Station>,
    current: Option<Station>,
    batch_elapsed_ms: u64,
    fired: HashSet<String>,
    cfg: EngineConfig,
    call_pool: Box<dyn CallPool>,
    park_pool: Box<dyn ParkPool>,
    patterns: PatternEngine,
    rng: Box<dyn Rng>,
}

impl QsoEngine {
    pub fn new(
        my_call: String,
        cfg: EngineConfig,
        call_pool: Box<dyn CallPool>,
        park_pool: Box<dyn ParkPool>,
        patterns: PatternEngine,
        rng: Box<dyn Rng>,
    ) -> Self {
        let flags = ContextFlags {
            use_prosigns: cfg.use_prosigns,
            allow_599: cfg.allow_599,
            allow_tu: cfg.allow_tu,
        };
        let mut ctx = QsoContext::new(my_call, flags);
        ctx.cq_mode = cfg.default_cq_mode;
        Self {
            ctx,
            queue: Vec::new(),
            current: None,
            batch_elapsed_ms: 0,
            fired: HashSet::new(),
            cfg,
            call_pool,
            park_pool,
            patterns,
            rng,
        }
    }

    pub fn state(&self) -> State {
        self.ctx.state
    }

    pub fn set_my_park_ref(&mut self, park_ref: Option<String>) {
        self.ctx.my_park_ref = park_ref;
    }

    /// Drains all queues, cancels context, returns to S0.
    pub fn reset(&mut self) {
        self.ctx.state = State::S0;
        self.ctx.other_call = None;
        self.ctx.other_call_real = None;
        self.ctx.park_ref = None;
        self.queue.clear();
        self.current = None;
        self.batch_elapsed_ms = 0;
        self.fired.clear();
    }

    /// Advance scheduled per-station call delays by `dt_ms`, firing any
    /// `tx.caller_call`/`tx.p2p_repeat_call` TX whose delay has elapsed.
    /// Transitions S1 → S2 once every queued station has been called.
    pub fn tick(&mut self, dt_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.ctx.state != State::S1 {
            return effects;
        }
        self.batch_elapsed_ms += dt_ms;
        for station in &mut self.queue {
            if station.pending_delay_ms > 0 && self.batch_elapsed_ms >= station.pending_delay_ms {
                station.pending_delay_ms = 0;
            }
        }
        let due: Vec<Station> = self
            .queue
            .iter()
            .filter(|s| s.pending_delay_ms == 0)
            .cloned()
            .collect();
        for station in &due {
            if self.fired.contains(&station.callsign) {
                continue;
            }
            self.fired.insert(station.callsign.clone());
            let tctx = self.station_template_ctx(station);
            let ok = if station.is_p2p {
                self.push_tx(&mut effects, "tx.p2p_repeat_call", &tctx)
                    && self.push_tx(&mut effects, "tx.p2p_repeat_ref", &tctx)
            } else {
                self.push_tx(&mut effects, "tx.caller_call", &tctx)
            };
            if !ok {
                // push_tx already dropped the context to S0 and logged why.
                return effects;
            }
        }
        if !self.queue.is_empty() && self.queue.iter().all(|s| self.fired.contains(&s.callsign)) {
            self.ctx.state = State::S2;
            effects.push(Effect::StateChange(State::S2));
        }
        effects
    }

    /// Process one decoded message against the current state.
    pub fn feed(&mut self, message: &DecodedMessage) -> Vec<Effect> {
        let normalized = normalize(&message.text);
        if normalized.is_empty() {
            return Vec::new();
        }
        match self.ctx.state {
            State::S0 => self.feed_s0(&normalized),
            State::S1 | State::S2 => self.feed_s2(&normalized),
            State::S3 | State::S4 => Vec::new(),
            State::S5 => self.feed_s5(&normalized),
            State::S6 => Vec::new(),
        }
    }

    // ── S0 ──────────────────────────────────────────────────────────────
    fn feed_s0(&mut self, text: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        let tctx = self.base_template_ctx();
        for (mode, key) in [
            (CqMode::Simple, "s0.SIMPLE"),
            (CqMode::Pota, "s0.POTA"),
            (CqMode::Sota, "s0.SOTA"),
        ] {
            match self.patterns.matches(key, text, &tctx) {
                Ok(true) => {
                    self.ctx.cq_mode = mode;
                    self.start_batch(&mut effects);
                    return effects;
                }
                Ok(false) => {}
                Err(_) => {}
            }
        }
        effects.push(Effect::LogEvent(
            Event::new("qso.unexpected_input", "no S0 rule matched").with("text", text.to_string()),
        ));
        effects
    }

    fn start_batch(&mut self, effects: &mut Vec<Effect>) {
        self.queue.clear();
        self.fired.clear();
        self.batch_elapsed_ms = 0;
        self.ctx.wpm_out = match self.cfg.wpm_out_range {
            Some((lo, hi)) if hi > lo => self.rng.gen_range_u32(lo as u32, hi as u32) as u8,
            _ => self.cfg.wpm_out,
        };
        self.ctx.tone_out = match self.cfg.tone_out_range {
            Some((lo, hi)) if hi > lo => {
                let lo_i = lo as u32;
                let hi_i = hi as u32;
                self.rng.gen_range_u32(lo_i, hi_i) as f32
            }
            _ => self.cfg.tone_out,
        };

        let n = self.rng.gen_range_u32(1, self.cfg.max_stations as u32) as usize;
        let calls = self.call_pool.sample(self.rng.as_mut(), n, &HashSet::new());
        let draw_p2p = self.ctx.cq_mode == CqMode::Pota
            && !calls.is_empty()
            && self.rng.gen_bool(self.cfg.p2p_percent as f64 / 100.0);

        for (i, call) in calls.into_iter().enumerate() {
            let delay = self.rng.gen_range_u64(0, 2000);
            let is_p2p = draw_p2p && i == 0;
            let park_ref = if is_p2p { self.park_pool.sample_ref(self.rng.as_mut()) } else { None };
            self.queue.push(Station {
                callsign: call,
                is_p2p,
                park_ref,
                pending_delay_ms: delay,
            });
        }

        self.ctx.state = State::S1;
        effects.push(Effect::StateChange(State::S1));
    }

    // ── S2 (covers pre-selection while still technically S1, and the
    // selection + report-match phase) ────────────────────────────────────
    fn feed_s2(&mut self, text: &str) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.current.is_none() {
            if let Some(stripped) = text.strip_suffix('?') {
                if let Some(pos) = self.queue.iter().position(|s| s.callsign == stripped) {
                    let station = self.queue.remove(pos);
                    let tctx = self.station_template_ctx(&station);
                    if self.push_tx(&mut effects, "tx.ack_rr", &tctx) {
                        self.select(station);
                    }
                    return effects;
                }
                let matching: Vec<Station> = self
                    .queue
                    .iter()
                    .filter(|s| s.callsign.starts_with(stripped))
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    return effects;
                }
                for station in &matching {
                    let tctx = self.station_template_ctx(station);
                    if station.is_p2p {
                        self.push_tx(&mut effects, "tx.p2p_repeat_call", &tctx);
                        self.push_tx(&mut effects, "tx.p2p_repeat_ref", &tctx);
                    } else {
                        self.push_tx(&mut effects, "tx.repeat_selected_call", &tctx);
                    }
                }
                return effects;
            }

            if let Some(pos) = self.queue.iter().position(|s| s.callsign == text) {
                let station = self.queue.remove(pos);
                self.select(station);
                return effects;
            }
        }

        // Try report/ack completion against the selected station, or — if
        // none selected yet and the queue holds exactly one station —
        // against that sole candidate (the message may carry both the
        // selection and the report at once, as in a plain SIMPLE QSO).
        let candidates: Vec<Station> = match &self.current {
            Some(s) => vec![s.clone()],
            None if self.queue.len() == 1 => vec![self.queue[0].clone()],
            None => Vec::new(),
        };

        for station in candidates {
            let tctx = self.station_template_ctx(&station);
            if station.is_p2p {
                if matches!(self.patterns.matches("s2.p2p_ack", text, &tctx), Ok(true)) {
                    if self.current.is_none() {
                        self.queue.retain(|s| s.callsign != station.callsign);
                    }
                    self.select(station);
                    return self.advance_to_park(true);
                }
                continue;
            }
            let report_key = if self.cfg.direct_flow {
                if self.cfg.allow_599 { "s2.report_require_call_allow_599" } else { "s2.report_require_call" }
            } else if self.cfg.use_prosigns {
                "legacy.s3.with_prosign"
            } else {
                "legacy.s3.without_prosign"
            };
            let no_call_key = if self.cfg.allow_599 { "s2.report_no_call_allow_599" } else { "s2.report_no_call" };
            let matched = matches!(self.patterns.matches(report_key, text, &tctx), Ok(true))
                || (self.cfg.direct_flow && matches!(self.patterns.matches(no_call_key, text, &tctx), Ok(true)));
            if matched {
                if self.current.is_none() {
                    self.queue.retain(|s| s.callsign != station.callsign);
                }
                self.select(station);
                return self.advance_to_park(false);
            }
        }

        effects.push(Effect::LogEvent(
            Event::new("qso.unexpected_input", "no S2 rule matched").with("text", text.to_string()),
        ));
        effects
    }

    fn select(&mut self, station: Station) {
        self.ctx.other_call = Some(station.callsign.clone());
        self.ctx.other_call_real = Some(station.callsign.clone());
        self.ctx.park_ref = station.park_ref.clone();
        self.current = Some(station);
    }

    fn advance_to_park(&mut self, is_p2p: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        effects.push(Effect::StateChange(State::S3));
        let tctx = self.base_template_ctx();
        let ok = if is_p2p {
            let key = if self.cfg.use_prosigns {
                "tx.p2p_station_reply_with_prosign"
            } else {
                "tx.p2p_station_reply_without_prosign"
            };
            self.push_tx(&mut effects, key, &tctx)
        } else if self.cfg.direct_flow {
            self.push_tx(&mut effects, "tx.report_reply", &tctx)
        } else {
            self.push_tx(&mut effects, "tx.legacy_ack", &tctx)
        };
        if !ok {
            return effects;
        }
        self.ctx.state = State::S5;
        effects.push(Effect::StateChange(State::S5));
        effects
    }

    // ── S5 ──────────────────────────────────────────────────────────────
    fn feed_s5(&mut self, text: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut tctx = self.base_template_ctx();
        // `tx.p2p_repeat_call`/`tx.p2p_repeat_ref` are shared with the
        // pre-selection batch-calling TX (where {CALL} is the candidate's
        // call); here the selected station's call fills the same role.
        tctx.call = self.ctx.other_call.clone();
        let is_p2p = self.current.as_ref().map(|s| s.is_p2p).unwrap_or(false);

        if is_p2p {
            if matches!(self.patterns.matches("s5.p2p_call_help", text, &tctx), Ok(true)) {
                self.push_tx(&mut effects, "tx.p2p_repeat_call", &tctx);
                return effects;
            }
            if matches!(self.patterns.matches("s5.p2p_ref_help", text, &tctx), Ok(true)) {
                self.push_tx(&mut effects, "tx.p2p_repeat_ref", &tctx);
                return effects;
            }
        }

        let key = match (is_p2p, self.cfg.use_prosigns, self.cfg.allow_tu) {
            (true, true, false) => "s5.p2p_with_prosign",
            (true, true, true) => "s5.p2p_with_prosign_allow_tu",
            (true, false, false) => "s5.p2p_without_prosign",
            (true, false, true) => "s5.p2p_without_prosign_allow_tu",
            (false, true, false) => "s5.with_prosign",
            (false, true, true) => "s5.with_prosign_allow_tu",
            (false, false, false) => "s5.without_prosign",
            (false, false, true) => "s5.without_prosign_allow_tu",
        };

        if matches!(self.patterns.matches(key, text, &tctx), Ok(true)) {
            if self.push_tx(&mut effects, "tx.sign_off", &tctx) {
                effects.extend(self.complete_and_advance());
            }
            return effects;
        }

        effects.push(Effect::LogEvent(
            Event::new("qso.unexpected_input", "no S5 rule matched").with("text", text.to_string()),
        ));
        effects
    }

    fn complete_and_advance(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(station) = self.current.take() {
            effects.push(Effect::CompleteQso(QsoRecord {
                call: station.callsign,
                is_p2p: station.is_p2p,
                park_ref: station.park_ref,
                wpm_used: self.ctx.wpm_out,
                tone_used: self.ctx.tone_out,
            }));
        }
        effects.push(Effect::StateChange(State::S6));
        self.ctx.other_call = None;
        self.ctx.other_call_real = None;
        self.ctx.park_ref = None;

        if !self.queue.is_empty() {
            let mut ok = true;
            for station in self.queue.clone() {
                let tctx = self.station_template_ctx(&station);
                let station_ok = if station.is_p2p {
                    self.push_tx(&mut effects, "tx.p2p_repeat_call", &tctx)
                        && self.push_tx(&mut effects, "tx.p2p_repeat_ref", &tctx)
                } else {
                    self.push_tx(&mut effects, "tx.caller_call", &tctx)
                };
                if !station_ok {
                    ok = false;
                    break;
                }
            }
            // On failure push_tx already dropped to S0 and logged why; only
            // the success path advances to S2.
            if ok {
                self.ctx.state = State::S2;
                effects.push(Effect::StateChange(State::S2));
            }
            return effects;
        }

        if self.rng.gen_bool(self.cfg.incoming_call_percent as f64 / 100.0) {
            let calls = self.call_pool.sample(self.rng.as_mut(), 1, &HashSet::new());
            if let Some(call) = calls.into_iter().next() {
                self.queue.push(Station {
                    callsign: call,
                    is_p2p: false,
                    park_ref: None,
                    pending_delay_ms: 0,
                });
                self.ctx.state = State::S2;
                effects.push(Effect::StateChange(State::S2));
                return effects;
            }
        }

        self.ctx.state = State::S0;
        effects.push(Effect::StateChange(State::S0));
        effects
    }

    // ── template contexts ────────────────────────────────────────────────
    fn base_template_ctx(&self) -> TemplateContext {
        let prosign = if self.cfg.use_prosigns { Some(self.cfg.prosign_literal.clone()) } else { None };
        TemplateContext {
            my_call: Some(self.ctx.my_call.clone()),
            other_call: self.ctx.other_call.clone(),
            other_call_real: self.ctx.other_call_real.clone(),
            prosign: prosign.clone(),
            tx_prosign: if self.cfg.direct_flow { prosign } else { Some(self.cfg.s4_prefix.to_string()) },
            call: None,
            park_ref: self.ctx.park_ref.as_deref().map(compact_park_ref),
            my_park_ref: self.ctx.my_park_ref.as_deref().map(compact_park_ref),
        }
    }

    fn station_template_ctx(&self, station: &Station) -> TemplateContext {
        let mut tctx = self.base_template_ctx();
        tctx.call = Some(station.callsign.clone());
        // Rules like `s2.report_require_call`/`s2.p2p_ack` reference
        // {OTHER_CALL} to mean "the candidate station under consideration",
        // which is this station even before `select()` has run.
        tctx.other_call = Some(station.callsign.clone());
        tctx.other_call_real = Some(station.callsign.clone());
        if station.park_ref.is_some() {
            tctx.park_ref = station.park_ref.as_deref().map(compact_park_ref);
        }
        tctx
    }

    /// Renders and pushes a `tx.*` template's text as a `TxText` effect.
    /// Returns `false` on a template-resolution failure, having already
    /// reset the context to S0 and pushed the matching log/state effects —
    /// callers must check the return value and skip their own subsequent
    /// state assignment when it's `false`, or they'd stomp the reset.
    fn push_tx(&mut self, effects: &mut Vec<Effect>, key: &str, tctx: &TemplateContext) -> bool {
        match self.patterns.render(key, tctx) {
            Ok(text) => {
                effects.push(Effect::TxText(text, self.ctx.wpm_out, self.ctx.tone_out));
                true
            }
            Err(_) => {
                effects.push(Effect::LogEvent(
                    Event::new("config.template_unresolved", "missing placeholder").with("key", key.to_string()),
                ));
                self.ctx.state = State::S0;
                effects.push(Effect::StateChange(State::S0));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qso::pattern::DefaultPatternProvider;
    use crate::rng::FakeRng;

    /// Deterministic stand-in for `StaticCallPool`/`FileCallPool`: hands back
    /// its list in order, ignoring `rng`, so scenario tests don't depend on
    /// the sampling shuffle.
    struct FixedCallPool(Vec<String>);

    impl FixedCallPool {
        fn new(calls: &[&str]) -> Self {
            Self(calls.iter().map(|s| s.to_string()).collect())
        }
    }

    impl CallPool for FixedCallPool {
        fn sample(&self, _rng: &mut dyn Rng, n: usize, exclude: &HashSet<String>) -> Vec<String> {
            self.0.iter().filter(|c| !exclude.contains(*c)).take(n).cloned().collect()
        }
        fn len(&self) -> usize {
            self.0.len()
        }
    }

    struct FixedParkPool(Option<String>);

    impl ParkPool for FixedParkPool {
        fn sample_ref(&self, _rng: &mut dyn Rng) -> Option<String> {
            self.0.clone()
        }
    }

    fn test_cfg(max_stations: u8, p2p_percent: u8, cq_mode: CqMode) -> EngineConfig {
        EngineConfig {
            max_stations,
            p2p_percent,
            incoming_call_percent: 0,
            allow_599: false,
            allow_tu: false,
            use_prosigns: true,
            prosign_literal: "CAVE".to_string(),
            s4_prefix: "RR",
            direct_flow: true,
            default_cq_mode: cq_mode,
            wpm_out: 20,
            wpm_out_range: None,
            tone_out: 600.0,
            tone_out_range: None,
        }
    }

    fn engine_with(
        calls: &[&str],
        park: Option<&str>,
        cfg: EngineConfig,
        rng_script: Vec<u64>,
    ) -> QsoEngine {
        let call_pool: Box<dyn CallPool> = Box::new(FixedCallPool::new(calls));
        let park_pool: Box<dyn ParkPool> = Box::new(FixedParkPool(park.map(|s| s.to_string())));
        let patterns = PatternEngine::new(Box::new(DefaultPatternProvider::new()));
        let rng: Box<dyn Rng> = Box::new(FakeRng::new(rng_script));
        let mut engine =
            QsoEngine::new("EA1ABC".to_string(), cfg, call_pool, park_pool, patterns, rng);
        engine.set_my_park_ref(Some("ES-0001".to_string()));
        engine
    }

    fn msg(text: &str) -> DecodedMessage {
        DecodedMessage { text: text.to_string() }
    }

    fn tx_texts(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::TxText(t, _, _) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn completed(effects: &[Effect]) -> Option<QsoRecord> {
        effects.iter().find_map(|e| match e {
            Effect::CompleteQso(r) => Some(r.clone()),
            _ => None,
        })
    }

    // SIMPLE CQ → close, single queued station.
    #[test]
    fn simple_cq_to_close_scenario() {
        let cfg = test_cfg(1, 0, CqMode::Simple);
        let mut engine = engine_with(&["K1ABC"], None, cfg, vec![0]);

        let effects = engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        assert_eq!(engine.state(), State::S1);
        assert!(tx_texts(&effects).is_empty());

        let effects = engine.tick(2000);
        assert_eq!(tx_texts(&effects), vec!["K1ABC K1ABC".to_string()]);
        assert_eq!(engine.state(), State::S2);

        let effects = engine.feed(&msg("K1ABC 5NN 5NN"));
        assert_eq!(tx_texts(&effects), vec!["CAVE UR 5NN 5NN TU 73 CAVE".to_string()]);
        assert_eq!(engine.state(), State::S5);

        let effects = engine.feed(&msg("CAVE 73 EE"));
        assert_eq!(tx_texts(&effects), vec!["EE".to_string()]);
        assert_eq!(engine.state(), State::S0);
        let record = completed(&effects).expect("qso_complete effect");
        assert_eq!(record.call, "K1ABC");
        assert!(!record.is_p2p);
    }

    // partial-`?` re-TXs only the matching prefix, leaves state.
    #[test]
    fn partial_question_disambiguates_without_txing_other_stations() {
        let cfg = test_cfg(3, 0, CqMode::Simple);
        let mut engine = engine_with(&["EA3IMR", "EA3XYZ", "K2AB"], None, cfg, vec![2]);

        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);
        assert_eq!(engine.state(), State::S2);

        let effects = engine.feed(&msg("EA3?"));
        let texts = tx_texts(&effects);
        assert!(texts.contains(&"EA3IMR EA3IMR".to_string()));
        assert!(texts.contains(&"EA3XYZ EA3XYZ".to_string()));
        assert!(!texts.iter().any(|t| t.contains("K2AB")));
        assert_eq!(engine.state(), State::S2);
    }

    // partial `?` with zero matches produces no TX.
    #[test]
    fn partial_question_with_no_matches_produces_no_tx() {
        let cfg = test_cfg(2, 0, CqMode::Simple);
        let mut engine = engine_with(&["EA3IMR", "EA3XYZ"], None, cfg, vec![1]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);

        let effects = engine.feed(&msg("ZZ?"));
        assert!(tx_texts(&effects).is_empty());
        assert_eq!(engine.state(), State::S2);
    }

    // a full call followed by `?` selects that station and acks.
    #[test]
    fn full_call_question_selects_and_acks() {
        let cfg = test_cfg(2, 0, CqMode::Simple);
        let mut engine = engine_with(&["EA3IMR", "EA3XYZ"], None, cfg, vec![1]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);

        let effects = engine.feed(&msg("EA3IMR?"));
        assert_eq!(tx_texts(&effects), vec!["RR".to_string()]);
        assert_eq!(engine.queue.len(), 1);
        assert_eq!(engine.current.as_ref().unwrap().callsign, "EA3IMR");
    }

    // Park-to-Park exchange end to end.
    #[test]
    fn p2p_exchange_scenario() {
        let cfg = test_cfg(1, 100, CqMode::Pota);
        let mut engine = engine_with(&["K1ABC"], Some("US-1234"), cfg, vec![0]);

        engine.feed(&msg("CQ POTA DE EA1ABC K"));
        assert_eq!(engine.state(), State::S1);
        assert!(engine.queue[0].is_p2p);

        let effects = engine.tick(2000);
        let texts = tx_texts(&effects);
        assert_eq!(texts, vec!["K1ABC K1ABC".to_string(), "US1234 US1234".to_string()]);
        assert_eq!(engine.state(), State::S2);

        let effects = engine.feed(&msg("P2P"));
        assert_eq!(
            tx_texts(&effects),
            vec!["R R K1ABC K1ABC MY REF US1234 US1234 73 CAVE".to_string()]
        );
        assert_eq!(engine.state(), State::S5);

        let effects = engine.feed(&msg("CAVE K1ABC EA1ABC MY REF ES0001 ES0001"));
        assert_eq!(tx_texts(&effects), vec!["EE".to_string()]);
        let record = completed(&effects).expect("qso_complete effect");
        assert_eq!(record.call, "K1ABC");
        assert!(record.is_p2p);
        assert_eq!(record.park_ref.as_deref(), Some("US-1234"));
    }

    // P2P help tokens re-TX without changing state.
    #[test]
    fn p2p_help_tokens_retx_without_state_change() {
        let cfg = test_cfg(1, 100, CqMode::Pota);
        let mut engine = engine_with(&["K1ABC"], Some("US-1234"), cfg, vec![0]);
        engine.feed(&msg("CQ POTA DE EA1ABC K"));
        engine.tick(2000);
        engine.feed(&msg("P2P"));
        assert_eq!(engine.state(), State::S5);

        let effects = engine.feed(&msg("CALL?"));
        assert_eq!(tx_texts(&effects), vec!["K1ABC K1ABC".to_string()]);
        assert_eq!(engine.state(), State::S5);

        let effects = engine.feed(&msg("REF?"));
        assert_eq!(tx_texts(&effects), vec!["US1234 US1234".to_string()]);
        assert_eq!(engine.state(), State::S5);
    }

    // unexpected input in S0 is ignored and logged, not transitioned.
    #[test]
    fn unexpected_input_in_s0_is_ignored() {
        let cfg = test_cfg(3, 0, CqMode::Simple);
        let mut engine = engine_with(&["K1ABC"], None, cfg, vec![0]);

        let effects = engine.feed(&msg("FOO BAR"));
        assert_eq!(engine.state(), State::S0);
        assert!(tx_texts(&effects).is_empty());
        let events: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::LogEvent(ev) => Some(ev.kind),
                _ => None,
            })
            .collect();
        assert_eq!(events, vec!["qso.unexpected_input"]);
    }

    // unmatched input never changes state, in any state.
    #[test]
    fn unexpected_input_in_s5_leaves_state_unchanged() {
        let cfg = test_cfg(1, 0, CqMode::Simple);
        let mut engine = engine_with(&["K1ABC"], None, cfg, vec![0]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);
        engine.feed(&msg("K1ABC 5NN 5NN"));
        assert_eq!(engine.state(), State::S5);

        let effects = engine.feed(&msg("GARBAGE"));
        assert_eq!(engine.state(), State::S5);
        assert!(tx_texts(&effects).is_empty());
    }

    // queued stations stay within [1, max_stations]
    // and at most one carries is_p2p, across every cq_mode.
    #[test]
    fn queue_bounds_and_single_p2p_per_batch() {
        for (mode, max_stations) in [
            (CqMode::Simple, 3u8),
            (CqMode::Pota, 4u8),
            (CqMode::Sota, 2u8),
        ] {
            let cfg = test_cfg(max_stations, 100, mode);
            let mut engine = engine_with(
                &["K1ABC", "W2XYZ", "N3DEF", "KB4GHI"],
                Some("US-1234"),
                cfg,
                vec![max_stations as u64 - 1],
            );
            let cq = match mode {
                CqMode::Simple => "CQ CQ EA1ABC EA1ABC K".to_string(),
                CqMode::Pota => "CQ POTA DE EA1ABC K".to_string(),
                CqMode::Sota => "CQ SOTA DE EA1ABC K".to_string(),
            };
            engine.feed(&msg(&cq));
            assert!(!engine.queue.is_empty());
            assert!(engine.queue.len() <= max_stations as usize);
            let p2p_count = engine.queue.iter().filter(|s| s.is_p2p).count();
            assert!(p2p_count <= 1);
        }
    }

    // p2p_%=0 never produces a P2P station.
    #[test]
    fn no_p2p_when_percent_is_zero() {
        let cfg = test_cfg(4, 0, CqMode::Pota);
        let mut engine = engine_with(&["K1ABC", "W2XYZ"], Some("US-1234"), cfg, vec![0]);
        engine.feed(&msg("CQ POTA DE EA1ABC K"));
        assert!(engine.queue.iter().all(|s| !s.is_p2p));
    }

    // outside POTA, no P2P station even if p2p_%>0.
    #[test]
    fn no_p2p_outside_pota_even_with_high_percent() {
        let cfg = test_cfg(4, 100, CqMode::Simple);
        let mut engine = engine_with(&["K1ABC", "W2XYZ"], Some("US-1234"), cfg, vec![0]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        assert!(engine.queue.iter().all(|s| !s.is_p2p));
    }

    // reset(); reset() is equivalent to reset().
    #[test]
    fn reset_is_idempotent() {
        let cfg = test_cfg(1, 0, CqMode::Simple);
        let mut engine = engine_with(&["K1ABC"], None, cfg, vec![0]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);
        engine.feed(&msg("K1ABC?"));
        assert_ne!(engine.state(), State::S0);

        engine.reset();
        let after_one = (engine.state(), engine.queue.len(), engine.current.is_none());
        engine.reset();
        let after_two = (engine.state(), engine.queue.len(), engine.current.is_none());
        assert_eq!(after_one, after_two);
        assert_eq!(engine.state(), State::S0);
    }

    // Legacy flow: the ack carries the configured `s4_prefix` prosign inline.
    #[test]
    fn legacy_flow_uses_configured_s4_prefix() {
        let mut cfg = test_cfg(1, 0, CqMode::Simple);
        cfg.direct_flow = false;
        cfg.s4_prefix = "RR";
        let mut engine = engine_with(&["K1ABC"], None, cfg, vec![0]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);
        assert_eq!(engine.state(), State::S2);

        let effects = engine.feed(&msg("CAVE RR 5NN 5NN"));
        assert_eq!(tx_texts(&effects), vec!["RR UR 5NN 5NN".to_string()]);
        assert_eq!(engine.state(), State::S5);
    }

    // a completed QSO returns to S0 when the queue is drained
    // and incoming_call_% is zero.
    #[test]
    fn drained_queue_returns_to_s0_when_no_incoming_call() {
        let cfg = test_cfg(1, 0, CqMode::Simple);
        let mut engine = engine_with(&["K1ABC"], None, cfg, vec![0]);
        engine.feed(&msg("CQ CQ EA1ABC EA1ABC K"));
        engine.tick(2000);
        engine.feed(&msg("K1ABC 5NN 5NN"));
        engine.feed(&msg("CAVE 73 EE"));
        assert_eq!(engine.state(), State::S0);
    }
}
