// src/event.rs  —  Typed event records crossing the realtime/glue boundary
//
// Every soft error and lifecycle transition in the decoder, encoder, and
// state machine is reported here instead of via Result — the realtime path
// never raises.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: &'static str,
    pub message: String,
    pub fields: HashMap<&'static str, String>,
}

impl Event {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), fields: HashMap::new() }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.insert(key, value.into());
        self
    }
}

/// Abstract collaborator: where events go. The core never knows whether
/// that's a log line, a JSON export buffer, or a GUI status bar.
pub trait EventSink: Send {
    fn emit(&self, event: Event);
}

/// Default sink: routes to the `log` facade at a severity picked from the
/// event kind's namespace, structured and mockable rather than ad-hoc
/// `log::warn!`/`log::debug!` call sites scattered through the pipeline.
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: Event) {
        let severity = severity_for(event.kind);
        match severity {
            Severity::Info => log::info!("[{}] {}", event.kind, event.message),
            Severity::Warn => log::warn!("[{}] {}", event.kind, event.message),
            Severity::Debug => log::debug!("[{}] {}", event.kind, event.message),
        }
    }
}

enum Severity {
    Info,
    Warn,
    Debug,
}

fn severity_for(kind: &str) -> Severity {
    if kind.starts_with("config.") {
        Severity::Warn
    } else if kind == "qso_complete" || kind.starts_with("qso.state") {
        Severity::Info
    } else if kind.starts_with("qso.") || kind.starts_with("decoder.") {
        Severity::Warn
    } else {
        Severity::Debug
    }
}

/// A sink that both logs and retains a bounded history, used by the glue
/// binary to back `--export` / the `/export` simulate-mode command.
pub struct RecordingEventSink {
    inner: LoggingEventSink,
    history: std::sync::Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self { inner: LoggingEventSink, history: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.history.lock().unwrap())
    }
}

impl Default for RecordingEventSink {
    fn default() -> Self { Self::new() }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.inner.emit(event.clone());
        self.history.lock().unwrap().push(event);
    }
}

#[cfg(test)]
pub struct CollectingEventSink(pub std::sync::Mutex<Vec<Event>>);

#[cfg(test)]
impl CollectingEventSink {
    pub fn new() -> Self { Self(std::sync::Mutex::new(Vec::new())) }
    pub fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

#[cfg(test)]
impl EventSink for CollectingEventSink {
    fn emit(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}
