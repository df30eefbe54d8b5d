// src/keyer/keyboard.rs  —  Software paddle: two held keys stand in for a
// physical dit/dah paddle. Shared, lock-free hold-state set by the UI/input
// layer (e.g. keydown/keyup handlers) and read by the keyer-poll loop.

use super::{KeyerInput, PaddleState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct KeyboardPaddle {
    dit: Arc<AtomicBool>,
    dah: Arc<AtomicBool>,
}

impl KeyboardPaddle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dit(&self, held: bool) {
        self.dit.store(held, Ordering::Relaxed);
    }

    pub fn set_dah(&self, held: bool) {
        self.dah.store(held, Ordering::Relaxed);
    }
}

pub struct KeyboardKeyer {
    paddle: KeyboardPaddle,
}

impl KeyboardKeyer {
    pub fn new(paddle: KeyboardPaddle) -> Self {
        Self { paddle }
    }
}

impl KeyerInput for KeyboardKeyer {
    fn name(&self) -> &str {
        "Keyboard"
    }

    fn poll(&mut self) -> PaddleState {
        PaddleState {
            dit_held: self.paddle.dit.load(Ordering::Relaxed),
            dah_held: self.paddle.dah.load(Ordering::Relaxed),
        }
    }
}

/// Terminals rarely report a key-up event outside the kitty keyboard
/// protocol; when one does arrive it's honored directly, otherwise a paddle
/// is considered released once no matching Press has refreshed it within
/// `DECAY` — the terminal's own key-repeat keeps a physically-held key
/// refreshed faster than that.
const DECAY: std::time::Duration = std::time::Duration::from_millis(150);

pub enum PaddleKeyEvent {
    Quit,
}

/// Drains pending terminal key events into `paddle`'s hold-state and applies
/// the release decay. Must be polled every few ms from the keying loop.
pub struct TerminalPaddleReader {
    paddle: KeyboardPaddle,
    dit_key: crossterm::event::KeyCode,
    dah_key: crossterm::event::KeyCode,
    last_dit: Option<std::time::Instant>,
    last_dah: Option<std::time::Instant>,
}

impl TerminalPaddleReader {
    pub fn new(
        paddle: KeyboardPaddle,
        dit_key: crossterm::event::KeyCode,
        dah_key: crossterm::event::KeyCode,
    ) -> Self {
        Self { paddle, dit_key, dah_key, last_dit: None, last_dah: None }
    }

    pub fn poll(&mut self) -> Option<PaddleKeyEvent> {
        use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

        let mut quit = false;
        while event::poll(std::time::Duration::from_millis(0)).unwrap_or(false) {
            let Ok(Event::Key(key)) = event::read() else { continue };
            if key.code == KeyCode::Esc
                || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
            {
                quit = true;
                continue;
            }
            let released = key.kind == KeyEventKind::Release;
            if key.code == self.dit_key {
                self.paddle.set_dit(!released);
                self.last_dit = if released { None } else { Some(std::time::Instant::now()) };
            } else if key.code == self.dah_key {
                self.paddle.set_dah(!released);
                self.last_dah = if released { None } else { Some(std::time::Instant::now()) };
            }
        }
        self.apply_decay();
        if quit { Some(PaddleKeyEvent::Quit) } else { None }
    }

    fn apply_decay(&mut self) {
        if self.last_dit.is_some_and(|t| t.elapsed() > DECAY) {
            self.paddle.set_dit(false);
            self.last_dit = None;
        }
        if self.last_dah.is_some_and(|t| t.elapsed() > DECAY) {
            self.paddle.set_dah(false);
            self.last_dah = None;
        }
    }
}
