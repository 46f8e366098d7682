//! Raw-mode terminal console.
//!
//! Keys are read through crossterm events so that input is visible to the
//! machine as soon as it is typed, without line buffering or echo.

use super::{Console, EOF_BYTE};
use crate::cpu::InterruptFlag;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::collections::VecDeque;
use std::io::{self, Stdout, Write};
use std::time::Duration;

/// Raw mode for the lifetime of the guard.
///
/// Acquire it once at startup; dropping it restores the terminal on every
/// exit path that unwinds through its owner.
#[derive(Debug)]
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Switch the terminal into raw mode.
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        tracing::debug!("raw mode enabled");
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal");
        } else {
            tracing::debug!("raw mode disabled");
        }
    }
}

/// Console on an interactive terminal in raw mode.
///
/// Ctrl-C is not delivered as a signal in raw mode; it raises the
/// engine's [`InterruptFlag`] instead. Keys seen while draining events are
/// queued until the program reads them.
pub struct TerminalConsole {
    out: Stdout,
    pending: VecDeque<u8>,
    interrupt: InterruptFlag,
}

impl TerminalConsole {
    /// Create a console that raises `interrupt` on Ctrl-C.
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self {
            out: io::stdout(),
            pending: VecDeque::new(),
            interrupt,
        }
    }

    /// Handle one terminal event, returning the byte it produces if any.
    fn accept(&mut self, ev: Event) -> Option<u8> {
        match ev {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                let byte = key_to_byte(key)?;
                if byte == CTRL_C {
                    tracing::info!("interrupt requested from keyboard");
                    self.interrupt.raise();
                }
                Some(byte)
            }
            _ => None,
        }
    }

    /// Move every ready event into the input queue without blocking.
    fn drain_events(&mut self) {
        loop {
            match event::poll(Duration::ZERO) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if let Some(byte) = self.accept(ev) {
                            self.pending.push_back(byte);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "console input failed");
                        return;
                    }
                },
                Ok(false) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "console poll failed");
                    return;
                }
            }
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Err(e) = self.out.write_all(bytes) {
            tracing::warn!(error = %e, "console output failed");
        }
    }
}

const CTRL_C: u8 = 0x03;

/// Translate a key press into the byte an LC-3 program expects.
pub(crate) fn key_to_byte(key: KeyEvent) -> Option<u8> {
    match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            c.is_ascii_alphabetic().then(|| (c.to_ascii_lowercase() as u8) & 0x1F)
        }
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(b'\n'),
        KeyCode::Backspace => Some(0x08),
        KeyCode::Tab => Some(b'\t'),
        KeyCode::Esc => Some(0x1B),
        _ => None,
    }
}

impl Console for TerminalConsole {
    fn poll_input(&mut self) -> bool {
        if self.pending.is_empty() {
            self.drain_events();
        }
        !self.pending.is_empty()
    }

    fn read_byte(&mut self) -> u8 {
        if let Some(b) = self.pending.pop_front() {
            return b;
        }
        loop {
            match event::read() {
                Ok(ev) => {
                    if let Some(b) = self.accept(ev) {
                        return b;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "console input failed");
                    return EOF_BYTE;
                }
            }
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // Raw mode turns off output post-processing.
        if byte == b'\n' {
            self.emit(b"\r\n");
        } else {
            self.emit(&[byte]);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "console flush failed");
        }
    }

    fn poll_events(&mut self) {
        self.drain_events();
    }
}

impl std::fmt::Debug for TerminalConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalConsole")
            .field("pending", &self.pending.len())
            .finish()
    }
}
