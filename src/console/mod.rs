//! Console I/O collaborators.
//!
//! The engine never touches stdin or stdout directly. Everything goes
//! through the [`Console`] trait:
//! - [`BufferedConsole`]: scripted input and captured output, for tests
//! - [`PipedConsole`]: a reader thread over stdin, for redirected input
//! - `TerminalConsole`: a raw-mode terminal (feature `terminal`)

mod piped;
#[cfg(feature = "terminal")]
mod terminal;

pub use piped::PipedConsole;
#[cfg(feature = "terminal")]
pub use terminal::{RawModeGuard, TerminalConsole};

use std::collections::VecDeque;

/// Byte reported when input has ended or could not be read.
pub const EOF_BYTE: u8 = 0xFF;

/// A character console attached to the simulated machine.
pub trait Console {
    /// Non-blocking check for pending input.
    fn poll_input(&mut self) -> bool;

    /// Blocking read of the next input byte.
    fn read_byte(&mut self) -> u8;

    /// Write one byte of output.
    fn write_byte(&mut self, byte: u8);

    /// Flush buffered output.
    fn flush(&mut self);

    /// Drain out-of-band events without consuming input.
    ///
    /// Called by the engine between instructions so a console can notice a
    /// cancel key even while the program never reads the keyboard.
    fn poll_events(&mut self) {}

    /// Write every byte of `bytes`.
    fn write_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }
}

impl<C: Console + ?Sized> Console for Box<C> {
    fn poll_input(&mut self) -> bool {
        (**self).poll_input()
    }

    fn read_byte(&mut self) -> u8 {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte)
    }

    fn flush(&mut self) {
        (**self).flush()
    }

    fn poll_events(&mut self) {
        (**self).poll_events()
    }
}

impl<C: Console + ?Sized> Console for &mut C {
    fn poll_input(&mut self) -> bool {
        (**self).poll_input()
    }

    fn read_byte(&mut self) -> u8 {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte)
    }

    fn flush(&mut self) {
        (**self).flush()
    }

    fn poll_events(&mut self) {
        (**self).poll_events()
    }
}

/// A console that reads from an input queue and writes to an output buffer.
///
/// Reading past the end of the input yields [`EOF_BYTE`].
#[derive(Debug, Clone, Default)]
pub struct BufferedConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
    flushes: usize,
}

impl BufferedConsole {
    /// Create a console with no pending input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a console with `input` queued.
    pub fn with_input(input: impl AsRef<[u8]>) -> Self {
        Self {
            input: input.as_ref().iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Queue more input.
    pub fn push_input(&mut self, input: impl AsRef<[u8]>) {
        self.input.extend(input.as_ref());
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// The output as (lossy) UTF-8.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Input not yet consumed.
    pub fn remaining_input(&self) -> usize {
        self.input.len()
    }

    /// Number of times `flush` was called.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl Console for BufferedConsole {
    fn poll_input(&mut self) -> bool {
        !self.input.is_empty()
    }

    fn read_byte(&mut self) -> u8 {
        self.input.pop_front().unwrap_or(EOF_BYTE)
    }

    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}
