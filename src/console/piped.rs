//! Console over plain stdin/stdout.
//!
//! Used when stdin is not a terminal (redirected file or pipe). A reader
//! thread forwards stdin byte by byte over a channel so that
//! [`Console::poll_input`] can stay non-blocking.

use super::{Console, EOF_BYTE};
use crate::cpu::InterruptFlag;
use crossbeam_channel as cbc;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

/// How long a blocking read waits before rechecking the interrupt flag.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Console reading from a background stdin thread.
pub struct PipedConsole {
    input: cbc::Receiver<u8>,
    pending: Option<u8>,
    output: Box<dyn Write + Send>,
    interrupt: Option<InterruptFlag>,
}

impl PipedConsole {
    /// Spawn the stdin reader and write output to stdout.
    pub fn stdio() -> io::Result<Self> {
        Self::spawn(io::stdin(), Box::new(io::stdout()))
    }

    /// Spawn a reader thread over `reader`, writing output to `output`.
    pub fn spawn<R>(reader: R, output: Box<dyn Write + Send>) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = cbc::unbounded();
        thread::Builder::new()
            .name("lc3-stdin".into())
            .spawn(move || {
                for byte in reader.bytes() {
                    match byte {
                        Ok(b) => {
                            if tx.send(b).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "console input failed");
                            break;
                        }
                    }
                }
                tracing::debug!("console input closed");
            })?;

        Ok(Self {
            input: rx,
            pending: None,
            output,
            interrupt: None,
        })
    }

    /// Abandon a blocking read once `interrupt` is raised.
    ///
    /// The read then reports [`EOF_BYTE`] and the engine stops at the next
    /// cycle boundary.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = Some(interrupt);
        self
    }
}

impl Console for PipedConsole {
    fn poll_input(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = self.input.try_recv().ok();
        }
        self.pending.is_some()
    }

    fn read_byte(&mut self) -> u8 {
        if let Some(b) = self.pending.take() {
            return b;
        }
        let Some(interrupt) = &self.interrupt else {
            return self.input.recv().unwrap_or(EOF_BYTE);
        };
        loop {
            match self.input.recv_timeout(READ_SLICE) {
                Ok(b) => return b,
                Err(cbc::RecvTimeoutError::Timeout) if !interrupt.is_raised() => {}
                Err(_) => return EOF_BYTE,
            }
        }
    }

    fn write_byte(&mut self, byte: u8) {
        if let Err(e) = self.output.write_all(&[byte]) {
            tracing::warn!(error = %e, "console output failed");
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.output.flush() {
            tracing::warn!(error = %e, "console flush failed");
        }
    }
}

impl std::fmt::Debug for PipedConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipedConsole")
            .field("pending", &self.pending)
            .field("queued", &self.input.len())
            .finish()
    }
}
