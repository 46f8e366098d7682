//! LC-3 memory subsystem.
//!
//! 65536 sixteen-bit cells. Every address is valid, so address arithmetic
//! wraps and no access ever faults. Two cells are memory-mapped keyboard
//! registers:
//! - KBSR (0xFE00): bit 15 set when a key is ready
//! - KBDR (0xFE02): the ready key

use crate::console::Console;

/// The number of memory cells.
pub const MEMORY_SIZE: usize = 1 << 16;

/// Keyboard status register.
pub const KBSR: u16 = 0xFE00;

/// Keyboard data register.
pub const KBDR: u16 = 0xFE02;

/// KBSR ready bit.
pub const KBSR_READY: u16 = 1 << 15;

/// LC-3 memory: 65536 sixteen-bit cells.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    cells: Vec<u16>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Read a cell as the CPU sees it.
    ///
    /// Reading KBSR polls `console` without blocking and refreshes both
    /// keyboard registers first. Every other address is a plain load.
    pub fn read<C: Console + ?Sized>(&mut self, addr: u16, console: &mut C) -> u16 {
        if addr == KBSR {
            if console.poll_input() {
                self.cells[KBSR as usize] = KBSR_READY;
                self.cells[KBDR as usize] = u16::from(console.read_byte());
            } else {
                self.cells[KBSR as usize] = 0;
            }
        }
        self.cells[addr as usize]
    }

    /// Read a cell without device side effects.
    #[inline]
    pub fn peek(&self, addr: u16) -> u16 {
        self.cells[addr as usize]
    }

    /// Store a cell.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u16) {
        self.cells[addr as usize] = value;
    }

    /// Copy `words` into memory starting at `origin`.
    ///
    /// Words that would land past 0xFFFF are dropped. Returns the number of
    /// words stored.
    pub fn load(&mut self, origin: u16, words: &[u16]) -> usize {
        let start = origin as usize;
        let room = MEMORY_SIZE - start;
        let count = words.len().min(room);
        if count < words.len() {
            tracing::warn!(
                dropped = words.len() - count,
                "image at {:#06x} runs past the end of memory; truncated",
                origin
            );
        }
        self.cells[start..start + count].copy_from_slice(&words[..count]);
        count
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count non-zero cells
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}
