//! Trap service routines.
//!
//! The LC-3 TRAP instruction carries an 8-bit vector. The six standard
//! vectors are serviced here directly instead of jumping through the trap
//! table in low memory; TRAP itself saves no linkage.

use crate::console::Console;
use crate::cpu::execute::{Cpu, CpuError, CpuState};
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::registers::Reg;
use serde::{Serialize, Deserialize};

/// Prompt printed by the IN routine.
pub const IN_PROMPT: &str = "Enter a character: ";

/// Notice printed by the HALT routine.
pub const HALT_NOTICE: &str = "HALT\n";

/// The standard trap vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrapVector {
    /// Read one character into R0, no echo
    Getc = 0x20,
    /// Write the character in R0
    Out = 0x21,
    /// Write the string at R0, one character per word
    Puts = 0x22,
    /// Prompt, read one character into R0 and echo it
    In = 0x23,
    /// Write the string at R0, two characters per word
    Putsp = 0x24,
    /// Stop the machine
    Halt = 0x25,
}

impl TrapVector {
    /// Look up a vector number.
    pub const fn from_vector(vector: u8) -> Option<Self> {
        match vector {
            0x20 => Some(TrapVector::Getc),
            0x21 => Some(TrapVector::Out),
            0x22 => Some(TrapVector::Puts),
            0x23 => Some(TrapVector::In),
            0x24 => Some(TrapVector::Putsp),
            0x25 => Some(TrapVector::Halt),
            _ => None,
        }
    }

    /// Assembler alias for `TRAP xNN`.
    pub const fn name(self) -> &'static str {
        match self {
            TrapVector::Getc => "GETC",
            TrapVector::Out => "OUT",
            TrapVector::Puts => "PUTS",
            TrapVector::In => "IN",
            TrapVector::Putsp => "PUTSP",
            TrapVector::Halt => "HALT",
        }
    }
}

impl<C: Console> Cpu<C> {
    /// Service `TRAP vector`. `pc` is the address of the TRAP instruction.
    pub(crate) fn trap(&mut self, vector: u8, pc: u16) -> Result<(), CpuError> {
        let Some(routine) = TrapVector::from_vector(vector) else {
            if self.strict_traps() {
                self.state = CpuState::Faulted;
                return Err(CpuError::UnknownTrap { vector, pc });
            }
            tracing::warn!("ignoring unknown trap vector {:#04x} at {:#06x}", vector, pc);
            return Ok(());
        };

        match routine {
            TrapVector::Getc => {
                let byte = self.console.read_byte();
                self.regs.load(Reg::R0, u16::from(byte));
            }

            TrapVector::Out => {
                let byte = self.regs.get(Reg::R0) as u8;
                self.console.write_byte(byte);
                self.console.flush();
            }

            TrapVector::Puts => {
                let mut addr = self.regs.get(Reg::R0);
                for _ in 0..MEMORY_SIZE {
                    let cell = self.mem.peek(addr);
                    if cell == 0 {
                        break;
                    }
                    self.console.write_byte(cell as u8);
                    addr = addr.wrapping_add(1);
                }
                self.console.flush();
            }

            TrapVector::In => {
                self.console.write_all(IN_PROMPT.as_bytes());
                self.console.flush();
                let byte = self.console.read_byte();
                self.console.write_byte(byte);
                self.console.flush();
                self.regs.load(Reg::R0, u16::from(byte));
            }

            TrapVector::Putsp => {
                let mut addr = self.regs.get(Reg::R0);
                for _ in 0..MEMORY_SIZE {
                    let cell = self.mem.peek(addr);
                    let [low, high] = cell.to_le_bytes();
                    if low == 0 {
                        break;
                    }
                    self.console.write_byte(low);
                    if high != 0 {
                        self.console.write_byte(high);
                    }
                    addr = addr.wrapping_add(1);
                }
                self.console.flush();
            }

            TrapVector::Halt => {
                self.console.write_all(HALT_NOTICE.as_bytes());
                self.console.flush();
                self.state = CpuState::Halted;
                tracing::info!(cycles = self.cycles + 1, "machine halted at {:#06x}", pc);
            }
        }

        Ok(())
    }
}
