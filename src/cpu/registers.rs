//! LC-3 CPU registers.
//!
//! The LC-3 has 10 architectural registers:
//! - R0..R7: 16-bit general purpose registers
//! - PC: address of the next instruction to fetch
//! - COND: condition code, exactly one of N, Z or P

use serde::{Serialize, Deserialize};

/// A 3-bit general register selector (R0..R7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reg(u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R1: Reg = Reg(1);
    pub const R2: Reg = Reg(2);
    pub const R3: Reg = Reg(3);
    pub const R4: Reg = Reg(4);
    pub const R5: Reg = Reg(5);
    pub const R6: Reg = Reg(6);
    pub const R7: Reg = Reg(7);

    /// Extract a register selector from the 3 bits of `word` starting at `shift`.
    pub const fn from_field(word: u16, shift: u32) -> Self {
        Reg(((word >> shift) & 0x7) as u8)
    }

    /// Create a selector from an index, keeping only the low 3 bits.
    pub const fn new(index: u8) -> Self {
        Reg(index & 0x7)
    }

    /// The register number (0..=7).
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// The condition code.
///
/// The discriminants are the architectural bit positions, so a BR
/// instruction's `nzp` mask can be tested with a single AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum Condition {
    /// Last written value was positive
    Pos = 1 << 0,
    /// Last written value was zero
    Zro = 1 << 1,
    /// Last written value had bit 15 set
    Neg = 1 << 2,
}

impl Condition {
    /// Classify a 16-bit value. Zero is always `Zro`.
    pub const fn of(value: u16) -> Self {
        if value == 0 {
            Condition::Zro
        } else if value >> 15 == 1 {
            Condition::Neg
        } else {
            Condition::Pos
        }
    }

    /// The COND register bit pattern.
    pub const fn bits(self) -> u16 {
        self as u16
    }
}

/// The LC-3 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// R0..R7
    gpr: [u16; 8],

    /// Address of the next instruction to fetch
    pub pc: u16,

    /// Condition code, recomputed after every general register write
    pub cond: Condition,
}

impl Registers {
    /// Create a register file with all registers zeroed and COND = Z.
    pub fn new() -> Self {
        Self {
            gpr: [0; 8],
            pc: 0,
            cond: Condition::Zro,
        }
    }

    /// Read a general register.
    #[inline]
    pub fn get(&self, r: Reg) -> u16 {
        self.gpr[r.0 as usize]
    }

    /// Write a general register without touching COND.
    #[inline]
    pub fn set(&mut self, r: Reg, value: u16) {
        self.gpr[r.0 as usize] = value;
    }

    /// Recompute COND from the current contents of `r`.
    pub fn update_flags(&mut self, r: Reg) {
        self.cond = Condition::of(self.get(r));
    }

    /// Write a general register and update COND from the new value.
    pub fn load(&mut self, r: Reg, value: u16) {
        self.set(r, value);
        self.update_flags(r);
    }

    /// Increment the program counter by 1, wrapping at 0xFFFF.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// The PC plus a sign-extended offset.
    #[inline]
    pub fn pc_relative(&self, offset: u16) -> u16 {
        self.pc.wrapping_add(offset)
    }

    /// A base register plus a sign-extended offset.
    #[inline]
    pub fn base_relative(&self, base: Reg, offset: u16) -> u16 {
        self.get(base).wrapping_add(offset)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
