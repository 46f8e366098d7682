//! Instruction decoder for the LC-3.
//!
//! Every instruction is one 16-bit word. Bits 15..12 hold the opcode, the
//! remaining 12 bits hold opcode-specific fields: 3-bit register
//! selectors and 5, 6, 9 or 11-bit two's complement immediates.

use crate::cpu::registers::Reg;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Sign-extend the low `bit_count` bits of `x` to 16 bits.
///
/// Bits at and above `bit_count` in the input are ignored.
pub const fn sign_extend(x: u16, bit_count: u32) -> u16 {
    let mask = (1u16 << bit_count).wrapping_sub(1);
    let x = x & mask;
    if (x >> (bit_count - 1)) & 1 == 1 {
        x | !mask
    } else {
        x
    }
}

/// The 4-bit opcode.
///
/// All 16 codes are listed. RTI and RES are not implemented by this
/// machine and decode to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Br = 0x0,
    Add = 0x1,
    Ld = 0x2,
    St = 0x3,
    Jsr = 0x4,
    And = 0x5,
    Ldr = 0x6,
    Str = 0x7,
    Rti = 0x8,
    Not = 0x9,
    Ldi = 0xA,
    Sti = 0xB,
    Jmp = 0xC,
    Res = 0xD,
    Lea = 0xE,
    Trap = 0xF,
}

impl Opcode {
    /// Opcodes indexed by their encoding.
    pub const ALL: [Opcode; 16] = [
        Opcode::Br, Opcode::Add, Opcode::Ld, Opcode::St,
        Opcode::Jsr, Opcode::And, Opcode::Ldr, Opcode::Str,
        Opcode::Rti, Opcode::Not, Opcode::Ldi, Opcode::Sti,
        Opcode::Jmp, Opcode::Res, Opcode::Lea, Opcode::Trap,
    ];

    /// The opcode in bits 15..12 of `word`.
    pub const fn of(word: u16) -> Self {
        Self::ALL[(word >> 12) as usize]
    }

    /// The 4-bit encoding.
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Br => "BR",
            Opcode::Add => "ADD",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Jsr => "JSR",
            Opcode::And => "AND",
            Opcode::Ldr => "LDR",
            Opcode::Str => "STR",
            Opcode::Rti => "RTI",
            Opcode::Not => "NOT",
            Opcode::Ldi => "LDI",
            Opcode::Sti => "STI",
            Opcode::Jmp => "JMP",
            Opcode::Res => "RES",
            Opcode::Lea => "LEA",
            Opcode::Trap => "TRAP",
        }
    }
}

/// Second source operand of ADD and AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Register mode (bit 5 clear)
    Reg(Reg),
    /// Immediate mode (bit 5 set), already sign-extended from 5 bits
    Imm(u16),
}

/// Where JSR/JSRR transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsrTarget {
    /// JSR: PC-relative, sign-extended from 11 bits
    Offset(u16),
    /// JSRR: the address in a base register
    Base(Reg),
}

/// Decoded LC-3 instruction.
///
/// All offsets and immediates are stored already sign-extended to 16 bits,
/// ready for wrapping addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Operate ====================

    /// dr := sr1 + src2
    Add { dr: Reg, sr1: Reg, src2: Operand },

    /// dr := sr1 & src2
    And { dr: Reg, sr1: Reg, src2: Operand },

    /// dr := !sr
    Not { dr: Reg, sr: Reg },

    // ==================== Data Movement ====================

    /// dr := mem[PC + offset]
    Ld { dr: Reg, offset: u16 },

    /// dr := mem[mem[PC + offset]]
    Ldi { dr: Reg, offset: u16 },

    /// dr := mem[base + offset]
    Ldr { dr: Reg, base: Reg, offset: u16 },

    /// dr := PC + offset
    Lea { dr: Reg, offset: u16 },

    /// mem[PC + offset] := sr
    St { sr: Reg, offset: u16 },

    /// mem[mem[PC + offset]] := sr
    Sti { sr: Reg, offset: u16 },

    /// mem[base + offset] := sr
    Str { sr: Reg, base: Reg, offset: u16 },

    // ==================== Control ====================

    /// If `nzp & COND != 0` then PC := PC + offset
    Br { nzp: u16, offset: u16 },

    /// PC := base (RET is JMP R7)
    Jmp { base: Reg },

    /// R7 := PC, then PC := target
    Jsr { target: JsrTarget },

    /// Invoke a trap service routine
    Trap { vector: u8 },
}

impl Instruction {
    /// The opcode this instruction encodes to.
    pub const fn opcode(&self) -> Opcode {
        match self {
            Instruction::Add { .. } => Opcode::Add,
            Instruction::And { .. } => Opcode::And,
            Instruction::Not { .. } => Opcode::Not,
            Instruction::Ld { .. } => Opcode::Ld,
            Instruction::Ldi { .. } => Opcode::Ldi,
            Instruction::Ldr { .. } => Opcode::Ldr,
            Instruction::Lea { .. } => Opcode::Lea,
            Instruction::St { .. } => Opcode::St,
            Instruction::Sti { .. } => Opcode::Sti,
            Instruction::Str { .. } => Opcode::Str,
            Instruction::Br { .. } => Opcode::Br,
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Jsr { .. } => Opcode::Jsr,
            Instruction::Trap { .. } => Opcode::Trap,
        }
    }
}

#[inline]
const fn pcoffset9(word: u16) -> u16 {
    sign_extend(word, 9)
}

#[inline]
const fn offset6(word: u16) -> u16 {
    sign_extend(word, 6)
}

fn operand2(word: u16) -> Operand {
    if (word >> 5) & 1 == 1 {
        Operand::Imm(sign_extend(word, 5))
    } else {
        Operand::Reg(Reg::from_field(word, 0))
    }
}

/// Decode a 16-bit instruction word.
pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
    let dr = Reg::from_field(word, 9);
    let sr1 = Reg::from_field(word, 6);

    let instruction = match Opcode::of(word) {
        Opcode::Add => Instruction::Add { dr, sr1, src2: operand2(word) },
        Opcode::And => Instruction::And { dr, sr1, src2: operand2(word) },
        Opcode::Not => Instruction::Not { dr, sr: sr1 },
        Opcode::Ld => Instruction::Ld { dr, offset: pcoffset9(word) },
        Opcode::Ldi => Instruction::Ldi { dr, offset: pcoffset9(word) },
        Opcode::Ldr => Instruction::Ldr { dr, base: sr1, offset: offset6(word) },
        Opcode::Lea => Instruction::Lea { dr, offset: pcoffset9(word) },
        Opcode::St => Instruction::St { sr: dr, offset: pcoffset9(word) },
        Opcode::Sti => Instruction::Sti { sr: dr, offset: pcoffset9(word) },
        Opcode::Str => Instruction::Str { sr: dr, base: sr1, offset: offset6(word) },
        Opcode::Br => Instruction::Br {
            nzp: (word >> 9) & 0x7,
            offset: pcoffset9(word),
        },
        Opcode::Jmp => Instruction::Jmp { base: sr1 },
        Opcode::Jsr => {
            let target = if (word >> 11) & 1 == 1 {
                JsrTarget::Offset(sign_extend(word, 11))
            } else {
                JsrTarget::Base(sr1)
            };
            Instruction::Jsr { target }
        }
        Opcode::Trap => Instruction::Trap { vector: (word & 0xFF) as u8 },
        op @ (Opcode::Rti | Opcode::Res) => return Err(DecodeError::IllegalOpcode(op)),
    };

    Ok(instruction)
}

/// Encode an instruction back to a 16-bit word.
///
/// Unused bits are encoded the way the LC-3 ISA documents them (NOT's low
/// six bits are all ones, everything else zero).
pub fn encode(instr: &Instruction) -> u16 {
    let op = instr.opcode().bits() << 12;
    let r = |reg: Reg, shift: u32| u16::from(reg.index()) << shift;
    let src2 = |src: &Operand| match *src {
        Operand::Reg(sr2) => r(sr2, 0),
        Operand::Imm(imm) => (1 << 5) | (imm & 0x1F),
    };

    let fields = match instr {
        Instruction::Add { dr, sr1, src2: s } | Instruction::And { dr, sr1, src2: s } => {
            r(*dr, 9) | r(*sr1, 6) | src2(s)
        }
        Instruction::Not { dr, sr } => r(*dr, 9) | r(*sr, 6) | 0x3F,
        Instruction::Ld { dr, offset }
        | Instruction::Ldi { dr, offset }
        | Instruction::Lea { dr, offset } => r(*dr, 9) | (offset & 0x1FF),
        Instruction::St { sr, offset } | Instruction::Sti { sr, offset } => {
            r(*sr, 9) | (offset & 0x1FF)
        }
        Instruction::Ldr { dr, base, offset } => r(*dr, 9) | r(*base, 6) | (offset & 0x3F),
        Instruction::Str { sr, base, offset } => r(*sr, 9) | r(*base, 6) | (offset & 0x3F),
        Instruction::Br { nzp, offset } => ((nzp & 0x7) << 9) | (offset & 0x1FF),
        Instruction::Jmp { base } => r(*base, 6),
        Instruction::Jsr { target: JsrTarget::Offset(offset) } => (1 << 11) | (offset & 0x7FF),
        Instruction::Jsr { target: JsrTarget::Base(base) } => r(*base, 6),
        Instruction::Trap { vector } => u16::from(*vector),
    };

    op | fields
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("illegal opcode {} ({:#x})", .0.mnemonic(), .0.bits())]
    IllegalOpcode(Opcode),
}
