//! Disassembler for LC-3 programs.
//!
//! Converts instruction words back to readable assembly.

use crate::cpu::decode::{decode, Instruction, JsrTarget, Operand};
use crate::cpu::registers::Reg;
use crate::cpu::TrapVector;
use std::fmt::Write;

/// Disassemble a single instruction word to text.
pub fn disassemble_instruction(word: u16) -> String {
    match decode(word) {
        Ok(decoded) => format_instruction(&decoded),
        Err(_) => "???".to_string(),
    }
}

/// Disassemble a run of words loaded at `origin`.
pub fn disassemble(origin: u16, words: &[u16]) -> String {
    let mut output = String::new();
    output.push_str("; LC-3 Disassembly\n");
    output.push_str("; -----------------\n\n");

    for (i, &word) in words.iter().enumerate() {
        let addr = origin.wrapping_add(i as u16);
        let _ = writeln!(output, "x{:04X}: x{:04X}  {}", addr, word, disassemble_instruction(word));
    }

    output
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        // Operate
        Instruction::Add { dr, sr1, src2 } => format!("ADD {}, {}, {}", dr, sr1, format_operand(src2)),
        Instruction::And { dr, sr1, src2 } => format!("AND {}, {}, {}", dr, sr1, format_operand(src2)),
        Instruction::Not { dr, sr } => format!("NOT {}, {}", dr, sr),

        // Data movement
        Instruction::Ld { dr, offset } => format!("LD {}, {}", dr, imm(offset)),
        Instruction::Ldi { dr, offset } => format!("LDI {}, {}", dr, imm(offset)),
        Instruction::Ldr { dr, base, offset } => format!("LDR {}, {}, {}", dr, base, imm(offset)),
        Instruction::Lea { dr, offset } => format!("LEA {}, {}", dr, imm(offset)),
        Instruction::St { sr, offset } => format!("ST {}, {}", sr, imm(offset)),
        Instruction::Sti { sr, offset } => format!("STI {}, {}", sr, imm(offset)),
        Instruction::Str { sr, base, offset } => format!("STR {}, {}, {}", sr, base, imm(offset)),

        // Control
        Instruction::Br { nzp: 0, .. } => "NOP".to_string(),
        Instruction::Br { nzp, offset } => {
            let flags: String = [(0b100, 'n'), (0b010, 'z'), (0b001, 'p')]
                .iter()
                .filter(|(bit, _)| nzp & bit != 0)
                .map(|&(_, c)| c)
                .collect();
            format!("BR{} {}", flags, imm(offset))
        }
        Instruction::Jmp { base: Reg::R7 } => "RET".to_string(),
        Instruction::Jmp { base } => format!("JMP {}", base),
        Instruction::Jsr { target: JsrTarget::Offset(offset) } => format!("JSR {}", imm(offset)),
        Instruction::Jsr { target: JsrTarget::Base(base) } => format!("JSRR {}", base),
        Instruction::Trap { vector } => match TrapVector::from_vector(vector) {
            Some(routine) => routine.name().to_string(),
            None => format!("TRAP x{:02X}", vector),
        },
    }
}

/// Format a sign-extended immediate as a signed decimal.
fn imm(value: u16) -> String {
    format!("#{}", value as i16)
}

fn format_operand(src: Operand) -> String {
    match src {
        Operand::Reg(r) => r.to_string(),
        Operand::Imm(value) => imm(value),
    }
}
