//! # LC-3 Emulator
//!
//! An instruction-set simulator for the LC-3, the 16-bit educational
//! computer used in introductory computer architecture courses.
//!
//! The machine loads pre-assembled object images and runs them until a
//! HALT trap or an illegal opcode. All console I/O goes through the
//! [`Console`] trait so the engine can be driven by a real terminal or by
//! scripted input in tests.

pub mod cpu;
pub mod console;
pub mod image;
pub mod disasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuError, Memory, Registers, Instruction, InterruptFlag};
pub use console::{Console, BufferedConsole, PipedConsole};
pub use image::{Image, ImageError, load_image, load_images};
pub use disasm::{disassemble, disassemble_instruction};

#[cfg(feature = "terminal")]
pub use console::{RawModeGuard, TerminalConsole};
