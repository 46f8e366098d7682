//! CPU emulation for the LC-3.
//!
//! This module implements the LC-3 architecture:
//! - 65536 sixteen-bit memory cells with memory-mapped keyboard registers
//! - 8 general registers, PC and a 3-state condition code
//! - 14 implemented opcodes plus the six standard trap routines

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;
pub mod interrupt;
pub mod trap;

pub use memory::Memory;
pub use registers::{Condition, Reg, Registers};
pub use decode::{Instruction, Opcode, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, Snapshot, EVENT_POLL_INTERVAL, PC_START};
pub use interrupt::InterruptFlag;
pub use trap::TrapVector;
