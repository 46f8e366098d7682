//! CPU execution engine for the LC-3.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::console::Console;
use crate::cpu::decode::{self, Instruction, JsrTarget, Opcode, Operand};
use crate::cpu::interrupt::InterruptFlag;
use crate::cpu::registers::{Reg, Registers};
use crate::cpu::Memory;
use crate::disasm::format_instruction;
use crate::image::Image;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Conventional start address of user programs.
pub const PC_START: u16 = 0x3000;

/// Instructions between calls to [`Console::poll_events`].
pub const EVENT_POLL_INTERVAL: u64 = 1024;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (HALT trap).
    Halted,
    /// CPU hit an illegal opcode or a rejected trap.
    Faulted,
    /// Execution was cancelled from outside.
    Interrupted,
}

/// The LC-3 CPU.
///
/// Owns its registers, memory and console exclusively, so independent
/// machines can run side by side.
pub struct Cpu<C> {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Console collaborator used by traps and the keyboard registers.
    pub console: C,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    interrupt: InterruptFlag,
    strict_traps: bool,
}

impl<C: Console> Cpu<C> {
    /// Create a new CPU with zeroed memory and PC at [`PC_START`].
    pub fn new(console: C) -> Self {
        Self::with_interrupt(console, InterruptFlag::new())
    }

    /// Create a CPU that stops when `interrupt` is raised.
    pub fn with_interrupt(console: C, interrupt: InterruptFlag) -> Self {
        let mut regs = Registers::new();
        regs.pc = PC_START;
        Self {
            regs,
            mem: Memory::new(),
            console,
            state: CpuState::Running,
            cycles: 0,
            interrupt,
            strict_traps: false,
        }
    }

    /// A handle that cancels execution at the next cycle boundary.
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Fault on unknown trap vectors instead of ignoring them.
    pub fn set_strict_traps(&mut self, strict: bool) {
        self.strict_traps = strict;
    }

    pub(crate) fn strict_traps(&self) -> bool {
        self.strict_traps
    }

    /// Deposit an image into memory. Returns the number of words stored.
    pub fn load_image(&mut self, image: &Image) -> usize {
        self.mem.load(image.origin, &image.words)
    }

    /// Load raw words at [`PC_START`].
    pub fn load_program(&mut self, program: &[u16]) -> usize {
        self.mem.load(PC_START, program)
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or an error.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch, then advance PC before executing
        let pc = self.regs.advance_pc();
        let raw = self.mem.read(pc, &mut self.console);

        // Decode
        let instr = match decode::decode(raw) {
            Ok(instr) => instr,
            Err(decode::DecodeError::IllegalOpcode(opcode)) => {
                self.state = CpuState::Faulted;
                return Err(CpuError::IllegalOpcode { opcode, pc });
            }
        };
        tracing::trace!("{:#06x}: {:#06x}  {}", pc, raw, format_instruction(&instr));

        // Execute
        self.execute(instr, pc)?;

        self.cycles += 1;

        Ok(instr)
    }

    /// Run until halt, fault or interrupt.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running && !self.check_interrupt() {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit && !self.check_interrupt() {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Move to `Interrupted` if cancellation was requested.
    ///
    /// Every [`EVENT_POLL_INTERVAL`] cycles the console is polled first, so
    /// a cancel key is seen even in loops that never touch the keyboard.
    fn check_interrupt(&mut self) -> bool {
        if self.cycles % EVENT_POLL_INTERVAL == 0 {
            self.console.poll_events();
        }
        if self.interrupt.is_raised() {
            tracing::info!(cycles = self.cycles, "interrupted at {:#06x}", self.regs.pc);
            self.state = CpuState::Interrupted;
            return true;
        }
        false
    }

    /// Memory read as seen by instructions (keyboard registers are live).
    fn read(&mut self, addr: u16) -> u16 {
        self.mem.read(addr, &mut self.console)
    }

    fn operand(&self, src: Operand) -> u16 {
        match src {
            Operand::Reg(r) => self.regs.get(r),
            Operand::Imm(imm) => imm,
        }
    }

    /// Execute a decoded instruction. `pc` is the instruction's own address.
    fn execute(&mut self, instr: Instruction, pc: u16) -> Result<(), CpuError> {
        match instr {
            // ==================== Operate ====================

            Instruction::Add { dr, sr1, src2 } => {
                let value = self.regs.get(sr1).wrapping_add(self.operand(src2));
                self.regs.load(dr, value);
            }

            Instruction::And { dr, sr1, src2 } => {
                let value = self.regs.get(sr1) & self.operand(src2);
                self.regs.load(dr, value);
            }

            Instruction::Not { dr, sr } => {
                let value = !self.regs.get(sr);
                self.regs.load(dr, value);
            }

            // ==================== Data Movement ====================

            Instruction::Ld { dr, offset } => {
                let addr = self.regs.pc_relative(offset);
                let value = self.read(addr);
                self.regs.load(dr, value);
            }

            Instruction::Ldi { dr, offset } => {
                let pointer = self.regs.pc_relative(offset);
                let addr = self.read(pointer);
                let value = self.read(addr);
                self.regs.load(dr, value);
            }

            Instruction::Ldr { dr, base, offset } => {
                let addr = self.regs.base_relative(base, offset);
                let value = self.read(addr);
                self.regs.load(dr, value);
            }

            Instruction::Lea { dr, offset } => {
                let addr = self.regs.pc_relative(offset);
                self.regs.load(dr, addr);
            }

            Instruction::St { sr, offset } => {
                let addr = self.regs.pc_relative(offset);
                self.mem.write(addr, self.regs.get(sr));
            }

            Instruction::Sti { sr, offset } => {
                let pointer = self.regs.pc_relative(offset);
                let addr = self.read(pointer);
                self.mem.write(addr, self.regs.get(sr));
            }

            Instruction::Str { sr, base, offset } => {
                let addr = self.regs.base_relative(base, offset);
                self.mem.write(addr, self.regs.get(sr));
            }

            // ==================== Control ====================

            Instruction::Br { nzp, offset } => {
                if nzp & self.regs.cond.bits() != 0 {
                    self.regs.pc = self.regs.pc_relative(offset);
                }
            }

            Instruction::Jmp { base } => {
                self.regs.pc = self.regs.get(base);
            }

            Instruction::Jsr { target } => {
                // Resolve the target first: JSRR R7 jumps to the old R7.
                let dest = match target {
                    JsrTarget::Offset(offset) => self.regs.pc_relative(offset),
                    JsrTarget::Base(base) => self.regs.get(base),
                };
                self.regs.set(Reg::R7, self.regs.pc);
                self.regs.pc = dest;
            }

            Instruction::Trap { vector } => {
                self.trap(vector, pc)?;
            }
        }

        Ok(())
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Capture registers, state and cycle count.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            regs: self.regs.clone(),
            state: self.state,
            cycles: self.cycles,
        }
    }
}

impl<C> std::fmt::Debug for Cpu<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Serializable machine state, without memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub regs: Registers,
    pub state: CpuState,
    pub cycles: u64,
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("illegal opcode {} at {pc:#06x}", opcode.mnemonic())]
    IllegalOpcode { opcode: Opcode, pc: u16 },

    #[error("unknown trap vector {vector:#04x} at {pc:#06x}")]
    UnknownTrap { vector: u8, pc: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferedConsole;
    use crate::cpu::decode::encode;
    use crate::cpu::memory::{KBDR, KBSR, KBSR_READY};
    use crate::cpu::registers::Condition;
    use proptest::prelude::*;

    const HALT: Instruction = Instruction::Trap { vector: 0x25 };

    fn make_program(instructions: &[Instruction]) -> Vec<u16> {
        instructions.iter().map(encode).collect()
    }

    fn machine(instructions: &[Instruction]) -> Cpu<BufferedConsole> {
        let mut cpu = Cpu::new(BufferedConsole::new());
        cpu.load_program(&make_program(instructions));
        cpu
    }

    fn add_imm(dr: Reg, sr1: Reg, imm: u16) -> Instruction {
        Instruction::Add { dr, sr1, src2: Operand::Imm(imm) }
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = machine(&[HALT]);

        let executed = cpu.run().unwrap();

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.console.output_string(), "HALT\n");
    }

    #[test]
    fn test_nothing_runs_after_halt() {
        let mut cpu = machine(&[HALT, add_imm(Reg::R0, Reg::R0, 1), HALT]);

        cpu.run().unwrap();
        let pc = cpu.regs.pc;

        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Halted)));
        assert_eq!(cpu.run().unwrap(), 0);
        assert_eq!(cpu.regs.pc, pc);
        assert_eq!(cpu.regs.get(Reg::R0), 0);
        assert_eq!(cpu.console.output_string(), "HALT\n");
    }

    #[test]
    fn test_pc_advances_before_execute() {
        // LEA R0, #0 yields the address of the next instruction
        let mut cpu = machine(&[Instruction::Lea { dr: Reg::R0, offset: 0 }, HALT]);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.get(Reg::R0), PC_START + 1);
        assert_eq!(cpu.regs.pc, PC_START + 1);
    }

    #[test]
    fn test_add_immediate_mode() {
        let mut cpu = machine(&[add_imm(Reg::R1, Reg::R2, 0xFFFF), HALT]);
        cpu.regs.set(Reg::R2, 10);
        cpu.regs.set(Reg::R3, 1000);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R1), 9);
        assert_eq!(cpu.regs.cond, Condition::Pos);
    }

    #[test]
    fn test_add_register_mode() {
        let mut cpu = machine(&[
            Instruction::Add { dr: Reg::R1, sr1: Reg::R2, src2: Operand::Reg(Reg::R3) },
            HALT,
        ]);
        cpu.regs.set(Reg::R2, 10);
        cpu.regs.set(Reg::R3, 1000);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R1), 1010);
    }

    #[test]
    fn test_add_raw_encodings_select_mode() {
        // ADD R1, R2, R3 (bits 4..3 set but ignored); ADD R4, R2, #3
        let mut cpu = Cpu::new(BufferedConsole::new());
        cpu.load_program(&[0x129B, 0x18A3, 0xF025]);
        cpu.regs.set(Reg::R2, 7);
        cpu.regs.set(Reg::R3, 100);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R1), 107);
        assert_eq!(cpu.regs.get(Reg::R4), 10);
    }

    #[test]
    fn test_add_wraps_and_sets_negative() {
        let mut cpu = machine(&[add_imm(Reg::R0, Reg::R0, 1), HALT]);
        cpu.regs.set(Reg::R0, 0x7FFF);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.get(Reg::R0), 0x8000);
        assert_eq!(cpu.regs.cond, Condition::Neg);
    }

    #[test]
    fn test_and_modes() {
        let mut cpu = machine(&[
            Instruction::And { dr: Reg::R0, sr1: Reg::R1, src2: Operand::Imm(0x000F) },
            Instruction::And { dr: Reg::R2, sr1: Reg::R1, src2: Operand::Reg(Reg::R3) },
            Instruction::And { dr: Reg::R4, sr1: Reg::R1, src2: Operand::Imm(0) },
            HALT,
        ]);
        cpu.regs.set(Reg::R1, 0xABCD);
        cpu.regs.set(Reg::R3, 0xFF00);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), 0x000D);
        assert_eq!(cpu.regs.get(Reg::R2), 0xAB00);
        assert_eq!(cpu.regs.get(Reg::R4), 0);
        assert_eq!(cpu.regs.cond, Condition::Zro);
    }

    #[test]
    fn test_not() {
        let mut cpu = machine(&[Instruction::Not { dr: Reg::R5, sr: Reg::R5 }, HALT]);
        cpu.regs.set(Reg::R5, 0x00FF);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.get(Reg::R5), 0xFF00);
        assert_eq!(cpu.regs.cond, Condition::Neg);
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        let mut cpu = machine(&[
            // R0 = 0 -> Z
            Instruction::And { dr: Reg::R0, sr1: Reg::R0, src2: Operand::Imm(0) },
            // BRp not taken
            Instruction::Br { nzp: 0b001, offset: 1 },
            add_imm(Reg::R1, Reg::R1, 1),
            // R1 = 1 -> P, so BRp is taken
            Instruction::Br { nzp: 0b001, offset: 1 },
            add_imm(Reg::R2, Reg::R2, 1),
            HALT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R1), 1);
        assert_eq!(cpu.regs.get(Reg::R2), 0);
    }

    #[test]
    fn test_branch_backwards_loop() {
        // R0 = 3; loop: R0 -= 1; BRp loop
        let mut cpu = machine(&[
            add_imm(Reg::R0, Reg::R0, 3),
            add_imm(Reg::R1, Reg::R1, 1),
            add_imm(Reg::R0, Reg::R0, 0xFFFF),
            Instruction::Br { nzp: 0b001, offset: 0xFFFD },
            HALT,
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), 0);
        assert_eq!(cpu.regs.get(Reg::R1), 3);
    }

    #[test]
    fn test_unconditional_branch_nzp() {
        let mut cpu = machine(&[Instruction::Br { nzp: 0b111, offset: 1 }, add_imm(Reg::R1, Reg::R1, 1), HALT]);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.get(Reg::R1), 0);
    }

    #[test]
    fn test_jsr_saves_return_address() {
        let mut cpu = machine(&[
            Instruction::Jsr { target: JsrTarget::Offset(2) },
            HALT,
            HALT,
            add_imm(Reg::R0, Reg::R0, 5),
            Instruction::Jmp { base: Reg::R7 },
        ]);

        cpu.step().unwrap();
        assert_eq!(cpu.regs.get(Reg::R7), PC_START + 1);
        assert_eq!(cpu.regs.pc, PC_START + 3);

        cpu.run().unwrap();
        assert_eq!(cpu.regs.get(Reg::R0), 5);
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 4);
    }

    #[test]
    fn test_jsrr_saves_return_address() {
        let mut cpu = machine(&[Instruction::Jsr { target: JsrTarget::Base(Reg::R3) }]);
        cpu.regs.set(Reg::R3, 0x4000);

        cpu.step().unwrap();

        assert_eq!(cpu.regs.get(Reg::R7), PC_START + 1);
        assert_eq!(cpu.regs.pc, 0x4000);
    }

    #[test]
    fn test_jsrr_through_r7_uses_old_value() {
        let mut cpu = machine(&[Instruction::Jsr { target: JsrTarget::Base(Reg::R7) }]);
        cpu.regs.set(Reg::R7, 0x5000);

        cpu.step().unwrap();

        assert_eq!(cpu.regs.pc, 0x5000);
        assert_eq!(cpu.regs.get(Reg::R7), PC_START + 1);
    }

    #[test]
    fn test_jmp_and_br_leave_r7_and_cond() {
        let mut cpu = machine(&[
            Instruction::Br { nzp: 0b111, offset: 0 },
            Instruction::Jmp { base: Reg::R2 },
        ]);
        cpu.regs.set(Reg::R7, 0xBEEF);
        cpu.regs.set(Reg::R2, 0x6000);
        let cond = cpu.regs.cond;

        cpu.step().unwrap();
        cpu.step().unwrap();

        assert_eq!(cpu.regs.pc, 0x6000);
        assert_eq!(cpu.regs.get(Reg::R7), 0xBEEF);
        assert_eq!(cpu.regs.cond, cond);
    }

    #[test]
    fn test_ld_and_lea() {
        let mut cpu = machine(&[
            Instruction::Ld { dr: Reg::R0, offset: 2 },
            Instruction::Lea { dr: Reg::R1, offset: 1 },
            HALT,
        ]);
        // PC after LD is 0x3001, so the data word is at 0x3003
        cpu.mem.write(0x3003, 0xFFFE);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), 0xFFFE);
        assert_eq!(cpu.regs.get(Reg::R1), 0x3003);
        assert_eq!(cpu.regs.cond, Condition::Pos);
    }

    #[test]
    fn test_ldi_indirection() {
        // Place LDI so that PC + offset = 100
        let mut cpu = Cpu::new(BufferedConsole::new());
        cpu.regs.pc = 90;
        cpu.mem.write(90, encode(&Instruction::Ldi { dr: Reg::R3, offset: 9 }));
        cpu.mem.write(100, 200);
        cpu.mem.write(200, 42);

        cpu.step().unwrap();

        assert_eq!(cpu.regs.get(Reg::R3), 42);
    }

    #[test]
    fn test_ldr_negative_offset() {
        let mut cpu = machine(&[Instruction::Ldr { dr: Reg::R0, base: Reg::R6, offset: 0xFFFF }, HALT]);
        cpu.regs.set(Reg::R6, 0x4001);
        cpu.mem.write(0x4000, 0);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), 0);
        assert_eq!(cpu.regs.cond, Condition::Zro);
    }

    #[test]
    fn test_stores_leave_cond() {
        let mut cpu = machine(&[
            Instruction::St { sr: Reg::R0, offset: 10 },
            Instruction::Sti { sr: Reg::R1, offset: 10 },
            Instruction::Str { sr: Reg::R2, base: Reg::R6, offset: 0xFFFE },
            HALT,
        ]);
        cpu.regs.load(Reg::R5, 0x8000);
        cpu.regs.set(Reg::R0, 11);
        cpu.regs.set(Reg::R1, 22);
        cpu.regs.set(Reg::R2, 33);
        cpu.regs.set(Reg::R6, 0x4002);
        cpu.mem.write(0x300C, 0x4100);

        for _ in 0..3 {
            cpu.step().unwrap();
        }

        assert_eq!(cpu.mem.peek(0x300B), 11);
        assert_eq!(cpu.mem.peek(0x4100), 22);
        assert_eq!(cpu.mem.peek(0x4000), 33);
        assert_eq!(cpu.regs.cond, Condition::Neg);
    }

    #[test]
    fn test_illegal_opcodes_fault() {
        for word in [0x8000u16, 0xD000] {
            let mut cpu = Cpu::new(BufferedConsole::new());
            cpu.load_program(&[word]);
            cpu.regs.set(Reg::R4, 0x1234);
            let before = cpu.regs.clone();

            let err = cpu.run().unwrap_err();

            assert!(matches!(err, CpuError::IllegalOpcode { pc: PC_START, .. }));
            assert_eq!(cpu.state, CpuState::Faulted);
            assert_eq!(cpu.regs.pc, PC_START + 1);
            let mut expected = before;
            expected.pc = PC_START + 1;
            assert_eq!(cpu.regs, expected);
            assert_eq!(cpu.cycles, 0);
        }
    }

    #[test]
    fn test_fault_stops_engine() {
        let mut cpu = Cpu::new(BufferedConsole::new());
        cpu.load_program(&[0xD000, 0xF025]);
        assert!(cpu.run().is_err());
        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Faulted)));
        assert!(cpu.console.output().is_empty());
    }

    #[test]
    fn test_keyboard_polling_program() {
        // poll: LDI R0, KBSR_PTR; BRzp poll; LDI R0, KBDR_PTR; HALT
        let mut cpu = machine(&[
            Instruction::Ldi { dr: Reg::R0, offset: 3 },
            Instruction::Br { nzp: 0b011, offset: 0xFFFE },
            Instruction::Ldi { dr: Reg::R0, offset: 2 },
            HALT,
            Instruction::Trap { vector: 0 },
            Instruction::Trap { vector: 0 },
        ]);
        cpu.mem.write(0x3004, KBSR);
        cpu.mem.write(0x3005, KBDR);
        cpu.console.push_input("z");

        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(Reg::R0), u16::from(b'z'));
    }

    #[test]
    fn test_kbsr_poll_without_input() {
        // poll: LDI R0, KBSR_PTR; BRnzp poll
        let mut cpu = machine(&[
            Instruction::Ldi { dr: Reg::R0, offset: 1 },
            Instruction::Br { nzp: 0b111, offset: 0xFFFE },
        ]);
        cpu.mem.write(PC_START + 2, KBSR);
        cpu.mem.write(KBSR, KBSR_READY);

        cpu.run_limited(100).unwrap();

        assert_eq!(cpu.regs.get(Reg::R0) & KBSR_READY, 0);
        assert_eq!(cpu.regs.cond, Condition::Zro);
    }

    #[test]
    fn test_run_limited() {
        let mut cpu = machine(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]);
        assert_eq!(cpu.run_limited(50).unwrap(), 50);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_interrupt_stops_at_cycle_boundary() {
        let mut cpu = machine(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]);
        cpu.run_limited(3).unwrap();

        cpu.interrupt_flag().raise();
        assert_eq!(cpu.run().unwrap(), 0);
        assert_eq!(cpu.state, CpuState::Interrupted);
        assert_eq!(cpu.cycles, 3);
    }

    /// Reports a cancel key on its second event poll, like a terminal
    /// where Ctrl-C was typed during a busy loop.
    struct CancelKeyConsole {
        interrupt: InterruptFlag,
        polls: u32,
    }

    impl Console for CancelKeyConsole {
        fn poll_input(&mut self) -> bool {
            false
        }

        fn read_byte(&mut self) -> u8 {
            crate::console::EOF_BYTE
        }

        fn write_byte(&mut self, _byte: u8) {}

        fn flush(&mut self) {}

        fn poll_events(&mut self) {
            self.polls += 1;
            if self.polls == 2 {
                self.interrupt.raise();
            }
        }
    }

    #[test]
    fn test_busy_loop_is_cancelled_from_console_events() {
        let interrupt = InterruptFlag::new();
        let console = CancelKeyConsole { interrupt: interrupt.clone(), polls: 0 };
        let mut cpu = Cpu::with_interrupt(console, interrupt);
        cpu.load_program(&make_program(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]));

        let ran = cpu.run_limited(1_000_000).unwrap();

        assert_eq!(cpu.state, CpuState::Interrupted);
        assert_eq!(ran, EVENT_POLL_INTERVAL);
        assert_eq!(cpu.console.polls, 2);
    }

    #[test]
    fn test_run_polls_console_events() {
        let interrupt = InterruptFlag::new();
        let console = CancelKeyConsole { interrupt: interrupt.clone(), polls: 0 };
        let mut cpu = Cpu::with_interrupt(console, interrupt);
        cpu.load_program(&make_program(&[Instruction::Br { nzp: 0b111, offset: 0xFFFF }]));

        cpu.run().unwrap();

        assert_eq!(cpu.state, CpuState::Interrupted);
        assert_eq!(cpu.cycles, EVENT_POLL_INTERVAL);
    }

    #[test]
    fn test_getc_echo_program() {
        // GETC; OUT; HALT
        let mut cpu = machine(&[
            Instruction::Trap { vector: 0x20 },
            Instruction::Trap { vector: 0x21 },
            HALT,
        ]);
        cpu.console.push_input("Q");

        cpu.run().unwrap();

        assert_eq!(cpu.console.output_string(), "QHALT\n");
    }

    #[test]
    fn test_hello_world_program() {
        // LEA R0, MSG; PUTS; HALT; MSG .STRINGZ "Hi"
        let mut cpu = machine(&[
            Instruction::Lea { dr: Reg::R0, offset: 2 },
            Instruction::Trap { vector: 0x22 },
            HALT,
        ]);
        cpu.mem.load(0x3003, &[0x0048, 0x0069, 0x0000]);

        cpu.run().unwrap();

        assert_eq!(cpu.console.output_string(), "HiHALT\n");
    }

    #[test]
    fn test_load_image_at_origin() {
        let mut cpu = Cpu::new(BufferedConsole::new());
        let stored = cpu.load_image(&Image::new(0x3000, vec![0xF025]));
        assert_eq!(stored, 1);
        assert_eq!(cpu.mem.peek(0x3000), 0xF025);

        cpu.run().unwrap();
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 1);
    }

    #[test]
    fn test_independent_machines() {
        let mut a = machine(&[add_imm(Reg::R0, Reg::R0, 1), HALT]);
        let mut b = machine(&[add_imm(Reg::R0, Reg::R0, 2), HALT]);
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.regs.get(Reg::R0), 1);
        assert_eq!(b.regs.get(Reg::R0), 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut cpu = machine(&[add_imm(Reg::R2, Reg::R2, 7), HALT]);
        cpu.run().unwrap();

        let json = serde_json::to_string(&cpu.snapshot()).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(back, cpu.snapshot());
        assert_eq!(back.state, CpuState::Halted);
        assert_eq!(back.regs.get(Reg::R2), 7);
    }

    proptest! {
        #[test]
        fn prop_add_matches_wrapping_add(a in any::<u16>(), b in any::<u16>()) {
            let mut cpu = machine(&[
                Instruction::Add { dr: Reg::R0, sr1: Reg::R1, src2: Operand::Reg(Reg::R2) },
            ]);
            cpu.regs.set(Reg::R1, a);
            cpu.regs.set(Reg::R2, b);
            cpu.step().unwrap();

            let sum = a.wrapping_add(b);
            prop_assert_eq!(cpu.regs.get(Reg::R0), sum);
            prop_assert_eq!(cpu.regs.cond, Condition::of(sum));
        }

        #[test]
        fn prop_and_immediate_sign_extends(a in any::<u16>(), imm in 0u16..32) {
            let mut cpu = Cpu::new(BufferedConsole::new());
            // AND R0, R1, #imm
            cpu.load_program(&[0x5060 | imm]);
            cpu.regs.set(Reg::R1, a);
            cpu.step().unwrap();

            prop_assert_eq!(cpu.regs.get(Reg::R0), a & decode::sign_extend(imm, 5));
        }
    }
}
