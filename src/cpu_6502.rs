//! The cycle-accurate CPU core. Unlike an instruction-at-a-time stepper,
//! this core issues exactly one bus transaction per emulated cycle and
//! announces each transaction's purpose through [`Bus::trace`] first, so
//! an observing bus sees the same read/write stream the silicon produces,
//! dummy cycles included.

use crate::bus::{AccessKind, Bus, NullBus};
use crate::diagnostics::CpuError;
use crate::opcodes::{decode_table, memory_op, MemoryOp, Mnemonic, Mode, Opcode, Variant};

pub mod execute;
pub mod execute_illegal;

#[cfg(test)]
mod test_helpers;

// Test must be after test_helpers, rust format tries to move things around.
#[cfg(test)]
mod test;

/// P after a reset: I, B and the always-set bit.
pub const RESET_STATUS_FLAG: u8 = 0b00110100;

/// The stack lives in page one.
pub const STACK_PAGE: u16 = 0x0100;

/// Hardware vector locations.
pub enum InterruptVectors {
    // The Non-Maskable Interrupt or NMI ($FFFA)
    NonMaskableInterrupt = 0xFFFA,
    ResetVector = 0xFFFC,
    IrqBrkVector = 0xFFFE,
}

#[rustfmt::skip]
#[derive(Debug, Clone, Copy)]
pub enum StatusFlag {
  Carry            = 0b00000001,
  Zero             = 0b00000010,
  InterruptDisable = 0b00000100,
  Decimal          = 0b00001000,
  Break            = 0b00010000,
  Push             = 0b00100000,
  Overflow         = 0b01000000,
  Negative         = 0b10000000,
}

/// The register file. A plain value type so a bus observer can receive a
/// snapshot of it alongside each trace call.
#[derive(Debug, Clone, Copy)]
pub struct Registers {
    // "A" register - The accumulator. Typical results of operations are
    // stored here. In combination with the status register, supports using
    // the status register for carrying, overflow detection, and so on.
    pub a: u8,
    /// "X" register.
    /// Used for several addressing modes. They can be used as loop counters
    /// easily, using INC/DEC and branch instructions.
    pub x: u8,
    /// "Y" register.
    pub y: u8,
    /// "PC" - Program counter, wraps mod 65536.
    pub pc: u16,
    /// "S" - Stack pointer. The 6502 uses a descending stack hardcoded to
    /// page 0x01 (0x0100-0x01FF); S wraps mod 256.
    pub s: u8,
    /// "P" - Status register.
    ///
    ///   7  bit  0
    /// ---- ----
    /// NVss DIZC
    /// |||| ||||
    /// |||| |||+- Carry
    /// |||| ||+-- Zero
    /// |||| |+--- Interrupt Disable
    /// |||| +---- Decimal
    /// ||++------ No CPU effect, see: the B flag
    /// |+-------- Overflow
    /// +--------- Negative
    pub p: u8,
}

impl Registers {
    pub fn new() -> Registers {
        Registers {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            s: 0xfd,
            p: RESET_STATUS_FLAG,
        }
    }

    pub fn set_status_flag(&mut self, status_flag: StatusFlag, value: bool) {
        if value {
            self.p |= status_flag as u8;
        } else {
            self.p &= !(status_flag as u8);
        }
    }

    pub fn is_status_flag_set(&self, status_flag: StatusFlag) -> bool {
        let flag = status_flag as u8;
        self.p & flag == flag
    }

    /// These flags are commonly set together.
    pub fn update_zero_and_negative_flag(&mut self, value: u8) {
        let negative = 0b1000_0000;
        self.set_status_flag(StatusFlag::Zero, value == 0);
        self.set_status_flag(StatusFlag::Negative, value & negative == negative);
    }

    /// ADC and SBC operate on 9 bits, 8 of them in the A register and the
    /// 9th in the carry flag.
    pub fn update_carry_flag(&mut self, result: u16) {
        let carry = 0b1_0000_0000;
        self.set_status_flag(StatusFlag::Carry, result & carry == carry);
    }

    /// Either 0x00 or 0x01.
    pub fn get_carry(&self) -> u8 {
        self.p & (StatusFlag::Carry as u8)
    }
}

/// The micro-state the core is in between bus transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Honor pending interrupts, read and decode the next opcode byte.
    Fetch,
    /// Resolve the effective address, one bus transaction per cycle.
    Load,
    /// Perform the instruction's data access(es) and register effects.
    Execute,
}

/// A hardware interruption of the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    None,
    Nmi,
    Irq,
    Reset,
}

/// This struct implements the MOS Technology 6502 (and, with the extended
/// decode table, 6510) central processing unit.
///
/// http://www.6502.org/
/// https://en.wikipedia.org/wiki/MOS_Technology_6502
pub struct Cpu {
    pub regs: Registers,
    variant: Variant,
    /// The decode table chosen at construction; variant dispatch happens
    /// here once, never on the per-cycle path.
    table: &'static [Opcode; 256],
    state: RunState,
    /// The instruction being worked on.
    opcode: Opcode,
    opcode_byte: u8,
    /// Address the current opcode byte was fetched from.
    opcode_addr: u16,
    /// Bus transactions consumed by the current instruction so far.
    cycle: u8,
    /// Position inside the current Load or Execute sequence.
    step: u8,
    /// The operand working bytes.
    operand_lo: u8,
    operand_hi: u8,
    /// The resolved effective address.
    effective: u16,
    /// An indexed address computation carried into the next page.
    crossed: bool,
    /// Cycle count of the last completed instruction.
    last_cycles: u8,
    /// Ticks once per bus transaction, forever.
    total_cycles: u64,
    pending_reset: bool,
    pending_nmi: bool,
    pending_irq: bool,
    /// The interruption the current BRK-shaped sequence is servicing.
    servicing: Interrupt,
    jammed: bool,
    /// The first reset must leave S at 0xFD instead of decrementing it.
    cold_boot: bool,
}

impl Cpu {
    pub fn new(variant: Variant) -> Cpu {
        Cpu {
            regs: Registers::new(),
            variant,
            table: decode_table(variant),
            state: RunState::Fetch,
            opcode: decode_table(variant)[0xea],
            opcode_byte: 0xea,
            opcode_addr: 0,
            cycle: 0,
            step: 0,
            operand_lo: 0,
            operand_hi: 0,
            effective: 0,
            crossed: false,
            last_cycles: 0,
            total_cycles: 0,
            pending_reset: false,
            pending_nmi: false,
            pending_irq: false,
            servicing: Interrupt::None,
            jammed: false,
            cold_boot: true,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_jammed(&self) -> bool {
        self.jammed
    }

    /// Cycle count of the last completed instruction: the base count plus
    /// any branch-taken and page-cross additions.
    pub fn last_instruction_cycles(&self) -> u8 {
        self.last_cycles
    }

    /// The monotonic timestamp, one tick per bus transaction.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Request a hardware reset. Takes effect at the next Fetch; clears a
    /// jam.
    pub fn reset(&mut self) {
        self.pending_reset = true;
    }

    /// Trigger a hard interrupt (NMI).
    pub fn nmi(&mut self) {
        self.pending_nmi = true;
    }

    /// Trigger a maskable interrupt (IRQ). Honored at the next Fetch if I
    /// is clear.
    pub fn irq(&mut self) {
        self.pending_irq = true;
    }

    /// Advance the machine by exactly one bus transaction against a
    /// detached bus (reads come back as NOP).
    pub fn step_cycle_detached(&mut self) -> Result<(), CpuError> {
        self.step_cycle(&mut NullBus)
    }

    /// Advance the machine by exactly one bus transaction.
    pub fn step_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        // A state transition that consumes no bus transaction loops here;
        // every return path below has performed exactly one.
        loop {
            match self.state {
                RunState::Fetch => return self.fetch_cycle(bus),
                RunState::Load => {
                    if let Some(result) = self.load_cycle(bus) {
                        return result;
                    }
                }
                RunState::Execute => return self.execute_cycle(bus),
            }
        }
    }

    /// Repeat cycles until the next Fetch boundary, so exactly one whole
    /// instruction (or interrupt sequence) runs. A jammed CPU consumes a
    /// single cycle instead of spinning forever.
    pub fn step_instruction(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        self.step_cycle(bus)?;
        if self.jammed {
            return Ok(());
        }
        while self.state != RunState::Fetch {
            self.step_cycle(bus)?;
        }
        Ok(())
    }

    /// This function is useful for testing the emulator. It will only run
    /// while the predicate is true.
    pub fn run_until<F>(&mut self, bus: &mut dyn Bus, predicate: F) -> Result<(), CpuError>
    where
        F: Fn(&Cpu) -> bool,
    {
        while !predicate(self) {
            self.step_instruction(bus)?;
        }
        Ok(())
    }

    // One traced read; the single bus transaction of the current cycle.
    fn read(&mut self, bus: &mut dyn Bus, kind: AccessKind, addr: u16) -> u8 {
        bus.trace(kind, &self.regs);
        self.total_cycles += 1;
        self.cycle += 1;
        self.step += 1;
        bus.read(addr)
    }

    fn write(&mut self, bus: &mut dyn Bus, kind: AccessKind, addr: u16, value: u8) {
        bus.trace(kind, &self.regs);
        self.total_cycles += 1;
        self.cycle += 1;
        self.step += 1;
        bus.write(addr, value);
    }

    fn push(&mut self, bus: &mut dyn Bus, kind: AccessKind, value: u8) {
        let addr = STACK_PAGE + self.regs.s as u16;
        self.write(bus, kind, addr, value);
        self.regs.s = self.regs.s.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut dyn Bus, kind: AccessKind) -> u8 {
        self.regs.s = self.regs.s.wrapping_add(1);
        let addr = STACK_PAGE + self.regs.s as u16;
        self.read(bus, kind, addr)
    }

    // The spin cycle most sequences burn on the stack pointer.
    fn dummy_stack_read(&mut self, bus: &mut dyn Bus) {
        let addr = STACK_PAGE + self.regs.s as u16;
        self.read(bus, AccessKind::DummyRead, addr);
    }

    fn finish_instruction(&mut self) {
        self.last_cycles = self.cycle;
        self.cycle = 0;
        self.step = 0;
        self.state = RunState::Fetch;
        self.servicing = Interrupt::None;
    }

    fn begin_load(&mut self) {
        self.step = 0;
        self.state = RunState::Load;
    }

    fn begin_execute(&mut self) {
        self.step = 0;
        self.state = RunState::Execute;
    }

    /// Which interruption wins at this Fetch. Priority Reset > NMI > IRQ,
    /// IRQ masked by I.
    fn take_interrupt(&mut self) -> Interrupt {
        if self.pending_reset {
            self.pending_reset = false;
            return Interrupt::Reset;
        }
        if self.pending_nmi {
            self.pending_nmi = false;
            return Interrupt::Nmi;
        }
        if self.pending_irq {
            self.pending_irq = false;
            if !self.regs.is_status_flag_set(StatusFlag::InterruptDisable) {
                return Interrupt::Irq;
            }
        }
        Interrupt::None
    }

    fn fetch_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        if self.jammed {
            if self.pending_reset {
                self.pending_reset = false;
                self.jammed = false;
                log::debug!("reset released a jammed cpu");
                self.servicing = Interrupt::Reset;
                self.opcode_addr = self.regs.pc;
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                self.begin_execute_interrupt();
                return Ok(());
            }
            // A jammed 6510 drives the address bus with the IRQ vector
            // forever. Stay in Fetch.
            let addr = if self.total_cycles % 2 == 0 { 0xfffe } else { 0xffff };
            self.read(bus, AccessKind::DummyRead, addr);
            self.cycle = 0;
            self.step = 0;
            return Ok(());
        }

        let interrupt = self.take_interrupt();
        if interrupt != Interrupt::None {
            log::debug!("servicing interrupt {:?}", interrupt);
            self.servicing = interrupt;
            self.opcode_addr = self.regs.pc;
            // The forced-BRK cycle: the opcode on the bus is discarded.
            self.read(bus, AccessKind::DummyRead, self.regs.pc);
            self.begin_execute_interrupt();
            return Ok(());
        }

        self.opcode_addr = self.regs.pc;
        let byte = self.read(bus, AccessKind::OpcodeFetch, self.regs.pc);
        self.opcode_byte = byte;
        self.opcode = self.table[byte as usize];
        if self.opcode.mnemonic == Mnemonic::Unknown {
            self.cycle = 0;
            return Err(CpuError::UnsupportedOpcode {
                opcode: byte,
                pc: self.regs.pc,
            });
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.crossed = false;

        match self.opcode.mode {
            Mode::Implied | Mode::Accumulator | Mode::Relative => self.begin_execute(),
            Mode::Immediate => {
                // The data byte is consumed by the execute step; only the
                // program counter moves now.
                self.effective = self.regs.pc;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.begin_execute();
            }
            _ => self.begin_load(),
        }
        Ok(())
    }

    fn begin_execute_interrupt(&mut self) {
        self.opcode_byte = 0x00;
        self.opcode = self.table[0x00];
        self.begin_execute();
    }

    /// One Load cycle. Returns None when the mode resolved without needing
    /// a transaction this call (the caller then falls through to Execute).
    fn load_cycle(&mut self, bus: &mut dyn Bus) -> Option<Result<(), CpuError>> {
        let mnemonic = self.opcode.mnemonic;
        match self.opcode.mode {
            Mode::ZeroPage => {
                self.operand_lo = self.read(bus, AccessKind::OperandZeroPage, self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.effective = self.operand_lo as u16;
                self.begin_execute();
                Some(Ok(()))
            }
            Mode::ZeroPageX | Mode::ZeroPageY => {
                let (kind, index) = if self.opcode.mode == Mode::ZeroPageX {
                    (AccessKind::OperandZeroPageX, self.regs.x)
                } else {
                    (AccessKind::OperandZeroPageY, self.regs.y)
                };
                match self.step {
                    0 => {
                        self.operand_lo = self.read(bus, kind, self.regs.pc);
                        self.regs.pc = self.regs.pc.wrapping_add(1);
                        Some(Ok(()))
                    }
                    _ => {
                        // 6502 bug: zero page indexing never leaves the
                        // zero page; the pre-index address is read first.
                        self.read(bus, AccessKind::DummyRead, self.operand_lo as u16);
                        self.effective = self.operand_lo.wrapping_add(index) as u16;
                        self.begin_execute();
                        Some(Ok(()))
                    }
                }
            }
            Mode::Absolute if mnemonic == Mnemonic::JSR => self.jsr_cycle(bus),
            Mode::Absolute => match self.step {
                0 => {
                    self.operand_lo = self.read(bus, AccessKind::OperandAbsoluteLow, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    Some(Ok(()))
                }
                _ => {
                    self.operand_hi = self.read(bus, AccessKind::OperandAbsoluteHigh, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    self.effective = u16::from_le_bytes([self.operand_lo, self.operand_hi]);
                    if mnemonic == Mnemonic::JMP {
                        self.regs.pc = self.effective;
                        self.finish_instruction();
                    } else {
                        self.begin_execute();
                    }
                    Some(Ok(()))
                }
            },
            Mode::AbsoluteX | Mode::AbsoluteY => {
                let (kind_lo, kind_hi, index) = if self.opcode.mode == Mode::AbsoluteX {
                    (
                        AccessKind::OperandAbsoluteXLow,
                        AccessKind::OperandAbsoluteXHigh,
                        self.regs.x,
                    )
                } else {
                    (
                        AccessKind::OperandAbsoluteYLow,
                        AccessKind::OperandAbsoluteYHigh,
                        self.regs.y,
                    )
                };
                match self.step {
                    0 => {
                        self.operand_lo = self.read(bus, kind_lo, self.regs.pc);
                        self.regs.pc = self.regs.pc.wrapping_add(1);
                        Some(Ok(()))
                    }
                    1 => {
                        self.operand_hi = self.read(bus, kind_hi, self.regs.pc);
                        self.regs.pc = self.regs.pc.wrapping_add(1);
                        let base = u16::from_le_bytes([self.operand_lo, self.operand_hi]);
                        self.effective = base.wrapping_add(index as u16);
                        self.crossed = (base ^ self.effective) & 0xff00 != 0;
                        Some(Ok(()))
                    }
                    _ => self.indexed_penalty_cycle(bus),
                }
            }
            Mode::IndirectX => match self.step {
                0 => {
                    self.operand_lo = self.read(bus, AccessKind::OperandIndirectX, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    Some(Ok(()))
                }
                1 => {
                    self.read(bus, AccessKind::DummyRead, self.operand_lo as u16);
                    Some(Ok(()))
                }
                2 => {
                    let ptr = self.operand_lo.wrapping_add(self.regs.x);
                    self.operand_hi =
                        self.read(bus, AccessKind::OperandIndirectXResolveLow, ptr as u16);
                    Some(Ok(()))
                }
                _ => {
                    let ptr = self.operand_lo.wrapping_add(self.regs.x).wrapping_add(1);
                    let hi = self.read(bus, AccessKind::OperandIndirectXResolveHigh, ptr as u16);
                    self.effective = u16::from_le_bytes([self.operand_hi, hi]);
                    self.begin_execute();
                    Some(Ok(()))
                }
            },
            Mode::IndirectY => match self.step {
                0 => {
                    self.operand_lo = self.read(bus, AccessKind::OperandIndirectY, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    Some(Ok(()))
                }
                1 => {
                    self.operand_hi = self.read(
                        bus,
                        AccessKind::OperandIndirectYResolveLow,
                        self.operand_lo as u16,
                    );
                    Some(Ok(()))
                }
                2 => {
                    let ptr = self.operand_lo.wrapping_add(1);
                    let hi = self.read(bus, AccessKind::OperandIndirectYResolveHigh, ptr as u16);
                    let base = u16::from_le_bytes([self.operand_hi, hi]);
                    // The high operand byte holds the base page for the
                    // unstable-store instructions.
                    self.operand_lo = self.operand_hi;
                    self.operand_hi = hi;
                    self.effective = base.wrapping_add(self.regs.y as u16);
                    self.crossed = (base ^ self.effective) & 0xff00 != 0;
                    Some(Ok(()))
                }
                _ => self.indexed_penalty_cycle(bus),
            },
            Mode::Indirect => match self.step {
                0 => {
                    self.operand_lo = self.read(bus, AccessKind::OperandIndirectLow, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    Some(Ok(()))
                }
                1 => {
                    self.operand_hi =
                        self.read(bus, AccessKind::OperandIndirectHigh, self.regs.pc);
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    Some(Ok(()))
                }
                2 => {
                    let ptr = u16::from_le_bytes([self.operand_lo, self.operand_hi]);
                    self.effective =
                        self.read(bus, AccessKind::OperandIndirectResolveLow, ptr) as u16;
                    Some(Ok(()))
                }
                _ => {
                    // 6502 bug: the pointer high byte is fetched without
                    // carrying into the pointer's page.
                    let ptr = u16::from_le_bytes([self.operand_lo, self.operand_hi]);
                    let ptr_hi = (ptr & 0xff00) | ((ptr.wrapping_add(1)) & 0x00ff);
                    let hi = self.read(bus, AccessKind::OperandIndirectResolveHigh, ptr_hi);
                    self.regs.pc = (hi as u16) << 8 | self.effective;
                    self.finish_instruction();
                    Some(Ok(()))
                }
            },
            Mode::Implied | Mode::Accumulator | Mode::Immediate | Mode::Relative
            | Mode::Unknown => {
                // These never enter Load; Fetch routes them to Execute.
                self.begin_execute();
                None
            }
        }
    }

    /// The cycle after an indexed high byte: reads always skip it unless
    /// the index carried into the next page; writes and RMW burn it
    /// unconditionally, re-reading the un-carried address.
    fn indexed_penalty_cycle(&mut self, bus: &mut dyn Bus) -> Option<Result<(), CpuError>> {
        let needs_penalty = match memory_op(self.opcode.mnemonic) {
            MemoryOp::Read => self.crossed,
            MemoryOp::Write | MemoryOp::ReadModifyWrite => true,
            MemoryOp::None => false,
        };
        if !needs_penalty {
            self.begin_execute();
            return None;
        }
        let uncarried = (self.effective & 0x00ff) | ((self.effective.wrapping_sub(0x0100)) & 0xff00);
        let addr = if self.crossed { uncarried } else { self.effective };
        self.read(bus, AccessKind::DummyRead, addr);
        self.begin_execute();
        Some(Ok(()))
    }

    fn jsr_cycle(&mut self, bus: &mut dyn Bus) -> Option<Result<(), CpuError>> {
        match self.step {
            0 => {
                self.operand_lo = self.read(bus, AccessKind::OperandJsrAbsoluteLow, self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                Some(Ok(()))
            }
            1 => {
                self.dummy_stack_read(bus);
                Some(Ok(()))
            }
            2 => {
                // PC now names the high operand byte; this is the value a
                // matching RTS increments past.
                let bytes = self.regs.pc.to_le_bytes();
                self.push(bus, AccessKind::StackPushPcHigh, bytes[1]);
                Some(Ok(()))
            }
            3 => {
                let bytes = self.regs.pc.to_le_bytes();
                self.push(bus, AccessKind::StackPushPcLow, bytes[0]);
                Some(Ok(()))
            }
            _ => {
                let hi = self.read(bus, AccessKind::OperandJsrAbsoluteHigh, self.regs.pc);
                self.regs.pc = u16::from_le_bytes([self.operand_lo, hi]);
                self.finish_instruction();
                Some(Ok(()))
            }
        }
    }

    fn execute_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        if self.servicing != Interrupt::None || self.opcode.mnemonic == Mnemonic::BRK {
            return self.interrupt_cycle(bus);
        }
        let mnemonic = self.opcode.mnemonic;
        match mnemonic {
            Mnemonic::BPL
            | Mnemonic::BMI
            | Mnemonic::BVC
            | Mnemonic::BVS
            | Mnemonic::BCC
            | Mnemonic::BCS
            | Mnemonic::BNE
            | Mnemonic::BEQ => return self.branch_cycle(bus),
            Mnemonic::PHA | Mnemonic::PHP => return self.push_cycle(bus),
            Mnemonic::PLA | Mnemonic::PLP => return self.pull_cycle(bus),
            Mnemonic::RTS => return self.rts_cycle(bus),
            Mnemonic::RTI => return self.rti_cycle(bus),
            Mnemonic::JAM => {
                self.jammed = true;
                log::debug!("jam opcode {:#04x} at {:#06x}", self.opcode_byte, self.opcode_addr);
                self.read(bus, AccessKind::DummyRead, 0xfffe);
                self.finish_instruction();
                return Ok(());
            }
            _ => {}
        }

        match self.opcode.mode {
            Mode::Implied | Mode::Accumulator => {
                // One spin cycle reading (and discarding) the next byte.
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                execute::implied_or_accumulator(&mut self.regs, mnemonic);
                self.finish_instruction();
                Ok(())
            }
            _ => match memory_op(mnemonic) {
                MemoryOp::Read => {
                    let kind = if self.opcode.mode == Mode::Immediate {
                        AccessKind::OperandImmediate
                    } else {
                        AccessKind::ExecuteRead
                    };
                    let value = self.read(bus, kind, self.effective);
                    execute::read_op(&mut self.regs, mnemonic, value);
                    self.finish_instruction();
                    Ok(())
                }
                MemoryOp::Write => {
                    let (addr, value) = self.store_target(mnemonic);
                    self.write(bus, AccessKind::ExecuteWrite, addr, value);
                    self.finish_instruction();
                    Ok(())
                }
                MemoryOp::ReadModifyWrite => self.rmw_cycle(bus),
                MemoryOp::None => {
                    // Every remaining mnemonic is implied-mode and already
                    // handled above; decoding cannot produce this.
                    self.read(bus, AccessKind::DummyRead, self.regs.pc);
                    self.finish_instruction();
                    Ok(())
                }
            },
        }
    }

    /// Store value and (possibly corrupted) address for the plain stores
    /// and the unstable SHA/SHX/SHY/TAS family.
    fn store_target(&mut self, mnemonic: Mnemonic) -> (u16, u8) {
        let regs = &mut self.regs;
        let hi = self.operand_hi;
        let unstable = |reg: u8| reg & hi.wrapping_add(1);
        let value = match mnemonic {
            Mnemonic::STA => regs.a,
            Mnemonic::STX => regs.x,
            Mnemonic::STY => regs.y,
            Mnemonic::SAX => regs.a & regs.x,
            Mnemonic::SHA => unstable(regs.a & regs.x),
            Mnemonic::SHX => unstable(regs.x),
            Mnemonic::SHY => unstable(regs.y),
            Mnemonic::TAS => {
                regs.s = regs.a & regs.x;
                unstable(regs.s)
            }
            _ => unreachable!("not a store mnemonic"),
        };
        let mut addr = self.effective;
        if self.crossed && matches!(mnemonic, Mnemonic::SHA | Mnemonic::SHX | Mnemonic::SHY | Mnemonic::TAS) {
            // The unstable stores lose the index carry: the target high
            // byte collapses to reg AND the base page.
            let reg = match mnemonic {
                Mnemonic::SHA => regs.a & regs.x,
                Mnemonic::SHX => regs.x,
                Mnemonic::SHY => regs.y,
                Mnemonic::TAS => regs.s,
                _ => unreachable!(),
            };
            addr = (addr & 0x00ff) | (((reg & hi) as u16) << 8);
        }
        (addr, value)
    }

    fn rmw_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        match self.step {
            0 => {
                self.operand_lo = self.read(bus, AccessKind::ExecuteRead, self.effective);
                Ok(())
            }
            1 => {
                // The hardware writes the unmodified value back while the
                // ALU works on it.
                self.write(bus, AccessKind::DummyWrite, self.effective, self.operand_lo);
                Ok(())
            }
            _ => {
                let modified =
                    execute::modify_op(&mut self.regs, self.opcode.mnemonic, self.operand_lo);
                self.write(bus, AccessKind::ExecuteWrite, self.effective, modified);
                self.finish_instruction();
                Ok(())
            }
        }
    }

    fn branch_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        match self.step {
            0 => {
                self.operand_lo = self.read(bus, AccessKind::OperandRelative, self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let taken = execute::branch_taken(&self.regs, self.opcode.mnemonic);
                if !taken {
                    self.finish_instruction();
                    return Ok(());
                }
                let offset = self.operand_lo as i8;
                self.effective = self.regs.pc.wrapping_add(offset as u16);
                // The extra page-cross cycle applies when the target leaves
                // the page the branch opcode itself sits on.
                self.crossed = (self.effective ^ self.opcode_addr) & 0xff00 != 0;
                Ok(())
            }
            1 => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                if !self.crossed {
                    self.regs.pc = self.effective;
                    self.finish_instruction();
                    return Ok(());
                }
                // Intermediate PC with only the low byte patched.
                self.regs.pc = (self.regs.pc & 0xff00) | (self.effective & 0x00ff);
                Ok(())
            }
            _ => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                self.regs.pc = self.effective;
                self.finish_instruction();
                Ok(())
            }
        }
    }

    fn push_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        match self.step {
            0 => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                Ok(())
            }
            _ => {
                match self.opcode.mnemonic {
                    Mnemonic::PHA => {
                        let a = self.regs.a;
                        self.push(bus, AccessKind::StackPushA, a);
                    }
                    _ => {
                        // PHP pushes P with B and the unused bit set.
                        let p = self.regs.p
                            | StatusFlag::Break as u8
                            | StatusFlag::Push as u8;
                        self.push(bus, AccessKind::StackPushP, p);
                    }
                }
                self.finish_instruction();
                Ok(())
            }
        }
    }

    fn pull_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        match self.step {
            0 => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                Ok(())
            }
            1 => {
                self.dummy_stack_read(bus);
                Ok(())
            }
            _ => {
                match self.opcode.mnemonic {
                    Mnemonic::PLA => {
                        let value = self.pull(bus, AccessKind::StackPullA);
                        self.regs.a = value;
                        self.regs.update_zero_and_negative_flag(value);
                    }
                    _ => {
                        let value = self.pull(bus, AccessKind::StackPullP);
                        // Bits 4 and 5 do not exist in the register; they
                        // read back as set.
                        self.regs.p =
                            value | StatusFlag::Break as u8 | StatusFlag::Push as u8;
                    }
                }
                self.finish_instruction();
                Ok(())
            }
        }
    }

    fn rts_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        match self.step {
            0 => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                Ok(())
            }
            1 => {
                self.dummy_stack_read(bus);
                Ok(())
            }
            2 => {
                self.operand_lo = self.pull(bus, AccessKind::StackPullPcLow);
                Ok(())
            }
            3 => {
                let hi = self.pull(bus, AccessKind::StackPullPcHigh);
                self.regs.pc = u16::from_le_bytes([self.operand_lo, hi]);
                Ok(())
            }
            _ => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.finish_instruction();
                Ok(())
            }
        }
    }

    fn rti_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        match self.step {
            0 => {
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                Ok(())
            }
            1 => {
                self.dummy_stack_read(bus);
                Ok(())
            }
            2 => {
                let value = self.pull(bus, AccessKind::StackPullP);
                self.regs.p = value | StatusFlag::Break as u8 | StatusFlag::Push as u8;
                Ok(())
            }
            3 => {
                self.operand_lo = self.pull(bus, AccessKind::StackPullPcLow);
                Ok(())
            }
            _ => {
                let hi = self.pull(bus, AccessKind::StackPullPcHigh);
                self.regs.pc = u16::from_le_bytes([self.operand_lo, hi]);
                self.finish_instruction();
                Ok(())
            }
        }
    }

    /// The seven-cycle BRK shape shared by the software instruction and
    /// all three hardware interruptions. Reset turns the stack pushes into
    /// reads and pushes nothing.
    fn interrupt_cycle(&mut self, bus: &mut dyn Bus) -> Result<(), CpuError> {
        let servicing = self.servicing;
        let is_reset = servicing == Interrupt::Reset;
        match self.step {
            0 => {
                // BRK consumes a padding byte; hardware interrupts leave PC
                // alone.
                self.read(bus, AccessKind::DummyRead, self.regs.pc);
                if servicing == Interrupt::None {
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                }
                Ok(())
            }
            1 => {
                if is_reset {
                    self.dummy_stack_read(bus);
                    self.regs.s = self.regs.s.wrapping_sub(1);
                } else {
                    let bytes = self.regs.pc.to_le_bytes();
                    self.push(bus, AccessKind::StackPushPcHigh, bytes[1]);
                }
                Ok(())
            }
            2 => {
                if is_reset {
                    self.dummy_stack_read(bus);
                    self.regs.s = self.regs.s.wrapping_sub(1);
                } else {
                    let bytes = self.regs.pc.to_le_bytes();
                    self.push(bus, AccessKind::StackPushPcLow, bytes[0]);
                }
                Ok(())
            }
            3 => {
                if is_reset {
                    self.dummy_stack_read(bus);
                    self.regs.s = self.regs.s.wrapping_sub(1);
                } else {
                    // B distinguishes a software BRK from a hardware
                    // interrupt in the pushed copy only.
                    let mut p = self.regs.p | StatusFlag::Push as u8;
                    if servicing == Interrupt::None {
                        p |= StatusFlag::Break as u8;
                    } else {
                        p &= !(StatusFlag::Break as u8);
                    }
                    self.push(bus, AccessKind::StackPushP, p);
                }
                Ok(())
            }
            4 => {
                let vector = self.vector_for(servicing);
                self.operand_lo = self.read(bus, AccessKind::InterruptVectorLow, vector);
                self.regs
                    .set_status_flag(StatusFlag::InterruptDisable, true);
                Ok(())
            }
            _ => {
                let vector = self.vector_for(servicing).wrapping_add(1);
                let hi = self.read(bus, AccessKind::InterruptVectorHigh, vector);
                self.regs.pc = u16::from_le_bytes([self.operand_lo, hi]);
                if is_reset {
                    self.regs.p |= RESET_STATUS_FLAG;
                    if self.cold_boot {
                        // A cold boot starts from a defined top of stack
                        // instead of the three suppressed pushes.
                        self.regs.s = 0xfd;
                        self.cold_boot = false;
                    }
                }
                self.finish_instruction();
                Ok(())
            }
        }
    }

    fn vector_for(&self, interrupt: Interrupt) -> u16 {
        match interrupt {
            Interrupt::Nmi => InterruptVectors::NonMaskableInterrupt as u16,
            Interrupt::Reset => InterruptVectors::ResetVector as u16,
            Interrupt::Irq | Interrupt::None => InterruptVectors::IrqBrkVector as u16,
        }
    }
}
