//! The single-byte memory bus the CPU talks to, plus the trace channel
//! that tells an observing bus what the next access is for. The relocator
//! plugs in here; so do the flat test memories.

use crate::cpu_6502::Registers;

/// What the upcoming bus access is for. The CPU announces exactly one of
/// these via [`Bus::trace`] immediately before every read or write, one
/// per emulated cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    OpcodeFetch,
    /// The data byte of an immediate instruction, read at PC by Execute.
    OperandImmediate,
    /// The branch offset byte.
    OperandRelative,
    OperandZeroPage,
    OperandZeroPageX,
    OperandZeroPageY,
    OperandAbsoluteLow,
    OperandAbsoluteHigh,
    OperandAbsoluteXLow,
    OperandAbsoluteXHigh,
    OperandAbsoluteYLow,
    OperandAbsoluteYHigh,
    /// JSR reads its target low byte before the stack pushes and the high
    /// byte after them; both get their own tags.
    OperandJsrAbsoluteLow,
    OperandJsrAbsoluteHigh,
    /// The two bytes naming a JMP (ind) pointer location.
    OperandIndirectLow,
    OperandIndirectHigh,
    /// The pointed-at address being fetched for JMP (ind).
    OperandIndirectResolveLow,
    OperandIndirectResolveHigh,
    /// The zero-page pointer location byte of (zp,X).
    OperandIndirectX,
    OperandIndirectXResolveLow,
    OperandIndirectXResolveHigh,
    /// The zero-page pointer location byte of (zp),Y.
    OperandIndirectY,
    OperandIndirectYResolveLow,
    OperandIndirectYResolveHigh,
    /// A read whose value the CPU throws away (alignment/penalty cycles).
    DummyRead,
    /// The unmodified-value write an RMW instruction performs before the
    /// real one.
    DummyWrite,
    /// The data access of the Execute state.
    ExecuteRead,
    ExecuteWrite,
    StackPushA,
    StackPushP,
    /// PC halves pushed by JSR, BRK and hardware interrupts.
    StackPushPcHigh,
    StackPushPcLow,
    StackPullA,
    StackPullP,
    /// PC halves pulled by RTS and RTI.
    StackPullPcLow,
    StackPullPcHigh,
    InterruptVectorLow,
    InterruptVectorHigh,
}

impl AccessKind {
    /// Dummy transactions exist purely for cycle accuracy and are ignored
    /// by provenance analysis.
    pub fn is_dummy(self) -> bool {
        matches!(self, AccessKind::DummyRead | AccessKind::DummyWrite)
    }
}

/// The byte read/write contract between the CPU and whatever holds its
/// memory. `trace` is called exactly once immediately before the matching
/// `read` or `write` of the same cycle, carrying the access kind and a
/// snapshot of the register file so an analyzing bus can resolve indexed
/// addresses without reaching back into the CPU. A bus must never mutate
/// CPU state.
pub trait Bus {
    fn trace(&mut self, _kind: AccessKind, _regs: &Registers) {}
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
}

/// The bus used when none is attached: every read returns NOP so a
/// runaway CPU glides harmlessly through memory.
pub struct NullBus;

impl Bus for NullBus {
    fn read(&mut self, _addr: u16) -> u8 {
        0xea
    }

    fn write(&mut self, _addr: u16, _value: u8) {}
}

/// A flat 64 KiB RAM. This is not real hardware's memory map, it is the
/// simplest thing a test program can run against.
pub struct RamBus {
    pub memory: Box<[u8; 0x10000]>,
}

impl RamBus {
    pub fn new() -> RamBus {
        RamBus {
            memory: Box::new([0; 0x10000]),
        }
    }

    /// Copy a program into memory at the given origin.
    pub fn load(origin: u16, program: &[u8]) -> RamBus {
        let mut bus = RamBus::new();
        for (index, value) in program.iter().enumerate() {
            bus.memory[origin as usize + index] = *value;
        }
        bus
    }
}

impl Bus for RamBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory[addr as usize] = value;
    }
}

/// A [`RamBus`] that additionally logs every `(kind, addr, value)` triple,
/// one per cycle, so tests can assert the exact bus sequence an
/// instruction produces.
pub struct RecordingBus {
    pub ram: RamBus,
    pub accesses: Vec<(AccessKind, u16, u8)>,
    latched_kind: Option<AccessKind>,
}

impl RecordingBus {
    pub fn load(origin: u16, program: &[u8]) -> RecordingBus {
        RecordingBus {
            ram: RamBus::load(origin, program),
            accesses: Vec::new(),
            latched_kind: None,
        }
    }

    pub fn clear(&mut self) {
        self.accesses.clear();
    }

    /// The recorded kinds alone, which is what the timing tests compare.
    pub fn kinds(&self) -> Vec<AccessKind> {
        self.accesses.iter().map(|(kind, _, _)| *kind).collect()
    }
}

impl Bus for RecordingBus {
    fn trace(&mut self, kind: AccessKind, _regs: &Registers) {
        self.latched_kind = Some(kind);
    }

    fn read(&mut self, addr: u16) -> u8 {
        let value = self.ram.read(addr);
        let kind = self.latched_kind.take().expect("read without trace");
        self.accesses.push((kind, addr, value));
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.ram.write(addr, value);
        let kind = self.latched_kind.take().expect("write without trace");
        self.accesses.push((kind, addr, value));
    }
}
