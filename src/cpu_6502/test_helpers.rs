#![macro_use]

use crate::bus::RamBus;
use crate::cpu_6502::*;
use crate::opcodes::Variant;

pub const P: u8 = RESET_STATUS_FLAG;
pub const C: u8 = StatusFlag::Carry as u8;
pub const Z: u8 = StatusFlag::Zero as u8;
pub const I: u8 = StatusFlag::InterruptDisable as u8;
pub const D: u8 = StatusFlag::Decimal as u8;
pub const B: u8 = StatusFlag::Break as u8;
pub const U: u8 = StatusFlag::Push as u8;
pub const V: u8 = StatusFlag::Overflow as u8;
pub const N: u8 = StatusFlag::Negative as u8;

/// Test programs load here, away from the zero page and the stack.
pub const LOAD_ADDR: u16 = 0x0600;

/// Run a byte program until it hits the JAM appended to its end, and
/// hand back the CPU and the memory it ran against.
pub fn run_program(program: &[u8]) -> (Cpu, RamBus) {
    let mut bytes = program.to_vec();
    bytes.push(0x02); // JAM
    let mut bus = RamBus::load(LOAD_ADDR, &bytes);
    let mut cpu = Cpu::new(Variant::Mos6510);
    cpu.regs.pc = LOAD_ADDR;
    cpu.run_until(&mut bus, |cpu| cpu.is_jammed())
        .expect("test programs only use decodable opcodes");
    (cpu, bus)
}

/// Step exactly `count` instructions and report the cycle count of each.
pub fn run_instructions(program: &[u8], count: usize) -> (Cpu, RamBus, Vec<u8>) {
    let mut bus = RamBus::load(LOAD_ADDR, program);
    let mut cpu = Cpu::new(Variant::Mos6510);
    cpu.regs.pc = LOAD_ADDR;
    let mut cycles = Vec::new();
    for _ in 0..count {
        cpu.step_instruction(&mut bus)
            .expect("test programs only use decodable opcodes");
        cycles.push(cpu.last_instruction_cycles());
    }
    (cpu, bus, cycles)
}

/// Run two's complement on a u8.
pub fn negative(n: u8) -> u8 {
    !n + 1
}

pub fn assert_register_a(program: &[u8], value: u8, status: u8) {
    let (cpu, _) = run_program(program);
    if cpu.regs.a != value {
        panic!(
            "\nExpected register A to be {:#x} ({:#b}) but it was {:#x} ({:#b})",
            value, value, cpu.regs.a, cpu.regs.a
        );
    }
    assert_status(&cpu, status);
}

pub fn assert_register_x(program: &[u8], value: u8, status: u8) {
    let (cpu, _) = run_program(program);
    if cpu.regs.x != value {
        panic!(
            "\nExpected register X to be {:#x} ({:#b}) but it was {:#x} ({:#b})",
            value, value, cpu.regs.x, cpu.regs.x
        );
    }
    assert_status(&cpu, status);
}

pub fn assert_register_y(program: &[u8], value: u8, status: u8) {
    let (cpu, _) = run_program(program);
    if cpu.regs.y != value {
        panic!(
            "\nExpected register Y to be {:#x} ({:#b}) but it was {:#x} ({:#b})",
            value, value, cpu.regs.y, cpu.regs.y
        );
    }
    assert_status(&cpu, status);
}

pub fn assert_status(cpu: &Cpu, value: u8) {
    if cpu.regs.p == value {
        return;
    }
    let flags = [
        ("Carry", C),
        ("Zero", Z),
        ("InterruptDisable", I),
        ("Decimal", D),
        ("Break", B),
        ("Push", U),
        ("Overflow", V),
        ("Negative", N),
    ];
    let mut result = String::new();
    for (name, mask) in flags {
        let expected = value & mask == mask;
        let actual = cpu.regs.p & mask == mask;
        if expected != actual {
            result.push_str(&format!(
                "Expected StatusFlag::{} to be {} but received {}\n",
                name, expected, actual
            ));
        }
    }
    panic!(
        "\nExpected cpu status 0b{:08b} to match 0b{:08b}\n{}",
        cpu.regs.p, value, result
    );
}

#[macro_export]
macro_rules! register_a {
    ($name:ident, $a:expr, $p:expr, $program:expr) => {
        #[test]
        fn $name() {
            assert_register_a(&$program, $a, $p);
        }
    };
}

#[macro_export]
macro_rules! register_x {
    ($name:ident, $x:expr, $p:expr, $program:expr) => {
        #[test]
        fn $name() {
            assert_register_x(&$program, $x, $p);
        }
    };
}

#[macro_export]
macro_rules! register_y {
    ($name:ident, $y:expr, $p:expr, $program:expr) => {
        #[test]
        fn $name() {
            assert_register_y(&$program, $y, $p);
        }
    };
}

#[macro_export]
macro_rules! status {
    ($name:ident, $p:expr, $program:expr) => {
        #[test]
        fn $name() {
            let (cpu, _) = run_program(&$program);
            assert_status(&cpu, $p);
        }
    };
}

#[macro_export]
macro_rules! memory {
    ($name:ident, [$addr:expr, $expected:expr], $program:expr) => {
        #[test]
        fn $name() {
            let (_, bus) = run_program(&$program);
            let actual = bus.memory[$addr as usize];
            if actual != $expected {
                panic!(
                    "\nExpected address {:#x} to contain {:#x} ({:#b}) but it was {:#x} ({:#b})",
                    $addr, $expected, $expected, actual, actual
                );
            }
        }
    };
}
