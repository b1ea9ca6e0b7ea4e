//! Register and flag semantics for the documented instruction set. The
//! state machine in the parent module owns all bus traffic; the functions
//! here only consume already-fetched values and update the register file.

use super::{execute_illegal, Registers, StatusFlag};
use crate::opcodes::Mnemonic;

/// Everything that runs in a single spin cycle: flag changes, register
/// transfers, increments, and the accumulator-mode shifts.
pub(crate) fn implied_or_accumulator(regs: &mut Registers, mnemonic: Mnemonic) {
    match mnemonic {
        Mnemonic::CLC => regs.set_status_flag(StatusFlag::Carry, false),
        Mnemonic::SEC => regs.set_status_flag(StatusFlag::Carry, true),
        Mnemonic::CLD => regs.set_status_flag(StatusFlag::Decimal, false),
        Mnemonic::SED => regs.set_status_flag(StatusFlag::Decimal, true),
        Mnemonic::CLI => regs.set_status_flag(StatusFlag::InterruptDisable, false),
        Mnemonic::SEI => regs.set_status_flag(StatusFlag::InterruptDisable, true),
        Mnemonic::CLV => regs.set_status_flag(StatusFlag::Overflow, false),
        Mnemonic::TAX => {
            regs.x = regs.a;
            regs.update_zero_and_negative_flag(regs.x);
        }
        Mnemonic::TXA => {
            regs.a = regs.x;
            regs.update_zero_and_negative_flag(regs.a);
        }
        Mnemonic::TAY => {
            regs.y = regs.a;
            regs.update_zero_and_negative_flag(regs.y);
        }
        Mnemonic::TYA => {
            regs.a = regs.y;
            regs.update_zero_and_negative_flag(regs.a);
        }
        Mnemonic::TSX => {
            regs.x = regs.s;
            regs.update_zero_and_negative_flag(regs.x);
        }
        // TXS touches no flags.
        Mnemonic::TXS => regs.s = regs.x,
        Mnemonic::INX => {
            regs.x = regs.x.wrapping_add(1);
            regs.update_zero_and_negative_flag(regs.x);
        }
        Mnemonic::DEX => {
            regs.x = regs.x.wrapping_sub(1);
            regs.update_zero_and_negative_flag(regs.x);
        }
        Mnemonic::INY => {
            regs.y = regs.y.wrapping_add(1);
            regs.update_zero_and_negative_flag(regs.y);
        }
        Mnemonic::DEY => {
            regs.y = regs.y.wrapping_sub(1);
            regs.update_zero_and_negative_flag(regs.y);
        }
        Mnemonic::ASL => {
            let value = regs.a;
            regs.a = asl(regs, value);
        }
        Mnemonic::LSR => {
            let value = regs.a;
            regs.a = lsr(regs, value);
        }
        Mnemonic::ROL => {
            let value = regs.a;
            regs.a = rol(regs, value);
        }
        Mnemonic::ROR => {
            let value = regs.a;
            regs.a = ror(regs, value);
        }
        Mnemonic::NOP => {}
        _ => unreachable!("not an implied/accumulator mnemonic"),
    }
}

/// Instructions whose Execute is a single data read.
pub(crate) fn read_op(regs: &mut Registers, mnemonic: Mnemonic, value: u8) {
    match mnemonic {
        Mnemonic::LDA => {
            regs.a = value;
            regs.update_zero_and_negative_flag(value);
        }
        Mnemonic::LDX => {
            regs.x = value;
            regs.update_zero_and_negative_flag(value);
        }
        Mnemonic::LDY => {
            regs.y = value;
            regs.update_zero_and_negative_flag(value);
        }
        Mnemonic::ORA => {
            regs.a |= value;
            regs.update_zero_and_negative_flag(regs.a);
        }
        Mnemonic::AND => {
            regs.a &= value;
            regs.update_zero_and_negative_flag(regs.a);
        }
        Mnemonic::EOR => {
            regs.a ^= value;
            regs.update_zero_and_negative_flag(regs.a);
        }
        Mnemonic::ADC => adc(regs, value),
        Mnemonic::SBC | Mnemonic::USBC => sbc(regs, value),
        Mnemonic::CMP => {
            let register = regs.a;
            compare(regs, register, value);
        }
        Mnemonic::CPX => {
            let register = regs.x;
            compare(regs, register, value);
        }
        Mnemonic::CPY => {
            let register = regs.y;
            compare(regs, register, value);
        }
        Mnemonic::BIT => bit(regs, value),
        // Multi-byte NOPs read and discard.
        Mnemonic::NOP => {}
        Mnemonic::LAX => execute_illegal::lax(regs, value),
        Mnemonic::LAS => execute_illegal::las(regs, value),
        Mnemonic::ALR => execute_illegal::alr(regs, value),
        Mnemonic::ANC => execute_illegal::anc(regs, value),
        Mnemonic::ANE => execute_illegal::ane(regs, value),
        Mnemonic::ARR => execute_illegal::arr(regs, value),
        Mnemonic::LXA => execute_illegal::lxa(regs, value),
        Mnemonic::SBX => execute_illegal::sbx(regs, value),
        _ => unreachable!("not a read mnemonic"),
    }
}

/// The modify half of a read-modify-write instruction: value in, modified
/// value out (the caller writes it back on the final cycle).
pub(crate) fn modify_op(regs: &mut Registers, mnemonic: Mnemonic, value: u8) -> u8 {
    match mnemonic {
        Mnemonic::ASL => asl(regs, value),
        Mnemonic::LSR => lsr(regs, value),
        Mnemonic::ROL => rol(regs, value),
        Mnemonic::ROR => ror(regs, value),
        Mnemonic::INC => {
            let result = value.wrapping_add(1);
            regs.update_zero_and_negative_flag(result);
            result
        }
        Mnemonic::DEC => {
            let result = value.wrapping_sub(1);
            regs.update_zero_and_negative_flag(result);
            result
        }
        Mnemonic::SLO => execute_illegal::slo(regs, value),
        Mnemonic::SRE => execute_illegal::sre(regs, value),
        Mnemonic::RLA => execute_illegal::rla(regs, value),
        Mnemonic::RRA => execute_illegal::rra(regs, value),
        Mnemonic::ISC => execute_illegal::isc(regs, value),
        Mnemonic::DCP => execute_illegal::dcp(regs, value),
        _ => unreachable!("not a read-modify-write mnemonic"),
    }
}

pub(crate) fn branch_taken(regs: &Registers, mnemonic: Mnemonic) -> bool {
    match mnemonic {
        Mnemonic::BPL => !regs.is_status_flag_set(StatusFlag::Negative),
        Mnemonic::BMI => regs.is_status_flag_set(StatusFlag::Negative),
        Mnemonic::BVC => !regs.is_status_flag_set(StatusFlag::Overflow),
        Mnemonic::BVS => regs.is_status_flag_set(StatusFlag::Overflow),
        Mnemonic::BCC => !regs.is_status_flag_set(StatusFlag::Carry),
        Mnemonic::BCS => regs.is_status_flag_set(StatusFlag::Carry),
        Mnemonic::BNE => !regs.is_status_flag_set(StatusFlag::Zero),
        Mnemonic::BEQ => regs.is_status_flag_set(StatusFlag::Zero),
        _ => unreachable!("not a branch mnemonic"),
    }
}

/// Add with Carry
/// Function: A:=A+{adr}+C
/// Flags: N V Z C
///
/// With D set, the binary sum decides Z, the signed intermediate decides
/// N and V, and the nibble corrections decide A and C.
pub(crate) fn adc(regs: &mut Registers, operand: u8) {
    if regs.is_status_flag_set(StatusFlag::Decimal) {
        adc_decimal(regs, operand);
    } else {
        add_binary(regs, operand);
    }
}

/// Subtract with Carry
/// Function: A:=A-{adr}+C
/// Flags: N V Z C
///
/// The two's complement is formed by inverting the operand and letting
/// the carry flag supply the +1, so assembly runs SEC before a lone SBC.
pub(crate) fn sbc(regs: &mut Registers, operand: u8) {
    if regs.is_status_flag_set(StatusFlag::Decimal) {
        sbc_decimal(regs, operand);
    } else {
        add_binary(regs, !operand);
    }
}

fn add_binary(regs: &mut Registers, operand: u8) {
    // Operate in u16 space so the 9th bit survives.
    let result_u16 = regs.get_carry() as u16 + regs.a as u16 + operand as u16;
    let result_u8 = result_u16 as u8;

    regs.update_zero_and_negative_flag(result_u8);
    regs.update_carry_flag(result_u16);
    update_overflow_flag(regs, operand, result_u8);
    regs.a = result_u8;
}

/// Overflow for ADC and SBC indicates the sign bit changed meaning: both
/// inputs agree on bit 7 and the result disagrees.
fn update_overflow_flag(regs: &mut Registers, operand: u8, result: u8) {
    let bit_7_mask = 0b1000_0000;
    let does_overflow = (bit_7_mask & !(regs.a ^ operand) & (regs.a ^ result)) == bit_7_mask;
    regs.set_status_flag(StatusFlag::Overflow, does_overflow);
}

/// The 6502 BCD correction: low nibble add $06 when it exceeds 9, high
/// nibble add $60 likewise, carry out of the corrected high nibble.
fn adc_decimal(regs: &mut Registers, operand: u8) {
    let carry = regs.get_carry();
    let binary = regs.a as u16 + operand as u16 + carry as u16;

    let mut low = (regs.a & 0x0f) as u16 + (operand & 0x0f) as u16 + carry as u16;
    if low > 0x09 {
        low += 0x06;
    }
    let mut high = (regs.a >> 4) as u16 + (operand >> 4) as u16 + (low > 0x0f) as u16;

    // Z looks at the binary sum; N and V at the pre-correction high nibble.
    regs.set_status_flag(StatusFlag::Zero, binary as u8 == 0);
    regs.set_status_flag(StatusFlag::Negative, high & 0x08 != 0);
    let intermediate = ((high as u8) << 4) | (low as u8 & 0x0f);
    let signed_overflow =
        (regs.a ^ operand) & 0x80 == 0 && (regs.a ^ intermediate) & 0x80 != 0;
    regs.set_status_flag(StatusFlag::Overflow, signed_overflow);

    if high > 0x09 {
        high += 0x06;
    }
    regs.set_status_flag(StatusFlag::Carry, high > 0x0f);
    regs.a = ((high as u8) << 4) | (low as u8 & 0x0f);
}

/// Decimal SBC: all four flags come from the binary difference; only the
/// accumulator takes the nibble corrections.
fn sbc_decimal(regs: &mut Registers, operand: u8) {
    let borrow = 1 - regs.get_carry() as i16;
    let binary = regs.a as i16 - operand as i16 - borrow;

    let mut low = (regs.a & 0x0f) as i16 - (operand & 0x0f) as i16 - borrow;
    let mut high = (regs.a >> 4) as i16 - (operand >> 4) as i16 - (low < 0) as i16;
    if low < 0 {
        low -= 0x06;
    }
    if high < 0 {
        high -= 0x06;
    }

    let result_u8 = binary as u8;
    regs.update_zero_and_negative_flag(result_u8);
    regs.set_status_flag(StatusFlag::Carry, binary >= 0);
    update_overflow_flag(regs, !operand, result_u8);
    regs.a = ((high as u8) << 4) | (low as u8 & 0x0f);
}

/// Compare register with source
/// http://6502.org/tutorials/compare_instructions.html
/// Function: reg-{adr}
/// Flags: N Z C
fn compare(regs: &mut Registers, register: u8, operand: u8) {
    regs.update_zero_and_negative_flag(register.wrapping_sub(operand));
    regs.set_status_flag(StatusFlag::Carry, register >= operand);
}

/// Bit test
/// Function: N:=b7 V:=b6 Z:=A&{adr}
/// Flags: N V Z
fn bit(regs: &mut Registers, operand: u8) {
    let result = regs.a & operand;
    regs.set_status_flag(StatusFlag::Negative, operand & 0b1000_0000 != 0);
    regs.set_status_flag(StatusFlag::Overflow, operand & 0b0100_0000 != 0);
    regs.set_status_flag(StatusFlag::Zero, result == 0);
}

/// Arithmetic shift left
/// Function: {adr}:={adr}*2
/// Flags: N Z C
pub(crate) fn asl(regs: &mut Registers, operand: u8) -> u8 {
    let result = operand << 1;
    regs.update_zero_and_negative_flag(result);
    // The Carry flag contains the bit that was shifted out:
    regs.set_status_flag(StatusFlag::Carry, operand & 0b1000_0000 != 0);
    result
}

/// Logical shift right
/// Function: {adr}:={adr}/2
/// Flags: N Z C
pub(crate) fn lsr(regs: &mut Registers, operand: u8) -> u8 {
    let result = operand >> 1;
    regs.update_zero_and_negative_flag(result);
    regs.set_status_flag(StatusFlag::Carry, operand & 0b0000_0001 != 0);
    result
}

/// Rotate left
/// Function: {adr}:={adr}*2+C
/// Flags: N Z C
pub(crate) fn rol(regs: &mut Registers, operand: u8) -> u8 {
    let result = (operand << 1) | regs.get_carry();
    regs.update_zero_and_negative_flag(result);
    regs.set_status_flag(StatusFlag::Carry, operand & 0b1000_0000 != 0);
    result
}

/// Rotate right
/// Function: {adr}:={adr}/2+C*128
/// Flags: N Z C
pub(crate) fn ror(regs: &mut Registers, operand: u8) -> u8 {
    let result = (operand >> 1) | (regs.get_carry() << 7);
    regs.update_zero_and_negative_flag(result);
    regs.set_status_flag(StatusFlag::Carry, operand & 0b0000_0001 != 0);
    result
}
