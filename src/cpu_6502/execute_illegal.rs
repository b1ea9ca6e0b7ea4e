//! The undocumented 6510 instruction set, expressed as compositions of
//! the documented microsteps. The store-side quirks (SHA/SHX/SHY/TAS
//! address corruption) live in the state machine, which owns addresses;
//! everything here is pure register arithmetic.

use super::{execute, Registers, StatusFlag};

/// The magic constant ANE and LXA OR into A before their AND. It varies
/// with temperature and chip revision on real silicon; 0xEE is the value
/// the conformance fixtures settled on.
const UNSTABLE_MASK: u8 = 0xee;

/// Function: A,X:={adr}
/// Flags: N Z
pub(crate) fn lax(regs: &mut Registers, value: u8) {
    regs.a = value;
    regs.x = value;
    regs.update_zero_and_negative_flag(value);
}

/// Function: A,X,S:={adr}&S
/// Flags: N Z
pub(crate) fn las(regs: &mut Registers, value: u8) {
    let result = value & regs.s;
    regs.a = result;
    regs.x = result;
    regs.s = result;
    regs.update_zero_and_negative_flag(result);
}

/// Function: A:=(A&#{imm})/2
/// Flags: N Z C
pub(crate) fn alr(regs: &mut Registers, value: u8) {
    let and = regs.a & value;
    regs.a = and >> 1;
    regs.set_status_flag(StatusFlag::Carry, and & 0b0000_0001 != 0);
    regs.update_zero_and_negative_flag(regs.a);
}

/// Function: A:=A&#{imm}, C:=N
/// Flags: N Z C
pub(crate) fn anc(regs: &mut Registers, value: u8) {
    regs.a &= value;
    regs.update_zero_and_negative_flag(regs.a);
    regs.set_status_flag(StatusFlag::Carry, regs.is_status_flag_set(StatusFlag::Negative));
}

/// Function: A:=(A|#$EE)&X&#{imm}
/// Flags: N Z
pub(crate) fn ane(regs: &mut Registers, value: u8) {
    regs.a = (regs.a | UNSTABLE_MASK) & regs.x & value;
    regs.update_zero_and_negative_flag(regs.a);
}

/// Function: A,X:=(A|#$EE)&#{imm}
/// Flags: N Z
pub(crate) fn lxa(regs: &mut Registers, value: u8) {
    let result = (regs.a | UNSTABLE_MASK) & value;
    regs.a = result;
    regs.x = result;
    regs.update_zero_and_negative_flag(result);
}

/// Function: A:=(A&#{imm}) ror
/// Flags: N V Z C
///
/// The rotate lands between the AND and the flag evaluation, and with D
/// set the high nibble takes the half-subtract BCD fixup. C and V come
/// from bits 6 and 5 of the rotated value, not from an add.
pub(crate) fn arr(regs: &mut Registers, value: u8) {
    let and = regs.a & value;
    let rotated = (and >> 1) | (regs.get_carry() << 7);

    if regs.is_status_flag_set(StatusFlag::Decimal) {
        regs.update_zero_and_negative_flag(rotated);
        regs.set_status_flag(StatusFlag::Overflow, (rotated ^ and) & 0x40 != 0);

        let mut result = rotated;
        if (and & 0x0f) + (and & 0x01) > 0x05 {
            result = (result & 0xf0) | (result.wrapping_add(0x06) & 0x0f);
        }
        if (and & 0xf0) + (and & 0x10) > 0x50 {
            result = result.wrapping_add(0x60);
            regs.set_status_flag(StatusFlag::Carry, true);
        } else {
            regs.set_status_flag(StatusFlag::Carry, false);
        }
        regs.a = result;
    } else {
        regs.a = rotated;
        regs.update_zero_and_negative_flag(rotated);
        regs.set_status_flag(StatusFlag::Carry, rotated & 0b0100_0000 != 0);
        regs.set_status_flag(
            StatusFlag::Overflow,
            ((rotated >> 6) ^ (rotated >> 5)) & 0b0000_0001 != 0,
        );
    }
}

/// Function: X:=(A&X)-#{imm}
/// Flags: N Z C
pub(crate) fn sbx(regs: &mut Registers, value: u8) {
    let and = regs.a & regs.x;
    regs.set_status_flag(StatusFlag::Carry, and >= value);
    regs.x = and.wrapping_sub(value);
    regs.update_zero_and_negative_flag(regs.x);
}

/// Function: {adr}:={adr}*2 A:=A or {adr}
/// Flags: N Z C
pub(crate) fn slo(regs: &mut Registers, value: u8) -> u8 {
    let shifted = execute::asl(regs, value);
    regs.a |= shifted;
    regs.update_zero_and_negative_flag(regs.a);
    shifted
}

/// Function: {adr}:={adr}/2 A:=A exor {adr}
/// Flags: N Z C
pub(crate) fn sre(regs: &mut Registers, value: u8) -> u8 {
    let shifted = execute::lsr(regs, value);
    regs.a ^= shifted;
    regs.update_zero_and_negative_flag(regs.a);
    shifted
}

/// Function: {adr}:={adr} rol A:=A and {adr}
/// Flags: N Z C
pub(crate) fn rla(regs: &mut Registers, value: u8) -> u8 {
    let rotated = execute::rol(regs, value);
    regs.a &= rotated;
    regs.update_zero_and_negative_flag(regs.a);
    rotated
}

/// Function: {adr}:={adr} ror A:=A adc {adr}
/// Flags: N V Z C
pub(crate) fn rra(regs: &mut Registers, value: u8) -> u8 {
    let rotated = execute::ror(regs, value);
    // The ADC sees the rotate's carry-out, decimal mode included.
    execute::adc(regs, rotated);
    rotated
}

/// Function: {adr}:={adr}+1 A:=A-{adr}
/// Flags: N V Z C
pub(crate) fn isc(regs: &mut Registers, value: u8) -> u8 {
    let incremented = value.wrapping_add(1);
    execute::sbc(regs, incremented);
    incremented
}

/// Function: {adr}:={adr}-1 A-{adr}
/// Flags: N Z C
pub(crate) fn dcp(regs: &mut Registers, value: u8) -> u8 {
    let decremented = value.wrapping_sub(1);
    regs.update_zero_and_negative_flag(regs.a.wrapping_sub(decremented));
    regs.set_status_flag(StatusFlag::Carry, regs.a >= decremented);
    decremented
}
