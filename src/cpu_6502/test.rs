use crate::bus::{AccessKind, RecordingBus};
use crate::cpu_6502::test_helpers::*;
use crate::cpu_6502::*;
use crate::opcodes::Variant;

/// These tests assert the various operations the CPU can do. The macros
/// take raw byte programs; each one is listed with its assembly in the
/// comments. For instance:
///
///          TestName Register Status  Program
///                 |     |     |      |
///                 v     v     v      v
///     register_a!(adc1, 0x33, P, [0xa9, 0x22, 0x69, 0x11]);
#[rustfmt::skip]
mod immediate_mode {
  use super::*;

  mod adc_basics {
    use super::*;
    // lda #$22 / adc #$11 - 0x22 + 0x11 == 0x33.
    register_a!(adc1, 0x33, P, [0xa9, 0x22, 0x69, 0x11]);
    // lda #$ff / adc #$00 - nothing added, but N is set on the result.
    register_a!(adc2, 0xff, P | N, [0xa9, 0xff, 0x69, 0x00]);
    // lda #$ff / adc #$01 - overflow the u8; carry out, zero result.
    register_a!(adc3, 0x00, P | C | Z, [0xa9, 0xff, 0x69, 0x01]);
    // lda #$ff / adc #$02 - as above but the result is not zero.
    register_a!(adc4, 0x01, P | C, [0xa9, 0xff, 0x69, 0x02]);
    // sec / lda #$11 / adc #$22 - the carry joins the sum.
    register_a!(adc_carry, 0x34, P, [0x38, 0xa9, 0x11, 0x69, 0x22]);
  }

  mod adc_overflow_carry {
    // These cases come from http://www.6502.org/tutorials/vflag.html
    use super::*;
    // clc / lda #$01 / adc #$01 - 1 + 1 = 2, C = 0, V = 0.
    register_a!(test_1_1, 0x02, P, [0x18, 0xa9, 0x01, 0x69, 0x01]);
    // clc / lda #$01 / adc #$ff - 1 + -1 = 0, C = 1, V = 0.
    register_a!(test_1_neg1, 0x00, P | C | Z, [0x18, 0xa9, 0x01, 0x69, 0xff]);
    // clc / lda #$7f / adc #$01 - 127 + 1 = 128 overflows a signed byte.
    register_a!(test_127_1, 0b1000_0000, P | V | N, [0x18, 0xa9, 0x7f, 0x69, 0x01]);
    // clc / lda #$80 / adc #$ff - -128 + -1 = -129 overflows the other way.
    register_a!(neg128_neg1, 0b0111_1111, P | C | V, [0x18, 0xa9, 0x80, 0x69, 0xff]);
    // sec / lda #$3f / adc #$40 - 63 + 64 + 1 = 128, V = 1.
    register_a!(carry_into_overflow, 0b1000_0000, P | V | N, [0x38, 0xa9, 0x3f, 0x69, 0x40]);
  }

  mod sbc_overflow_carry {
    use super::*;
    // sec / lda #$00 / sbc #$01 - 0 - 1 = -1.
    register_a!(test_0_minus_1, negative(1), P | N, [0x38, 0xa9, 0x00, 0xe9, 0x01]);
    // sec / lda #$80 / sbc #$01 - -128 - 1 = -129, V = 1.
    register_a!(neg128_minus_1, negative(129), P | C | V, [0x38, 0xa9, 0x80, 0xe9, 0x01]);
    // sec / lda #$7f / sbc #$ff - 127 - -1 = 128, V = 1.
    register_a!(test_127_minus_neg1, 128, P | V | N, [0x38, 0xa9, 0x7f, 0xe9, 0xff]);
  }

  mod compare {
    use super::*;
    // http://6502.org/tutorials/compare_instructions.html
    status!(cmp_lt, P | N,     [0xa9, 0x11, 0xc9, 0x22]); // lda #$11 / cmp #$22
    status!(cmp_gt, P | C,     [0xa9, 0x22, 0xc9, 0x11]); // lda #$22 / cmp #$11
    status!(cmp_eq, P | C | Z, [0xa9, 0x11, 0xc9, 0x11]); // lda #$11 / cmp #$11
    status!(cpx_lt, P | N,     [0xa2, 0x11, 0xe0, 0x22]); // ldx #$11 / cpx #$22
    status!(cpx_gt, P | C,     [0xa2, 0x22, 0xe0, 0x11]); // ldx #$22 / cpx #$11
    status!(cpy_eq, P | C | Z, [0xa0, 0x11, 0xc0, 0x11]); // ldy #$11 / cpy #$11
  }

  // lda #%11110000 / and #%10101010
  register_a!(and, 0b1010_0000, P | N, [0xa9, 0b1111_0000, 0x29, 0b1010_1010]);
  // lda #%11110000 / eor #%10101010
  register_a!(eor, 0b0101_1010, P, [0xa9, 0b1111_0000, 0x49, 0b1010_1010]);
  // lda #%11110000 / ora #%10101010
  register_a!(ora, 0b1111_1010, P | N, [0xa9, 0b1111_0000, 0x09, 0b1010_1010]);

  register_a!(lda, 0x22, P, [0xa9, 0x22]);
  register_x!(ldx, 0x22, P, [0xa2, 0x22]);
  register_y!(ldy, 0x22, P, [0xa0, 0x22]);

  // nop #$22 - the immediate NOP consumes its operand and does nothing.
  register_a!(nop_imm, 0x00, P, [0x80, 0x22]);

  // sec / lda #$33 / sbc #$11
  register_a!(sbc1, 0x22, P | C, [0x38, 0xa9, 0x33, 0xe9, 0x11]);
  // sec / lda #$33 / sbc #$33
  register_a!(sbc2, 0x00, P | Z | C, [0x38, 0xa9, 0x33, 0xe9, 0x33]);
  // sec / lda #$33 / sbc #$34
  register_a!(sbc3, negative(1), P | N, [0x38, 0xa9, 0x33, 0xe9, 0x34]);
}

/// Decimal mode keeps its own section; the nibble corrections are the
/// classic place for off-by-one bugs.
#[rustfmt::skip]
mod decimal_mode {
  use super::*;

  // sed / clc / lda #$15 / adc #$27 - BCD 15 + 27 = 42.
  register_a!(adc_bcd_simple, 0x42, P | D, [0xf8, 0x18, 0xa9, 0x15, 0x69, 0x27]);
  // sed / clc / lda #$81 / adc #$92 - BCD 81 + 92 = 173, carry out. The
  // signed intermediate overflows, so V rides along.
  register_a!(adc_bcd_carry_out, 0x73, P | D | C | V, [0xf8, 0x18, 0xa9, 0x81, 0x69, 0x92]);
  // sed / sec / lda #$09 / adc #$00 - carry in rolls 09 to 10.
  register_a!(adc_bcd_carry_in, 0x10, P | D, [0xf8, 0x38, 0xa9, 0x09, 0x69, 0x00]);
  // sed / clc / lda #$99 / adc #$01 - BCD wrap to zero with carry.
  register_a!(adc_bcd_wrap, 0x00, P | D | C, [0xf8, 0x18, 0xa9, 0x99, 0x69, 0x01]);

  // sed / sec / lda #$42 / sbc #$27 - BCD 42 - 27 = 15.
  register_a!(sbc_bcd_simple, 0x15, P | D | C, [0xf8, 0x38, 0xa9, 0x42, 0xe9, 0x27]);
  // sed / sec / lda #$21 / sbc #$34 - borrow wraps to BCD 87.
  register_a!(sbc_bcd_borrow, 0x87, P | D | N, [0xf8, 0x38, 0xa9, 0x21, 0xe9, 0x34]);
  // sed / sec / lda #$00 / sbc #$01 - 0 - 1 = BCD 99 with borrow.
  register_a!(sbc_bcd_zero, 0x99, P | D | N, [0xf8, 0x38, 0xa9, 0x00, 0xe9, 0x01]);

  #[test]
  fn z_comes_from_the_binary_sum() {
    // sed / clc / lda #$99 / adc #$67: binary 0x99 + 0x67 = 0x00 (mod
    // 256), so Z is set even though the corrected accumulator is not 0.
    let (cpu, _) = run_program(&[0xf8, 0x18, 0xa9, 0x99, 0x69, 0x67]);
    assert!(cpu.regs.is_status_flag_set(StatusFlag::Zero));
    assert_ne!(cpu.regs.a, 0x00);
  }
}

#[rustfmt::skip]
mod memory_modes {
  use super::*;

  // lda #$42 / sta $10 - store through the zero page.
  memory!(sta_zp, [0x10, 0x42], [0xa9, 0x42, 0x85, 0x10]);
  // lda #$42 / sta $1234
  memory!(sta_abs, [0x1234, 0x42], [0xa9, 0x42, 0x8d, 0x34, 0x12]);
  // lda #$42 / ldx #$04 / sta $1230,x
  memory!(sta_abx, [0x1234, 0x42], [0xa9, 0x42, 0xa2, 0x04, 0x9d, 0x30, 0x12]);
  // lda #$42 / sta $10 / lda $10
  register_a!(lda_zp_round_trip, 0x42, P, [0xa9, 0x42, 0x85, 0x10, 0xa9, 0x00, 0xa5, 0x10]);
  // ldx #$02 / lda #$42 / sta $10 / lda $0e,x - zero page indexing.
  register_a!(lda_zpx, 0x42, P, [0xa2, 0x02, 0xa9, 0x42, 0x85, 0x10, 0xa9, 0x00, 0xb5, 0x0e]);

  // lda #$41 / sta $10 / inc $10 - read-modify-write in the zero page.
  memory!(inc_zp, [0x10, 0x42], [0xa9, 0x41, 0x85, 0x10, 0xe6, 0x10]);
  // lda #$81 / sta $10 / asl $10 - the carry takes the shifted-out bit.
  status!(asl_zp_carry, P | C, [0xa9, 0x81, 0x85, 0x10, 0x06, 0x10]);

  // Pointer at $20/$21 -> $1234; lda ($1e,x) with x=2 reads through it.
  register_a!(lda_izx, 0x42, P, [
    0xa9, 0x34, 0x85, 0x20,   // lda #$34 / sta $20
    0xa9, 0x12, 0x85, 0x21,   // lda #$12 / sta $21
    0xa9, 0x42, 0x8d, 0x34, 0x12, // lda #$42 / sta $1234
    0xa2, 0x02,               // ldx #$02
    0xa9, 0x00,               // lda #$00
    0xa1, 0x1e,               // lda ($1e,x)
  ]);

  // Pointer at $20/$21 -> $1230; sta ($20),y with y=4 writes $1234.
  memory!(sta_izy, [0x1234, 0x55], [
    0xa9, 0x30, 0x85, 0x20,   // lda #$30 / sta $20
    0xa9, 0x12, 0x85, 0x21,   // lda #$12 / sta $21
    0xa0, 0x04,               // ldy #$04
    0xa9, 0x55,               // lda #$55
    0x91, 0x20,               // sta ($20),y
  ]);

  #[test]
  fn zero_page_indexing_wraps() {
    // ldx #$60 / lda $c0,x - $c0 + $60 wraps to $20 inside the zero page.
    let (_, bus) = run_program(&[0xa9, 0x42, 0x85, 0x20, 0xa2, 0x60, 0xa9, 0x00, 0xb5, 0xc0]);
    assert_eq!(bus.memory[0x20], 0x42);
  }

  #[test]
  fn jmp_indirect_honors_the_page_bug() {
    // Pointer at $02ff: low byte from $02ff, high byte from $0200 (not
    // $0300).
    let mut bus = crate::bus::RamBus::new();
    bus.memory[0x02ff] = 0x34;
    bus.memory[0x0200] = 0x12;
    bus.memory[0x0300] = 0x77;
    bus.memory[LOAD_ADDR as usize] = 0x6c; // jmp ($02ff)
    bus.memory[LOAD_ADDR as usize + 1] = 0xff;
    bus.memory[LOAD_ADDR as usize + 2] = 0x02;
    let mut cpu = Cpu::new(Variant::Mos6502);
    cpu.regs.pc = LOAD_ADDR;
    cpu.step_instruction(&mut bus).unwrap();
    assert_eq!(cpu.regs.pc, 0x1234);
  }
}

#[rustfmt::skip]
mod stack_and_jumps {
  use super::*;

  // lda #$42 / pha / lda #$00 / pla
  register_a!(pha_pla, 0x42, P, [0xa9, 0x42, 0x48, 0xa9, 0x00, 0x68]);
  // sec / php / clc / plp - plp restores the pushed carry.
  status!(php_plp, P | C, [0x38, 0x08, 0x18, 0x28]);

  #[test]
  fn jsr_rts_round_trip() {
    // jsr sub / lda #$42 / jam ... sub: ldx #$07 / rts
    let program = [
      0x20, 0x06, 0x06, // 0x0600: jsr $0606
      0xa9, 0x42,       // 0x0603: lda #$42
      0x02,             // 0x0605: jam
      0xa2, 0x07,       // 0x0606: ldx #$07
      0x60,             // 0x0608: rts
    ];
    let (cpu, _) = run_program(&program);
    assert_eq!(cpu.regs.a, 0x42);
    assert_eq!(cpu.regs.x, 0x07);
  }

  #[test]
  fn jsr_pushes_the_return_address_minus_one() {
    let program = [
      0x20, 0x06, 0x06, // 0x0600: jsr $0606
      0xea,             // 0x0603
      0xea, 0xea,
      0x02,             // 0x0606: jam
    ];
    let mut bus = crate::bus::RamBus::load(LOAD_ADDR, &program);
    let mut cpu = Cpu::new(Variant::Mos6510);
    cpu.regs.pc = LOAD_ADDR;
    cpu.step_instruction(&mut bus).unwrap();
    // The stack holds 0x0602: the address of the JSR's last byte.
    assert_eq!(bus.memory[0x01fd], 0x06);
    assert_eq!(bus.memory[0x01fc], 0x02);
    assert_eq!(cpu.regs.s, 0xfb);
    assert_eq!(cpu.regs.pc, 0x0606);
  }
}

mod timing {
    use super::*;

    #[test]
    fn lda_immediate_takes_two_cycles() {
        let (cpu, _, cycles) = run_instructions(&[0xa9, 0x05], 1);
        assert_eq!(cycles, vec![2]);
        assert_eq!(cpu.regs.a, 0x05);
        assert_eq!(cpu.regs.pc, LOAD_ADDR + 2);
    }

    #[test]
    fn sta_absolute_takes_four_cycles() {
        let (cpu, bus, cycles) = run_instructions(&[0xa9, 0x05, 0x8d, 0x00, 0x10], 2);
        assert_eq!(cycles, vec![2, 4]);
        assert_eq!(bus.memory[0x1000], 0x05);
        assert_eq!(cpu.regs.pc, LOAD_ADDR + 5);
        assert_eq!(cpu.total_cycles(), 6);
    }

    #[test]
    fn indexed_read_pays_for_a_page_cross() {
        // lda $06ff,x with x=1 crosses into page 0x07.
        let (_, _, cycles) = run_instructions(&[0xa2, 0x01, 0xbd, 0xff, 0x06], 2);
        assert_eq!(cycles, vec![2, 5]);
        // Same read without the cross stays at 4.
        let (_, _, cycles) = run_instructions(&[0xa2, 0x01, 0xbd, 0x00, 0x07], 2);
        assert_eq!(cycles, vec![2, 4]);
    }

    #[test]
    fn indexed_write_always_pays_the_penalty() {
        let (_, _, cycles) = run_instructions(&[0xa2, 0x01, 0x9d, 0x00, 0x10], 2);
        assert_eq!(cycles, vec![2, 5]);
    }

    #[test]
    fn rmw_indexed_bus_sequence() {
        // ldx #$10 / inc $1234,x - seven cycles: fetch, low, high, dummy
        // read, read, dummy write, final write.
        let program = [0xa2, 0x10, 0xfe, 0x34, 0x12];
        let mut bus = RecordingBus::load(LOAD_ADDR, &program);
        bus.ram.memory[0x1244] = 0x41;
        let mut cpu = Cpu::new(Variant::Mos6510);
        cpu.regs.pc = LOAD_ADDR;
        cpu.step_instruction(&mut bus).unwrap();
        bus.clear();
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.last_instruction_cycles(), 7);
        assert_eq!(
            bus.kinds(),
            vec![
                AccessKind::OpcodeFetch,
                AccessKind::OperandAbsoluteXLow,
                AccessKind::OperandAbsoluteXHigh,
                AccessKind::DummyRead,
                AccessKind::ExecuteRead,
                AccessKind::DummyWrite,
                AccessKind::ExecuteWrite,
            ]
        );
        // The dummy write repeats the unmodified value.
        assert_eq!(bus.accesses[5], (AccessKind::DummyWrite, 0x1244, 0x41));
        assert_eq!(bus.accesses[6], (AccessKind::ExecuteWrite, 0x1244, 0x42));
    }

    #[test]
    fn branch_timing_depends_on_outcome_and_page() {
        // Branch not taken: 2 cycles. beq +2 with Z clear.
        let (_, _, cycles) = run_instructions(&[0xa9, 0x01, 0xf0, 0x02], 2);
        assert_eq!(cycles, vec![2, 2]);
        // Taken, same page: 3 cycles. lda #$00 sets Z.
        let (_, _, cycles) = run_instructions(&[0xa9, 0x00, 0xf0, 0x02], 2);
        assert_eq!(cycles, vec![2, 3]);
    }

    #[test]
    fn branch_crossing_a_page_costs_four_cycles() {
        // BEQ $02 sitting at 0xC0FE lands on 0xC102, off the opcode's
        // page: 2 base + 1 taken + 1 cross.
        let mut bus = crate::bus::RamBus::new();
        bus.memory[0xc0fe] = 0xf0;
        bus.memory[0xc0ff] = 0x02;
        let mut cpu = Cpu::new(Variant::Mos6502);
        cpu.regs.pc = 0xc0fe;
        cpu.regs.set_status_flag(StatusFlag::Zero, true);
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0xc102);
        assert_eq!(cpu.last_instruction_cycles(), 4);
    }

    #[test]
    fn implied_instructions_burn_a_dummy_read() {
        let program = [0xe8]; // inx
        let mut bus = RecordingBus::load(LOAD_ADDR, &program);
        let mut cpu = Cpu::new(Variant::Mos6510);
        cpu.regs.pc = LOAD_ADDR;
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(
            bus.kinds(),
            vec![AccessKind::OpcodeFetch, AccessKind::DummyRead]
        );
    }
}

#[rustfmt::skip]
mod illegal {
  use super::*;

  // lda #$42 / sta $10 / lax $10 - loads A and X together.
  register_x!(lax, 0x42, P, [0xa9, 0x42, 0x85, 0x10, 0xa7, 0x10]);
  // lda #$f0 / ldx #$3c / sax $10 - stores A AND X without flags.
  memory!(sax, [0x10, 0x30], [0xa9, 0xf0, 0xa2, 0x3c, 0x87, 0x10]);
  // lda #$81 / sta $10 / lda #$0d / slo $10 - asl memory, ora into A.
  register_a!(slo, 0x0f, P | C, [0xa9, 0x81, 0x85, 0x10, 0xa9, 0x0d, 0x07, 0x10]);
  // lda #$ff / alr #$03 - and then lsr.
  register_a!(alr, 0x01, P | C, [0xa9, 0xff, 0x4b, 0x03]);
  // lda #$80 / anc #$ff - the carry copies N.
  register_a!(anc, 0x80, P | N | C, [0xa9, 0x80, 0x0b, 0xff]);
  // lda #$c0 / ldx #$3f / sbx #$01 - X := (A & X) - 1 = -1.
  register_x!(sbx, 0xff, P | N, [0xa9, 0xc0, 0xa2, 0x3f, 0xcb, 0x01]);
  // lda #$11 / ane #$33 - A := (A | $ee) & X & imm with X = $ff.
  register_a!(ane, 0x33, P, [0xa2, 0xff, 0xa9, 0x11, 0x8b, 0x33]);
  // lxa #$11 with A = 0 - the magic mask keeps bits 1,2,3,5,6,7.
  register_x!(lxa, 0x00, P | Z, [0xa9, 0x00, 0xab, 0x11]);
  // sec / lda #$33 / usbc #$11 - behaves exactly like sbc.
  register_a!(usbc, 0x22, P | C, [0x38, 0xa9, 0x33, 0xeb, 0x11]);
  // lda #$41 / sta $10 / lda #$50 / dcp $10 - dec then compare.
  status!(dcp, P | C, [0xa9, 0x41, 0x85, 0x10, 0xa9, 0x50, 0xc7, 0x10]);
  // sec / lda #$41 / sta $10 / lda #$50 / isc $10 - inc then sbc.
  register_a!(isc, 0x0e, P | C, [0x38, 0xa9, 0x41, 0x85, 0x10, 0xa9, 0x50, 0xe7, 0x10]);

  #[test]
  fn arr_binary_mode_rotates_after_the_and() {
    // sec / lda #$ff / arr #$c0: A = ror(ff & c0) with carry in = $e0;
    // C takes bit 6, V bit6^bit5.
    let (cpu, _) = run_program(&[0x38, 0xa9, 0xff, 0x6b, 0xc0]);
    assert_eq!(cpu.regs.a, 0xe0);
    assert!(cpu.regs.is_status_flag_set(StatusFlag::Carry));
    assert!(!cpu.regs.is_status_flag_set(StatusFlag::Overflow));
    assert!(cpu.regs.is_status_flag_set(StatusFlag::Negative));
  }

  #[test]
  fn las_mixes_the_stack_pointer_in() {
    // lda #$ff / sta $0700 / las $0700,y with s = 0xfd.
    let (cpu, _) = run_program(&[0xa9, 0xff, 0x8d, 0x00, 0x07, 0xbb, 0x00, 0x07]);
    assert_eq!(cpu.regs.a, 0xfd);
    assert_eq!(cpu.regs.x, 0xfd);
    assert_eq!(cpu.regs.s, 0xfd);
  }

  #[test]
  fn sha_store_collapses_on_page_cross() {
    // lda #$f5 / ldx #$73 / ldy #$01 / sha $80ff,y: the carry into the
    // high byte is lost and the target page becomes (a & x) & $80.
    let (_, bus) = run_program(&[
      0xa9, 0xf5, 0xa2, 0x73, 0xa0, 0x01, 0x9f, 0xff, 0x80,
    ]);
    // a & x = $71; value = $71 & ($80 + 1) = $01; page = $71 & $80 = $00.
    assert_eq!(bus.memory[0x0000], 0x01);
  }

  #[test]
  fn shy_stores_y_and_high_plus_one() {
    // ldy #$07 / shy $0210,x with x = 0: value = y & ($02 + 1) = $03.
    let (_, bus) = run_program(&[0xa0, 0x07, 0x9c, 0x10, 0x02]);
    assert_eq!(bus.memory[0x0210], 0x03);
  }

  #[test]
  fn jam_wedges_the_cpu_until_reset() {
    let mut bus = crate::bus::RamBus::load(LOAD_ADDR, &[0x02, 0xea]);
    let mut cpu = Cpu::new(Variant::Mos6510);
    cpu.regs.pc = LOAD_ADDR;
    cpu.step_instruction(&mut bus).unwrap();
    assert!(cpu.is_jammed());
    let pc_before = cpu.regs.pc;
    for _ in 0..8 {
      cpu.step_instruction(&mut bus).unwrap();
    }
    assert!(cpu.is_jammed());
    assert_eq!(cpu.regs.pc, pc_before);
    // A reset releases the jam and runs the reset sequence.
    cpu.reset();
    for _ in 0..4 {
      cpu.step_instruction(&mut bus).unwrap();
    }
    assert!(!cpu.is_jammed());
  }
}

/// Sweep every (A, operand, carry) triple through decimal ADC and SBC
/// against Bruce Clark's reference sequences from the 6502.org decimal
/// mode appendix.
mod decimal_sweep {
    use super::*;
    use crate::cpu_6502::execute;

    fn reference_adc(a: u8, m: u8, carry: bool) -> (u8, bool) {
        let mut al = (a & 0x0f) as u16 + (m & 0x0f) as u16 + carry as u16;
        if al >= 0x0a {
            al = ((al + 0x06) & 0x0f) + 0x10;
        }
        let mut sum = (a & 0xf0) as u16 + (m & 0xf0) as u16 + al;
        if sum >= 0xa0 {
            sum += 0x60;
        }
        (sum as u8, sum >= 0x100)
    }

    fn reference_sbc(a: u8, m: u8, carry: bool) -> u8 {
        let mut al = (a & 0x0f) as i16 - (m & 0x0f) as i16 + carry as i16 - 1;
        if al < 0 {
            al = ((al - 0x06) & 0x0f) - 0x10;
        }
        let mut sum = (a & 0xf0) as i16 - (m & 0xf0) as i16 + al;
        if sum < 0 {
            sum -= 0x60;
        }
        sum as u8
    }

    #[test]
    fn adc_matches_the_reference_for_all_inputs() {
        for a in 0..=255u8 {
            for m in 0..=255u8 {
                for carry in [false, true] {
                    let mut regs = Registers::new();
                    regs.a = a;
                    regs.set_status_flag(StatusFlag::Decimal, true);
                    regs.set_status_flag(StatusFlag::Carry, carry);
                    execute::adc(&mut regs, m);
                    let (expected, expected_carry) = reference_adc(a, m, carry);
                    assert_eq!(
                        regs.a, expected,
                        "adc a={:#04x} m={:#04x} c={}",
                        a, m, carry
                    );
                    assert_eq!(
                        regs.is_status_flag_set(StatusFlag::Carry),
                        expected_carry,
                        "adc carry a={:#04x} m={:#04x} c={}",
                        a,
                        m,
                        carry
                    );
                    // Z always looks at the binary sum.
                    let binary = (a as u16 + m as u16 + carry as u16) as u8;
                    assert_eq!(
                        regs.is_status_flag_set(StatusFlag::Zero),
                        binary == 0,
                        "adc zero a={:#04x} m={:#04x} c={}",
                        a,
                        m,
                        carry
                    );
                }
            }
        }
    }

    #[test]
    fn sbc_matches_the_reference_for_all_inputs() {
        for a in 0..=255u8 {
            for m in 0..=255u8 {
                for carry in [false, true] {
                    let mut regs = Registers::new();
                    regs.a = a;
                    regs.set_status_flag(StatusFlag::Decimal, true);
                    regs.set_status_flag(StatusFlag::Carry, carry);
                    execute::sbc(&mut regs, m);
                    assert_eq!(
                        regs.a,
                        reference_sbc(a, m, carry),
                        "sbc a={:#04x} m={:#04x} c={}",
                        a,
                        m,
                        carry
                    );
                    // All four flags come from the binary difference.
                    let binary = a as i16 - m as i16 - (1 - carry as i16);
                    assert_eq!(
                        regs.is_status_flag_set(StatusFlag::Carry),
                        binary >= 0,
                        "sbc carry a={:#04x} m={:#04x} c={}",
                        a,
                        m,
                        carry
                    );
                    assert_eq!(
                        regs.is_status_flag_set(StatusFlag::Zero),
                        binary as u8 == 0,
                        "sbc zero a={:#04x} m={:#04x} c={}",
                        a,
                        m,
                        carry
                    );
                }
            }
        }
    }
}

mod interrupts {
    use super::*;

    #[test]
    fn unsupported_opcode_is_fatal_on_the_6502() {
        let mut bus = crate::bus::RamBus::load(LOAD_ADDR, &[0x02]);
        let mut cpu = Cpu::new(Variant::Mos6502);
        cpu.regs.pc = LOAD_ADDR;
        let error = cpu.step_instruction(&mut bus).unwrap_err();
        assert_eq!(
            error,
            crate::diagnostics::CpuError::UnsupportedOpcode {
                opcode: 0x02,
                pc: LOAD_ADDR
            }
        );
    }

    #[test]
    fn brk_vectors_and_rti_returns() {
        let mut bus = crate::bus::RamBus::load(LOAD_ADDR, &[0x00, 0xea, 0xa9, 0x42]);
        // IRQ/BRK vector points at a handler that just returns.
        bus.memory[0xfffe] = 0x00;
        bus.memory[0xffff] = 0x80;
        bus.memory[0x8000] = 0x40; // rti
        let mut cpu = Cpu::new(Variant::Mos6510);
        cpu.regs.pc = LOAD_ADDR;

        cpu.step_instruction(&mut bus).unwrap(); // brk
        assert_eq!(cpu.regs.pc, 0x8000);
        assert_eq!(cpu.last_instruction_cycles(), 7);
        assert!(cpu.regs.is_status_flag_set(StatusFlag::InterruptDisable));
        // The pushed copy of P carries B.
        assert_ne!(bus.memory[0x01fb] & (StatusFlag::Break as u8), 0);

        cpu.step_instruction(&mut bus).unwrap(); // rti
        assert_eq!(cpu.last_instruction_cycles(), 6);
        // BRK skips its padding byte: execution resumes past it.
        assert_eq!(cpu.regs.pc, LOAD_ADDR + 2);

        cpu.step_instruction(&mut bus).unwrap(); // lda #$42
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn irq_respects_the_interrupt_disable_flag() {
        let mut bus = crate::bus::RamBus::load(LOAD_ADDR, &[0xea, 0xea]);
        bus.memory[0xfffe] = 0x00;
        bus.memory[0xffff] = 0x90;
        let mut cpu = Cpu::new(Variant::Mos6510);
        cpu.regs.pc = LOAD_ADDR;
        // I is set after reset; the IRQ is ignored.
        cpu.irq();
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, LOAD_ADDR + 1);

        cpu.regs.set_status_flag(StatusFlag::InterruptDisable, false);
        cpu.irq();
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0x9000);
        // The pushed P has B clear for a hardware interrupt.
        assert_eq!(bus.memory[0x01fb] & (StatusFlag::Break as u8), 0);
    }

    #[test]
    fn nmi_wins_over_irq() {
        let mut bus = crate::bus::RamBus::load(LOAD_ADDR, &[0xea]);
        bus.memory[0xfffa] = 0x00;
        bus.memory[0xfffb] = 0xa0;
        bus.memory[0xfffe] = 0x00;
        bus.memory[0xffff] = 0x90;
        let mut cpu = Cpu::new(Variant::Mos6510);
        cpu.regs.pc = LOAD_ADDR;
        cpu.regs.set_status_flag(StatusFlag::InterruptDisable, false);
        cpu.nmi();
        cpu.irq();
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0xa000);
    }

    #[test]
    fn cold_reset_initializes_the_stack_pointer() {
        let mut bus = crate::bus::RamBus::new();
        bus.memory[0xfffc] = 0x00;
        bus.memory[0xfffd] = 0xc0;
        let mut cpu = Cpu::new(Variant::Mos6510);
        cpu.regs.s = 0x00;
        cpu.reset();
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0xc000);
        assert_eq!(cpu.regs.s, 0xfd);
        assert_eq!(cpu.last_instruction_cycles(), 7);

        // A warm reset decrements S by three instead.
        cpu.reset();
        cpu.step_instruction(&mut bus).unwrap();
        assert_eq!(cpu.regs.s, 0xfa);
    }
}
