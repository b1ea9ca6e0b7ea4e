//! Per-access provenance interpretation. The tracking bus hands every
//! non-dummy transaction here together with its access kind; the tracker
//! keeps the provenance chains of A, X and Y current, mirrors stores into
//! the shadow cells, and turns every synthesized address into marks and
//! constraints for the solver.

use crate::bus::AccessKind;
use crate::cpu_6502::Registers;
use crate::diagnostics::{DiagnosticBag, DiagnosticCode};
use crate::opcodes::{decode, Mnemonic, Mode, Opcode, Variant};

use super::constraints::ConstraintStore;
use super::provenance::{Chain, ProvenancePool, NONE};
use super::shadow::{ByteFlags, Shadow};
use super::zero_page::ZeroPageAllocator;

/// The address window relocation analysis applies to, plus whether
/// zero-page references are remapped at all.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisBounds {
    pub start: u16,
    pub end: u16,
    pub zp_reloc: bool,
}

impl AnalysisBounds {
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.start && addr <= self.end
    }

    /// The inclusive high-byte window comparisons are gated on.
    pub fn contains_high_byte(&self, value: u8) -> bool {
        value >= (self.start >> 8) as u8 && value <= (self.end >> 8) as u8
    }
}

/// Everything the tracker writes into, borrowed for the duration of one
/// bus transaction.
pub struct TaintContext<'a> {
    pub shadow: &'a mut Shadow,
    pub pool: &'a mut ProvenancePool,
    pub store: &'a mut ConstraintStore,
    pub zp: &'a mut ZeroPageAllocator,
    pub diag: &'a mut DiagnosticBag,
    pub bounds: AnalysisBounds,
}

pub struct TaintTracker {
    src_a: Chain,
    src_x: Chain,
    src_y: Chain,
    /// The instruction currently on the bus.
    current: Opcode,
    /// Low half of a pointer being assembled: the cell it came from and
    /// the value it carried.
    pending_addr: u16,
    pending_value: u8,
}

impl TaintTracker {
    pub fn new() -> TaintTracker {
        TaintTracker {
            src_a: NONE,
            src_x: NONE,
            src_y: NONE,
            current: decode(Variant::Mos6510, 0xea),
            pending_addr: 0,
            pending_value: 0,
        }
    }

    /// Must accompany a pool reset; the chains here index into it.
    pub fn reset(&mut self) {
        self.src_a = NONE;
        self.src_x = NONE;
        self.src_y = NONE;
        self.current = decode(Variant::Mos6510, 0xea);
        self.pending_addr = 0;
        self.pending_value = 0;
    }

    pub fn on_read(
        &mut self,
        ctx: &mut TaintContext<'_>,
        kind: AccessKind,
        addr: u16,
        value: u8,
        regs: &Registers,
    ) {
        match kind {
            AccessKind::OpcodeFetch => {
                // The previous instruction is over; transfers and
                // accumulator shifts take effect at this boundary since
                // they never touch the bus with data.
                self.finish_implied(ctx);
                self.current = decode(Variant::Mos6510, value);
            }
            AccessKind::OperandImmediate | AccessKind::ExecuteRead => {
                self.execute_read(ctx, addr, value, regs);
            }

            // Low pointer halves are latched until the high half arrives.
            AccessKind::OperandAbsoluteLow
            | AccessKind::OperandAbsoluteXLow
            | AccessKind::OperandAbsoluteYLow
            | AccessKind::OperandJsrAbsoluteLow
            | AccessKind::OperandIndirectLow
            | AccessKind::OperandIndirectResolveLow
            | AccessKind::OperandIndirectXResolveLow
            | AccessKind::OperandIndirectYResolveLow => {
                self.pending_addr = addr;
                self.pending_value = value;
            }

            AccessKind::OperandAbsoluteHigh
            | AccessKind::OperandJsrAbsoluteHigh
            | AccessKind::OperandIndirectResolveHigh
            | AccessKind::OperandIndirectXResolveHigh => {
                let target = u16::from_le_bytes([self.pending_value, value]);
                self.pointer_formed(ctx, target, NONE, addr, 1);
            }
            AccessKind::OperandIndirectHigh => {
                // The operand names a pointer cell; the pointed-at word
                // spans two addresses.
                let target = u16::from_le_bytes([self.pending_value, value]);
                self.pointer_formed(ctx, target, NONE, addr, 2);
            }
            AccessKind::OperandAbsoluteXHigh => {
                let base = u16::from_le_bytes([self.pending_value, value]);
                let target = base.wrapping_add(regs.x as u16);
                self.pointer_formed(ctx, target, self.src_x, addr, 1);
            }
            AccessKind::OperandAbsoluteYHigh | AccessKind::OperandIndirectYResolveHigh => {
                let base = u16::from_le_bytes([self.pending_value, value]);
                let target = base.wrapping_add(regs.y as u16);
                self.pointer_formed(ctx, target, self.src_y, addr, 1);
            }

            AccessKind::OperandZeroPage => {
                let chain = ctx.shadow.chain(addr);
                self.zp_reference(ctx, &[value], chain, NONE);
            }
            AccessKind::OperandZeroPageX => {
                let zp = value.wrapping_add(regs.x);
                let chain = ctx.shadow.chain(addr);
                self.zp_reference(ctx, &[zp], chain, self.src_x);
            }
            AccessKind::OperandZeroPageY => {
                let zp = value.wrapping_add(regs.y);
                let chain = ctx.shadow.chain(addr);
                self.zp_reference(ctx, &[zp], chain, self.src_y);
            }
            AccessKind::OperandIndirectX => {
                // The pointer occupies two consecutive zero-page cells.
                let lo = value.wrapping_add(regs.x);
                let hi = lo.wrapping_add(1);
                let chain = ctx.shadow.chain(addr);
                self.zp_reference(ctx, &[lo, hi], chain, self.src_x);
            }
            AccessKind::OperandIndirectY => {
                let hi = value.wrapping_add(1);
                let chain = ctx.shadow.chain(addr);
                self.zp_reference(ctx, &[value, hi], chain, NONE);
            }

            AccessKind::StackPullA => {
                let chain = ctx.shadow.chain(addr);
                ctx.pool.replace(&mut self.src_a, chain);
            }

            AccessKind::OperandRelative
            | AccessKind::StackPullP
            | AccessKind::StackPullPcLow
            | AccessKind::StackPullPcHigh
            | AccessKind::InterruptVectorLow
            | AccessKind::InterruptVectorHigh
            | AccessKind::DummyRead
            | AccessKind::DummyWrite
            | AccessKind::ExecuteWrite
            | AccessKind::StackPushA
            | AccessKind::StackPushP
            | AccessKind::StackPushPcHigh
            | AccessKind::StackPushPcLow => {}
        }
    }

    pub fn on_write(
        &mut self,
        ctx: &mut TaintContext<'_>,
        kind: AccessKind,
        addr: u16,
        _value: u8,
        _regs: &Registers,
    ) {
        match kind {
            AccessKind::ExecuteWrite => match self.current.mnemonic {
                Mnemonic::STA => ctx.shadow.set_chain(ctx.pool, addr, self.src_a),
                Mnemonic::STX => ctx.shadow.set_chain(ctx.pool, addr, self.src_x),
                Mnemonic::STY => ctx.shadow.set_chain(ctx.pool, addr, self.src_y),
                Mnemonic::SAX => {
                    let both = ctx.pool.concat_copy(self.src_a, self.src_x);
                    ctx.shadow.set_chain(ctx.pool, addr, both);
                    ctx.pool.free(both);
                }
                // Everything else that lands here (RMW results and the
                // unstable stores) writes a transformed value; no linear
                // contribution survives.
                _ => ctx.shadow.clear_chain(ctx.pool, addr),
            },
            AccessKind::StackPushA => ctx.shadow.set_chain(ctx.pool, addr, self.src_a),
            AccessKind::StackPushP
            | AccessKind::StackPushPcHigh
            | AccessKind::StackPushPcLow => ctx.shadow.clear_chain(ctx.pool, addr),
            AccessKind::DummyWrite => {}
            _ => {}
        }
    }

    /// A data read reached the ALU or a register.
    fn execute_read(
        &mut self,
        ctx: &mut TaintContext<'_>,
        addr: u16,
        value: u8,
        regs: &Registers,
    ) {
        let decimal = regs.p & 0b0000_1000 != 0;
        match self.current.mnemonic {
            Mnemonic::LDA => {
                let chain = ctx.shadow.chain(addr);
                ctx.pool.replace(&mut self.src_a, chain);
            }
            Mnemonic::LDX => {
                let chain = ctx.shadow.chain(addr);
                ctx.pool.replace(&mut self.src_x, chain);
            }
            Mnemonic::LDY => {
                let chain = ctx.shadow.chain(addr);
                ctx.pool.replace(&mut self.src_y, chain);
            }
            Mnemonic::LAX => {
                let chain = ctx.shadow.chain(addr);
                ctx.pool.replace(&mut self.src_a, chain);
                let chain = ctx.shadow.chain(addr);
                ctx.pool.replace(&mut self.src_x, chain);
            }
            Mnemonic::ADC if !decimal => {
                // Both inputs contribute linearly to the sum.
                let union = ctx.pool.concat_copy(self.src_a, ctx.shadow.chain(addr));
                ctx.pool.free(self.src_a);
                self.src_a = union;
            }
            // Decimal ADC and the logical operations destroy linear
            // relocatability.
            Mnemonic::ADC
            | Mnemonic::SBC
            | Mnemonic::USBC
            | Mnemonic::AND
            | Mnemonic::ORA
            | Mnemonic::EOR
            | Mnemonic::ALR
            | Mnemonic::ANC
            | Mnemonic::ANE
            | Mnemonic::ARR
            | Mnemonic::LXA => self.erase_a(ctx),
            Mnemonic::SBX => {
                self.erase_a(ctx);
                ctx.pool.free(self.src_x);
                self.src_x = NONE;
            }
            Mnemonic::LAS => {
                self.erase_a(ctx);
                ctx.pool.free(self.src_x);
                self.src_x = NONE;
            }
            Mnemonic::CMP => self.compare(ctx, regs.a, self.src_a, addr, value),
            Mnemonic::CPX => self.compare(ctx, regs.x, self.src_x, addr, value),
            Mnemonic::CPY => self.compare(ctx, regs.y, self.src_y, addr, value),
            // The ALU half of the RMW combos feeds A nonlinearly.
            Mnemonic::SLO | Mnemonic::SRE | Mnemonic::RLA | Mnemonic::RRA | Mnemonic::ISC => {
                self.erase_a(ctx)
            }
            _ => {}
        }
    }

    fn erase_a(&mut self, ctx: &mut TaintContext<'_>) {
        ctx.pool.free(self.src_a);
        self.src_a = NONE;
    }

    /// Boundary effects of the instruction that just retired; only the
    /// implied/accumulator forms matter, everything else announced itself
    /// through bus traffic.
    fn finish_implied(&mut self, ctx: &mut TaintContext<'_>) {
        if !matches!(self.current.mode, Mode::Implied | Mode::Accumulator) {
            return;
        }
        match self.current.mnemonic {
            Mnemonic::TAX => {
                let src = self.src_a;
                ctx.pool.replace(&mut self.src_x, src);
            }
            Mnemonic::TAY => {
                let src = self.src_a;
                ctx.pool.replace(&mut self.src_y, src);
            }
            Mnemonic::TXA => {
                let src = self.src_x;
                ctx.pool.replace(&mut self.src_a, src);
            }
            Mnemonic::TYA => {
                let src = self.src_y;
                ctx.pool.replace(&mut self.src_a, src);
            }
            // S is not tracked, so X loses its history.
            Mnemonic::TSX => {
                ctx.pool.free(self.src_x);
                self.src_x = NONE;
            }
            // A relocatable byte must never feed the stack pointer.
            Mnemonic::TXS => {
                mark_chain(ctx, self.src_x, ByteFlags::NO_RELOC);
            }
            Mnemonic::ASL | Mnemonic::LSR | Mnemonic::ROL | Mnemonic::ROR => self.erase_a(ctx),
            // INX/DEX/INY/DEY shift by a constant; the chain stays valid.
            _ => {}
        }
    }

    fn compare(
        &mut self,
        ctx: &mut TaintContext<'_>,
        reg_value: u8,
        reg_chain: Chain,
        addr: u16,
        operand: u8,
    ) {
        // Only high bytes of analysis-range addresses are worth an Alike;
        // anything else compares data, not pointers.
        if !ctx.bounds.contains_high_byte(reg_value) || !ctx.bounds.contains_high_byte(operand) {
            return;
        }
        let (reg_offsets, reg_dups) = ctx.pool.collect(reg_chain);
        let (cell_offsets, cell_dups) = ctx.pool.collect(ctx.shadow.chain(addr));
        self.report_duplicates(ctx, &reg_dups);
        self.report_duplicates(ctx, &cell_dups);
        if reg_offsets.is_empty() && cell_offsets.is_empty() {
            return;
        }
        ctx.store.add_alike(reg_offsets, cell_offsets, ctx.diag);
    }

    /// A 16-bit address finished forming on the bus. `index_chain` is the
    /// provenance of the index register that contributed, `msb_addr` the
    /// cell the high byte came from; the low byte is the latched half.
    /// `spans` is how many consecutive cells the reference touches (two
    /// for an indirect pointer word).
    fn pointer_formed(
        &mut self,
        ctx: &mut TaintContext<'_>,
        target: u16,
        index_chain: Chain,
        msb_addr: u16,
        spans: u8,
    ) {
        let lsb_chain = ctx.shadow.chain(self.pending_addr);
        let msb_chain = ctx.shadow.chain(msb_addr);

        if ctx.bounds.contains(target) {
            // The reference moves with the program: its low byte is fixed
            // (relocation shifts whole pages) and exactly one byte of the
            // high byte's history takes the page delta.
            mark_chain(ctx, lsb_chain, ByteFlags::NO_RELOC);
            mark_chain(ctx, index_chain, ByteFlags::NO_RELOC);
            let (offsets, dups) = ctx.pool.collect(msb_chain);
            self.report_duplicates(ctx, &dups);
            if offsets.is_empty() {
                return;
            }
            for offset in &offsets {
                ctx.shadow.byte_flags[*offset as usize].insert(ByteFlags::USED_IN_MSB);
            }
            ctx.store.add_exactly_one(offsets, None, ctx.diag);
        } else if target < 0x100 {
            // A zero-page location synthesized from program bytes.
            mark_chain(ctx, msb_chain, ByteFlags::NO_RELOC);
            let zp = target as u8;
            if spans == 2 {
                self.zp_reference(ctx, &[zp, zp.wrapping_add(1)], lsb_chain, index_chain);
            } else {
                self.zp_reference(ctx, &[zp], lsb_chain, index_chain);
            }
        } else {
            // Outside both windows: the reference must survive bit-exact.
            mark_chain(ctx, lsb_chain, ByteFlags::NO_RELOC);
            mark_chain(ctx, index_chain, ByteFlags::NO_RELOC);
            mark_chain(ctx, msb_chain, ByteFlags::NO_RELOC);
        }
    }

    /// Record that the bytes on `lsb_chain`/`index_chain` reference the
    /// given zero-page addresses.
    fn zp_reference(
        &mut self,
        ctx: &mut TaintContext<'_>,
        refs: &[u8],
        lsb_chain: Chain,
        index_chain: Chain,
    ) {
        let (mut offsets, dups) = ctx.pool.collect(lsb_chain);
        let (index_offsets, index_dups) = ctx.pool.collect(index_chain);
        self.report_duplicates(ctx, &dups);
        self.report_duplicates(ctx, &index_dups);
        for offset in index_offsets {
            if offsets.contains(&offset) {
                self.report_duplicates(ctx, &[offset]);
            } else {
                offsets.push(offset);
            }
        }
        if offsets.is_empty() {
            return;
        }

        for zp in refs {
            ctx.zp.mark_used(*zp);
        }
        for offset in &offsets {
            let usage = &mut ctx.shadow.zp_usage[*offset as usize];
            for zp in refs {
                // Addresses sharing a contributor byte must shift as one.
                for linked in usage.iter().collect::<Vec<_>>() {
                    ctx.zp.link(linked, *zp);
                }
                usage.insert(*zp);
            }
            ctx.shadow.byte_flags[*offset as usize].insert(ByteFlags::USED_IN_ZP);
        }
        if ctx.bounds.zp_reloc {
            for zp in refs {
                ctx.store
                    .add_exactly_one(offsets.clone(), Some(*zp), ctx.diag);
            }
        }
    }

    fn report_duplicates(&self, ctx: &mut TaintContext<'_>, dups: &[u16]) {
        for offset in dups {
            ctx.shadow.byte_flags[*offset as usize].insert(ByteFlags::NO_RELOC);
            ctx.diag.record(
                DiagnosticCode::DuplicateContribution,
                format!(
                    "byte {} contributes more than once to a single value",
                    offset
                ),
            );
        }
    }
}

fn mark_chain(ctx: &mut TaintContext<'_>, chain: Chain, flags: ByteFlags) {
    let offsets: Vec<u16> = ctx.pool.iter(chain).collect();
    for offset in offsets {
        ctx.shadow.byte_flags[offset as usize].insert(flags);
    }
}
