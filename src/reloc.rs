//! The analytical relocator: run a program under the cycle-accurate CPU
//! against a shadow RAM that records where every byte's value came from,
//! then solve for which program bytes must change when the image moves to
//! a different page (and, optionally, a different zero-page band).

use std::ops::RangeInclusive;

use crate::bus::{AccessKind, Bus};
use crate::cpu_6502::{Cpu, Registers, RunState, RESET_STATUS_FLAG, STACK_PAGE};
use crate::diagnostics::{DiagnosticBag, DiagnosticCode, DiagnosticLevel, RelocError};
use crate::opcodes::Variant;

pub mod constraints;
pub mod provenance;
pub mod shadow;
pub mod taint;
pub mod zero_page;


use constraints::ConstraintStore;
use provenance::ProvenancePool;
use shadow::{AccessFlags, ByteFlags, Shadow};
use taint::{AnalysisBounds, TaintContext, TaintTracker};
use zero_page::ZeroPageAllocator;

/// How the program may touch a registered RAM range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeAccess {
    Read,
    Write,
    ReadWrite,
}

/// A contiguous address range the program may legitimately touch beyond
/// its own image.
#[derive(Debug, Clone, Copy)]
pub struct SafeRange {
    pub start: u16,
    pub end: u16,
    pub access: RangeAccess,
}

impl SafeRange {
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.start && addr <= self.end
    }

    pub fn allows_write(&self) -> bool {
        matches!(self.access, RangeAccess::Write | RangeAccess::ReadWrite)
    }
}

pub struct RelocatorConfig {
    pub origin: u16,
    pub bytes: Vec<u8>,
    /// Address window treated as "moves with the program"; defaults to
    /// the image itself.
    pub analysis_start: Option<u16>,
    pub analysis_end: Option<u16>,
    /// Whether zero-page references are remapped; the destination band is
    /// supplied to [`Relocator::relocate`].
    pub zp_reloc: bool,
    pub safe_ranges: Vec<SafeRange>,
    pub min_level: DiagnosticLevel,
}

impl RelocatorConfig {
    pub fn new(origin: u16, bytes: Vec<u8>) -> RelocatorConfig {
        RelocatorConfig {
            origin,
            bytes,
            analysis_start: None,
            analysis_end: None,
            zp_reloc: true,
            safe_ranges: Vec::new(),
            min_level: DiagnosticLevel::Warning,
        }
    }
}

pub struct Relocator {
    cpu: Cpu,
    shadow: Shadow,
    pool: ProvenancePool,
    tracker: TaintTracker,
    store: ConstraintStore,
    zp: ZeroPageAllocator,
    diag: DiagnosticBag,
    bounds: AnalysisBounds,
    safe_ranges: Vec<SafeRange>,
    /// Out-of-bounds writes collected during runs, coalesced into CR401
    /// warnings when the analysis is sealed.
    oob_writes: Vec<u16>,
    solved: bool,
}

impl Relocator {
    pub fn new(config: RelocatorConfig) -> Result<Relocator, RelocError> {
        let origin = config.origin;
        let len = config.bytes.len();
        if origin as usize + len > 0x10000 {
            return Err(RelocError::TargetOutOfRange {
                target: origin,
                len,
            });
        }
        let bounds = AnalysisBounds {
            start: config.analysis_start.unwrap_or(origin),
            end: config
                .analysis_end
                .unwrap_or(origin.wrapping_add(len.max(1) as u16 - 1)),
            zp_reloc: config.zp_reloc,
        };
        let mut pool = ProvenancePool::new();
        let mut shadow = Shadow::new(origin, config.bytes);
        shadow.seed_provenance(&mut pool);
        Ok(Relocator {
            cpu: Cpu::new(Variant::Mos6510),
            store: ConstraintStore::new(len),
            shadow,
            pool,
            tracker: TaintTracker::new(),
            zp: ZeroPageAllocator::new(),
            diag: DiagnosticBag::new(config.min_level),
            bounds,
            safe_ranges: config.safe_ranges,
            oob_writes: Vec::new(),
            solved: false,
        })
    }

    pub fn diagnostics(&self) -> &DiagnosticBag {
        &self.diag
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn ram(&self) -> &[u8] {
        &self.shadow.ram[..]
    }

    pub fn byte_flags(&self, offset: usize) -> ByteFlags {
        self.shadow.byte_flags[offset]
    }

    /// Forget every run and analysis result; the program image is
    /// restored and pooled resources return to their free lists.
    pub fn reset(&mut self) {
        self.shadow.reset(&mut self.pool);
        self.shadow.seed_provenance(&mut self.pool);
        self.tracker.reset();
        self.store.reset();
        self.zp.reset();
        self.diag.clear();
        self.oob_writes.clear();
        self.solved = false;
        self.cpu = Cpu::new(Variant::Mos6510);
    }

    /// Run the program's subroutine at `addr` until its matching RTS/RTI
    /// executes on an empty stack, or `max_cycles` bus transactions pass.
    /// Returns `true` when the cycle cap cut the run short.
    pub fn run_subroutine_at(
        &mut self,
        addr: u16,
        max_cycles: u64,
        enable_analysis: bool,
        expect_rti: bool,
        cycle_by_cycle: bool,
    ) -> Result<bool, RelocError> {
        // A fresh call frame: cleared stack page and a stack pointer
        // seeded so the final return drains it to exactly 0xFD.
        for addr in STACK_PAGE..STACK_PAGE + 0x100 {
            self.shadow.ram[addr as usize] = 0;
        }
        self.cpu.regs = Registers {
            a: 0,
            x: 0,
            y: 0,
            pc: addr,
            s: 0xfd - if expect_rti { 3 } else { 2 },
            p: RESET_STATUS_FLAG,
        };

        let start_cycles = self.cpu.total_cycles();
        loop {
            {
                let mut bus = AnalysisBus {
                    shadow: &mut self.shadow,
                    pool: &mut self.pool,
                    store: &mut self.store,
                    zp: &mut self.zp,
                    diag: &mut self.diag,
                    tracker: &mut self.tracker,
                    bounds: self.bounds,
                    safe_ranges: &self.safe_ranges,
                    oob_writes: &mut self.oob_writes,
                    analysis_enabled: enable_analysis,
                    latched: None,
                };
                if cycle_by_cycle {
                    self.cpu.step_cycle(&mut bus)?;
                } else {
                    self.cpu.step_instruction(&mut bus)?;
                }
            }
            if self.cpu.is_jammed() {
                return Err(RelocError::Jammed {
                    pc: self.cpu.regs.pc,
                });
            }
            if self.cpu.state() == RunState::Fetch && self.cpu.regs.s == 0xfd {
                return Ok(false);
            }
            if self.cpu.total_cycles() - start_cycles >= max_cycles {
                return Ok(true);
            }
        }
    }

    /// Produce the program image as it must read when loaded at
    /// `target`, remapping zero-page references into `target_zp` when
    /// zero-page relocation is enabled. The constraint solve runs once;
    /// repeated calls only redo the placement and the page delta.
    pub fn relocate(
        &mut self,
        target: u16,
        target_zp: Option<RangeInclusive<u8>>,
    ) -> Result<Vec<u8>, RelocError> {
        let origin = self.shadow.origin();
        let len = self.shadow.program_len();
        if target & 0x00ff != origin & 0x00ff {
            return Err(RelocError::TargetLowByteMismatch {
                target,
                origin_low: origin as u8,
            });
        }
        if target < 0x0200 {
            return Err(RelocError::TargetTooLow { target });
        }
        if target as usize + len > 0x10000 {
            return Err(RelocError::TargetOutOfRange { target, len });
        }
        let zp_band = match (&target_zp, self.bounds.zp_reloc) {
            (Some(band), true) if band.start() <= band.end() => Some(band.clone()),
            (_, false) => None,
            _ => return Err(RelocError::EmptyZeroPageRange),
        };

        if !self.solved {
            self.seal_analysis()?;
        }

        let zp_map = match zp_band {
            Some(band) => self.zp.allocate(band)?,
            None => self.zp.identity(),
        };

        let delta_hi = ((target >> 8) as u8).wrapping_sub((origin >> 8) as u8);
        let mut out = self.shadow.program().to_vec();
        for (offset, byte) in out.iter_mut().enumerate() {
            let flags = self.shadow.byte_flags[offset];
            if !flags.contains(ByteFlags::RELOC) {
                continue;
            }
            if flags.contains(ByteFlags::USED_IN_MSB) {
                *byte = byte.wrapping_add(delta_hi);
            } else if flags.contains(ByteFlags::USED_IN_ZP) {
                // Every address in the byte's class shifts by the same
                // amount, so any member gives the remap delta.
                if let Some(zp) = self.shadow.zp_usage[offset].iter().next() {
                    let delta = zp_map[zp as usize].wrapping_sub(zp);
                    *byte = byte.wrapping_add(delta);
                }
            }
        }
        Ok(out)
    }

    /// One-time post-run pass: emit the deferred warnings, drop unusable
    /// zero-page addresses, and solve the constraint store.
    fn seal_analysis(&mut self) -> Result<(), RelocError> {
        self.warn_out_of_bounds();

        // A zero-page cell the program read before ever writing carries
        // preexisting state; it must stay where it is.
        for zp in 0..=255u8 {
            if self.zp.is_used(zp)
                && self.shadow.access[zp as usize].contains(AccessFlags::READ_BEFORE_WRITE)
            {
                log::warn!(
                    "zero page {:#04x} is read before written; leaving it in place",
                    zp
                );
                self.zp.exclude(zp);
                self.store.disable_zp(zp);
            }
        }

        self.store.solve(&mut self.shadow.byte_flags, &mut self.diag)?;
        self.solved = true;
        Ok(())
    }

    /// Coalesce the recorded out-of-bounds writes into one CR401 per
    /// contiguous region.
    fn warn_out_of_bounds(&mut self) {
        if self.oob_writes.is_empty() {
            return;
        }
        self.oob_writes.sort_unstable();
        self.oob_writes.dedup();
        let mut start = self.oob_writes[0];
        let mut end = start;
        let addresses: Vec<u16> = self.oob_writes.drain(..).collect();
        for addr in addresses.into_iter().skip(1) {
            if addr == end + 1 {
                end = addr;
                continue;
            }
            self.report_oob_region(start, end);
            start = addr;
            end = addr;
        }
        self.report_oob_region(start, end);
    }

    fn report_oob_region(&mut self, start: u16, end: u16) {
        self.diag.record(
            DiagnosticCode::WriteOutOfBounds,
            if start == end {
                format!("write outside safe RAM at {:#06x}", start)
            } else {
                format!("writes outside safe RAM at {:#06x}-{:#06x}", start, end)
            },
        );
    }
}

/// The bus the CPU sees while the relocator drives it: shadow RAM plus
/// the per-access bookkeeping.
struct AnalysisBus<'a> {
    shadow: &'a mut Shadow,
    pool: &'a mut ProvenancePool,
    store: &'a mut ConstraintStore,
    zp: &'a mut ZeroPageAllocator,
    diag: &'a mut DiagnosticBag,
    tracker: &'a mut TaintTracker,
    bounds: AnalysisBounds,
    safe_ranges: &'a [SafeRange],
    oob_writes: &'a mut Vec<u16>,
    analysis_enabled: bool,
    latched: Option<(AccessKind, Registers)>,
}

impl AnalysisBus<'_> {
    fn write_allowed(&self, addr: u16) -> bool {
        // The image, the stack and the zero page are implicitly the
        // program's to use; everything else needs a registered range.
        self.shadow.in_image(addr)
            || addr < 0x0100
            || (STACK_PAGE..STACK_PAGE + 0x100).contains(&addr)
            || self
                .safe_ranges
                .iter()
                .any(|range| range.contains(addr) && range.allows_write())
    }
}

impl Bus for AnalysisBus<'_> {
    fn trace(&mut self, kind: AccessKind, regs: &Registers) {
        self.latched = Some((kind, *regs));
    }

    fn read(&mut self, addr: u16) -> u8 {
        let value = self.shadow.ram[addr as usize];
        let Some((kind, regs)) = self.latched.take() else {
            return value;
        };
        if kind.is_dummy() {
            return value;
        }
        self.shadow.note_read(addr);
        if self.analysis_enabled {
            let mut ctx = TaintContext {
                shadow: &mut *self.shadow,
                pool: &mut *self.pool,
                store: &mut *self.store,
                zp: &mut *self.zp,
                diag: &mut *self.diag,
                bounds: self.bounds,
            };
            self.tracker.on_read(&mut ctx, kind, addr, value, &regs);
        }
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.shadow.ram[addr as usize] = value;
        let Some((kind, regs)) = self.latched.take() else {
            return;
        };
        if kind.is_dummy() {
            return;
        }
        if !self.write_allowed(addr) {
            self.oob_writes.push(addr);
        }
        self.shadow.note_write(addr);
        if self.analysis_enabled {
            let mut ctx = TaintContext {
                shadow: &mut *self.shadow,
                pool: &mut *self.pool,
                store: &mut *self.store,
                zp: &mut *self.zp,
                diag: &mut *self.diag,
                bounds: self.bounds,
            };
            self.tracker.on_write(&mut ctx, kind, addr, value, &regs);
        }
    }
}
