//! The constraint store and its solver. Constraints relate program bytes
//! that must (or must not) be rewritten together; the solver labels every
//! participating byte {Reloc, NoReloc} by propagation plus an explicit
//! backtracking stack. Recursion is deliberately absent: real programs
//! produce decision depths that would overflow a native call stack.

use std::collections::HashSet;

use crate::diagnostics::{DiagnosticBag, DiagnosticCode, RelocError};

use super::shadow::ByteFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// Exactly one of the listed bytes must be relocated; typical for the
    /// MSB of a synthesized pointer.
    ExactlyOne,
    /// Both groups must relocate the same number of bytes; typical for
    /// two sums compared with CMP.
    Alike,
}

#[derive(Debug)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub a: Vec<u16>,
    /// Second group; only Alike uses it.
    pub b: Vec<u16>,
    /// The zero-page address an ExactlyOne was emitted for, so a bad ZP
    /// address can drop its constraints later.
    pub zp_key: Option<u8>,
    needs_recheck: bool,
    disabled: bool,
}

/// Marker for a propagation dead end; the search turns it into either a
/// backtrack or a final failure.
struct Inconsistent;

struct Frame {
    offset: u16,
    saved_flags: Vec<ByteFlags>,
    tried_reloc: bool,
}

pub struct ConstraintStore {
    constraints: Vec<Constraint>,
    /// Hash de-duplication of emitted constraints.
    seen: HashSet<(ConstraintKind, Vec<u16>, Vec<u16>, Option<u8>)>,
    /// Per program byte, the constraints it participates in.
    backlinks: Vec<Vec<u32>>,
    worklist: Vec<u32>,
    /// Recycled flag snapshots for the search frames.
    snapshot_pool: Vec<Vec<ByteFlags>>,
}

impl ConstraintStore {
    pub fn new(program_len: usize) -> ConstraintStore {
        ConstraintStore {
            constraints: Vec::new(),
            seen: HashSet::new(),
            backlinks: vec![Vec::new(); program_len],
            worklist: Vec::new(),
            snapshot_pool: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| !c.disabled)
    }

    pub fn add_exactly_one(
        &mut self,
        mut offsets: Vec<u16>,
        zp_key: Option<u8>,
        diag: &mut DiagnosticBag,
    ) {
        if offsets.is_empty() {
            return;
        }
        offsets.sort_unstable();
        offsets.dedup();
        let key = (ConstraintKind::ExactlyOne, offsets.clone(), Vec::new(), zp_key);
        if !self.seen.insert(key) {
            return;
        }
        diag.record(
            DiagnosticCode::ConstraintAdded,
            match zp_key {
                Some(zp) => format!("exactly-one over {:?} for zero page {:#04x}", offsets, zp),
                None => format!("exactly-one over {:?}", offsets),
            },
        );
        self.push_constraint(Constraint {
            kind: ConstraintKind::ExactlyOne,
            a: offsets,
            b: Vec::new(),
            zp_key,
            needs_recheck: true,
            disabled: false,
        });
    }

    pub fn add_alike(&mut self, mut a: Vec<u16>, mut b: Vec<u16>, diag: &mut DiagnosticBag) {
        if a.is_empty() && b.is_empty() {
            return;
        }
        a.sort_unstable();
        a.dedup();
        b.sort_unstable();
        b.dedup();
        if a == b {
            // Trivially satisfied.
            return;
        }
        let key = (ConstraintKind::Alike, a.clone(), b.clone(), None);
        if !self.seen.insert(key) {
            return;
        }
        diag.record(
            DiagnosticCode::ConstraintAdded,
            format!("alike between {:?} and {:?}", a, b),
        );
        self.push_constraint(Constraint {
            kind: ConstraintKind::Alike,
            a,
            b,
            zp_key: None,
            needs_recheck: true,
            disabled: false,
        });
    }

    fn push_constraint(&mut self, constraint: Constraint) {
        let id = self.constraints.len() as u32;
        for offset in constraint.a.iter().chain(constraint.b.iter()) {
            self.backlinks[*offset as usize].push(id);
        }
        self.worklist.push(id);
        self.constraints.push(constraint);
    }

    /// Drop every constraint emitted for a zero-page address that turned
    /// out to be unusable (read before written).
    pub fn disable_zp(&mut self, zp: u8) {
        for constraint in &mut self.constraints {
            if constraint.zp_key == Some(zp) {
                constraint.disabled = true;
            }
        }
    }

    /// Label every constrained byte {Reloc, NoReloc}. On success, each
    /// active ExactlyOne holds exactly one Reloc member and each Alike an
    /// equal Reloc count per group.
    pub fn solve(
        &mut self,
        flags: &mut [ByteFlags],
        diag: &mut DiagnosticBag,
    ) -> Result<(), RelocError> {
        // Trivial precheck: a byte pulled toward both rewrite rules can
        // satisfy neither.
        for (offset, byte) in flags.iter_mut().enumerate() {
            if byte.contains(ByteFlags::USED_IN_ZP) && byte.contains(ByteFlags::USED_IN_MSB) {
                byte.insert(ByteFlags::NO_RELOC);
                diag.record(
                    DiagnosticCode::ByteChosenNoReloc,
                    format!("byte {} serves both a zero page and an MSB", offset),
                );
            }
            if byte.contains(ByteFlags::RELOC) && byte.contains(ByteFlags::NO_RELOC) {
                let message = format!("byte {} is both Reloc and NoReloc", offset);
                diag.record(DiagnosticCode::Inconsistency, message.clone());
                return Err(RelocError::Inconsistency(message));
            }
        }

        self.recheck_all();
        if self.propagate(flags, diag).is_err() {
            let message = "constraints are unsatisfiable".to_string();
            diag.record(DiagnosticCode::Inconsistency, message.clone());
            return Err(RelocError::Inconsistency(message));
        }

        let mut frames: Vec<Frame> = Vec::new();
        loop {
            let Some(offset) = self.pick_undecided(flags) else {
                // Leaf reached: no undecided byte participates in any
                // active constraint.
                for frame in frames {
                    self.snapshot_pool.push(frame.saved_flags);
                }
                return Ok(());
            };

            let mut saved = self.snapshot_pool.pop().unwrap_or_default();
            saved.clear();
            saved.extend_from_slice(flags);
            frames.push(Frame {
                offset,
                saved_flags: saved,
                tried_reloc: false,
            });
            let mut result = self.assume(flags, offset, ByteFlags::NO_RELOC, diag);

            while result.is_err() {
                let Some(frame) = frames.last_mut() else {
                    diag.record(
                        DiagnosticCode::NoSolution,
                        "no labeling satisfies the constraint store".to_string(),
                    );
                    return Err(RelocError::NoSolution);
                };
                flags.copy_from_slice(&frame.saved_flags);
                self.clear_rechecks();
                diag.record(
                    DiagnosticCode::SolverBacktracked,
                    format!("backtracked at byte {}", frame.offset),
                );
                if !frame.tried_reloc {
                    frame.tried_reloc = true;
                    let offset = frame.offset;
                    result = self.assume(flags, offset, ByteFlags::RELOC, diag);
                } else {
                    let frame = frames.pop().expect("frame checked above");
                    self.snapshot_pool.push(frame.saved_flags);
                    // Both labels failed here; the parent frame's other
                    // branch is next.
                }
            }
        }
    }

    fn pick_undecided(&self, flags: &[ByteFlags]) -> Option<u16> {
        for constraint in self.constraints.iter().filter(|c| !c.disabled) {
            for offset in constraint.a.iter().chain(constraint.b.iter()) {
                let byte = flags[*offset as usize];
                if !byte.intersects(ByteFlags::RELOC | ByteFlags::NO_RELOC) {
                    return Some(*offset);
                }
            }
        }
        None
    }

    fn assume(
        &mut self,
        flags: &mut [ByteFlags],
        offset: u16,
        label: ByteFlags,
        diag: &mut DiagnosticBag,
    ) -> Result<(), Inconsistent> {
        self.force(flags, offset, label, diag)?;
        self.propagate(flags, diag)
    }

    fn recheck_all(&mut self) {
        self.worklist.clear();
        for (id, constraint) in self.constraints.iter_mut().enumerate() {
            constraint.needs_recheck = !constraint.disabled;
            if !constraint.disabled {
                self.worklist.push(id as u32);
            }
        }
    }

    fn clear_rechecks(&mut self) {
        self.worklist.clear();
        for constraint in &mut self.constraints {
            constraint.needs_recheck = false;
        }
    }

    fn force(
        &mut self,
        flags: &mut [ByteFlags],
        offset: u16,
        label: ByteFlags,
        diag: &mut DiagnosticBag,
    ) -> Result<(), Inconsistent> {
        let byte = &mut flags[offset as usize];
        let opposite = if label == ByteFlags::RELOC {
            ByteFlags::NO_RELOC
        } else {
            ByteFlags::RELOC
        };
        if byte.contains(opposite) {
            return Err(Inconsistent);
        }
        if byte.contains(label) {
            return Ok(());
        }
        byte.insert(label);
        let code = if label == ByteFlags::RELOC {
            DiagnosticCode::ByteChosenReloc
        } else {
            DiagnosticCode::ByteChosenNoReloc
        };
        diag.record(code, format!("byte {}", offset));
        for id in &self.backlinks[offset as usize] {
            let constraint = &mut self.constraints[*id as usize];
            if !constraint.disabled && !constraint.needs_recheck {
                constraint.needs_recheck = true;
                self.worklist.push(*id);
            }
        }
        Ok(())
    }

    /// Iterate the recheck worklist to fixpoint.
    fn propagate(
        &mut self,
        flags: &mut [ByteFlags],
        diag: &mut DiagnosticBag,
    ) -> Result<(), Inconsistent> {
        while let Some(id) = self.worklist.pop() {
            let constraint = &mut self.constraints[id as usize];
            constraint.needs_recheck = false;
            if constraint.disabled {
                continue;
            }
            match constraint.kind {
                ConstraintKind::ExactlyOne => {
                    let group = std::mem::take(&mut self.constraints[id as usize].a);
                    let result = self.propagate_exactly_one(flags, &group, diag);
                    self.constraints[id as usize].a = group;
                    result?;
                }
                ConstraintKind::Alike => {
                    let a = std::mem::take(&mut self.constraints[id as usize].a);
                    let b = std::mem::take(&mut self.constraints[id as usize].b);
                    let result = self.propagate_alike(flags, &a, &b, diag);
                    self.constraints[id as usize].a = a;
                    self.constraints[id as usize].b = b;
                    result?;
                }
            }
        }
        Ok(())
    }

    fn propagate_exactly_one(
        &mut self,
        flags: &mut [ByteFlags],
        group: &[u16],
        diag: &mut DiagnosticBag,
    ) -> Result<(), Inconsistent> {
        let (reloc, undecided) = count_labels(flags, group);
        match reloc {
            0 => match undecided.len() {
                // Every member is pinned NoReloc; nothing can take the slot.
                0 => Err(Inconsistent),
                1 => self.force(flags, undecided[0], ByteFlags::RELOC, diag),
                _ => Ok(()),
            },
            1 => {
                for offset in undecided {
                    self.force(flags, offset, ByteFlags::NO_RELOC, diag)?;
                }
                Ok(())
            }
            _ => Err(Inconsistent),
        }
    }

    fn propagate_alike(
        &mut self,
        flags: &mut [ByteFlags],
        a: &[u16],
        b: &[u16],
        diag: &mut DiagnosticBag,
    ) -> Result<(), Inconsistent> {
        let (reloc_a, undecided_a) = count_labels(flags, a);
        let (reloc_b, undecided_b) = count_labels(flags, b);
        if reloc_a > 1 || reloc_b > 1 {
            return Err(Inconsistent);
        }
        // At most one Reloc per group, so a decided group pins its rest.
        if reloc_a == 1 {
            for offset in &undecided_a {
                self.force(flags, *offset, ByteFlags::NO_RELOC, diag)?;
            }
        }
        if reloc_b == 1 {
            for offset in &undecided_b {
                self.force(flags, *offset, ByteFlags::NO_RELOC, diag)?;
            }
        }
        match (reloc_a, reloc_b) {
            (1, 0) => match undecided_b.len() {
                0 => Err(Inconsistent),
                1 => self.force(flags, undecided_b[0], ByteFlags::RELOC, diag),
                _ => Ok(()),
            },
            (0, 1) => match undecided_a.len() {
                0 => Err(Inconsistent),
                1 => self.force(flags, undecided_a[0], ByteFlags::RELOC, diag),
                _ => Ok(()),
            },
            (0, 0) => {
                // A group with no candidates left pins the other to zero.
                if undecided_a.is_empty() {
                    for offset in &undecided_b {
                        self.force(flags, *offset, ByteFlags::NO_RELOC, diag)?;
                    }
                }
                if undecided_b.is_empty() {
                    for offset in &undecided_a {
                        self.force(flags, *offset, ByteFlags::NO_RELOC, diag)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Drop all constraints but keep the allocations around for reuse.
    pub fn reset(&mut self) {
        self.constraints.clear();
        self.seen.clear();
        for links in &mut self.backlinks {
            links.clear();
        }
        self.worklist.clear();
    }
}

fn count_labels(flags: &[ByteFlags], group: &[u16]) -> (usize, Vec<u16>) {
    let mut reloc = 0;
    let mut undecided = Vec::new();
    for offset in group {
        let byte = flags[*offset as usize];
        if byte.contains(ByteFlags::RELOC) {
            reloc += 1;
        } else if !byte.contains(ByteFlags::NO_RELOC) {
            undecided.push(*offset);
        }
    }
    (reloc, undecided)
}
