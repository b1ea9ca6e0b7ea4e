//! The relocator's shadow of the machine: a full 64 KiB RAM image with a
//! provenance chain and access flags per address, plus the per-program-
//! byte analysis state the solver and the final rewrite pass consume.

use bitflags::bitflags;

use super::provenance::{Chain, ProvenancePool, NONE};

bitflags! {
    /// Per-address observation of how the program touched memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u8 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        /// The first access was a read, so the cell carried preexisting
        /// state the program depends on.
        const READ_BEFORE_WRITE = 0b0000_0100;
    }
}

bitflags! {
    /// Per-program-byte labels. RELOC/NO_RELOC are the solver's output;
    /// the USED_IN_* bits say which rewrite rule applies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ByteFlags: u8 {
        const RELOC = 0b0000_0001;
        const NO_RELOC = 0b0000_0010;
        const USED_IN_ZP = 0b0000_0100;
        const USED_IN_MSB = 0b0000_1000;
        const READ = 0b0001_0000;
        const WRITE = 0b0010_0000;
    }
}

/// A 256-bit set of zero-page addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZpSet(pub [u64; 4]);

impl ZpSet {
    pub const EMPTY: ZpSet = ZpSet([0; 4]);

    pub fn insert(&mut self, addr: u8) {
        self.0[(addr >> 6) as usize] |= 1 << (addr & 0x3f);
    }

    pub fn contains(&self, addr: u8) -> bool {
        self.0[(addr >> 6) as usize] & (1 << (addr & 0x3f)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0; 4]
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=255u8).filter(|addr| self.contains(*addr))
    }
}

pub struct Shadow {
    /// The emulated RAM the program runs in.
    pub ram: Box<[u8; 0x10000]>,
    /// Chain head per RAM address.
    provenance: Vec<Chain>,
    pub access: Vec<AccessFlags>,
    origin: u16,
    program: Vec<u8>,
    /// Solver labels per program byte.
    pub byte_flags: Vec<ByteFlags>,
    /// Which zero-page addresses each program byte contributes to.
    pub zp_usage: Vec<ZpSet>,
}

impl Shadow {
    pub fn new(origin: u16, program: Vec<u8>) -> Shadow {
        let mut shadow = Shadow {
            ram: Box::new([0; 0x10000]),
            provenance: vec![NONE; 0x10000],
            access: vec![AccessFlags::empty(); 0x10000],
            origin,
            byte_flags: vec![ByteFlags::empty(); program.len()],
            zp_usage: vec![ZpSet::EMPTY; program.len()],
            program,
        };
        shadow.load_program();
        shadow
    }

    fn load_program(&mut self) {
        for (index, value) in self.program.iter().enumerate() {
            self.ram[self.origin as usize + index] = *value;
        }
    }

    pub fn origin(&self) -> u16 {
        self.origin
    }

    pub fn program(&self) -> &[u8] {
        &self.program
    }

    pub fn program_len(&self) -> usize {
        self.program.len()
    }

    /// The program byte offset a RAM address corresponds to, if it lies
    /// inside the image.
    pub fn offset_of(&self, addr: u16) -> Option<u16> {
        let offset = addr.wrapping_sub(self.origin);
        if (offset as usize) < self.program.len() {
            Some(offset)
        } else {
            None
        }
    }

    pub fn in_image(&self, addr: u16) -> bool {
        self.offset_of(addr).is_some()
    }

    pub fn chain(&self, addr: u16) -> Chain {
        self.provenance[addr as usize]
    }

    /// Install a copy of `chain` as the cell's provenance, freeing the old
    /// owner.
    pub fn set_chain(&mut self, pool: &mut ProvenancePool, addr: u16, chain: Chain) {
        pool.replace(&mut self.provenance[addr as usize], chain);
    }

    pub fn clear_chain(&mut self, pool: &mut ProvenancePool, addr: u16) {
        pool.free(self.provenance[addr as usize]);
        self.provenance[addr as usize] = NONE;
    }

    pub fn note_read(&mut self, addr: u16) {
        let flags = &mut self.access[addr as usize];
        if !flags.contains(AccessFlags::WRITE) {
            flags.insert(AccessFlags::READ_BEFORE_WRITE);
        }
        flags.insert(AccessFlags::READ);
        if let Some(offset) = self.offset_of(addr) {
            self.byte_flags[offset as usize].insert(ByteFlags::READ);
        }
    }

    pub fn note_write(&mut self, addr: u16) {
        self.access[addr as usize].insert(AccessFlags::WRITE);
        if let Some(offset) = self.offset_of(addr) {
            self.byte_flags[offset as usize].insert(ByteFlags::WRITE);
        }
    }

    /// Seed every program byte's provenance with its own offset, so a load
    /// from the image starts a chain at the byte that produced the value.
    pub fn seed_provenance(&mut self, pool: &mut ProvenancePool) {
        for offset in 0..self.program.len() {
            let addr = self.origin as usize + offset;
            pool.free(self.provenance[addr]);
            self.provenance[addr] = pool.single(offset as u16);
        }
    }

    /// Forget everything a run learned and restore the pristine image.
    pub fn reset(&mut self, pool: &mut ProvenancePool) {
        self.ram.fill(0);
        pool.reset();
        self.provenance.fill(NONE);
        self.access.fill(AccessFlags::empty());
        self.byte_flags.fill(ByteFlags::empty());
        self.zp_usage.fill(ZpSet::EMPTY);
        self.load_program();
    }
}
