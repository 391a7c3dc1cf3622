//! Per-group stub tables: call stubs that indirect through the PLT and
//! long-branch stubs that extend a branch's reach. One logical entry may be
//! required in several encoding forms at once (TOC-using and TOC-free call
//! sites to the same function, for instance), so each entry carries a set
//! of capability flags rather than a single variant tag. Sizes are
//! distance-dependent and therefore recomputed by `place` on every
//! relaxation pass.

use crate::arch::AbiVersion;
use crate::model::SymbolRef;
use crate::plt::PltPool;
use ahash::AHashMap;
use bitflags::bitflags;
use object::Endianness;
use ppclink_utils::elf::ValueSlice;
use ppclink_utils::insn;
use ppclink_utils::powerpc64::MAX_BRANCH_OFFSET;
use ppclink_utils::powerpc64::MAX_PCREL34_OFFSET;
use ppclink_utils::powerpc64::MAX_TOC_PAIR_OFFSET;

bitflags! {
    /// Encoding forms a stub entry must provide. These accumulate across
    /// call sites and are independently true, not alternatives.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StubFlags: u8 {
        /// A caller with a live TOC pointer reaches this stub.
        const TOC = 1 << 0;

        /// A caller without a TOC pointer reaches this stub; the stub must
        /// not rely on r2.
        const NOTOC = 1 << 1;

        /// The no-TOC form may use POWER10 prefixed pc-relative
        /// instructions.
        const P10 = 1 << 2;

        /// The stub must save r2 to its stack slot before the indirect
        /// jump, because at least one call site has no TOC-save of its own.
        const R2SAVE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallStubKey {
    pub symbol: SymbolRef,
    pub addend: i64,
}

#[derive(Debug, Clone)]
pub struct CallStub {
    pub key: CallStubKey,
    pub pool: PltPool,
    pub plt_offset: u64,
    pub flags: StubFlags,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct LongBranchStub {
    pub destination: u64,
    pub flags: StubFlags,
    pub offset: u64,
    pub size: u64,
    /// Offset of the branch-lookup slot, when the address had to spill.
    pub brlt_offset: Option<u64>,
}

/// Addresses a stub table needs to size and emit its entries. All values
/// come from the current provisional layout.
#[derive(Debug, Clone, Copy)]
pub struct StubContext {
    pub toc_base: u64,
    pub plt_address: u64,
    pub local_plt_address: u64,
    pub iplt_address: u64,
    pub branch_lookup_address: u64,
    pub abi: AbiVersion,
    pub endian: Endianness,
    pub use_p10: bool,
    pub thread_safe: bool,
}

impl StubContext {
    fn plt_entry_address(&self, stub: &CallStub) -> u64 {
        let base = match stub.pool {
            PltPool::Global => self.plt_address,
            PltPool::Local => self.local_plt_address,
            PltPool::LocalIfunc => self.iplt_address,
        };
        base + stub.plt_offset
    }
}

/// The shared r2-restore helper appended once per table when any call stub
/// saved the TOC pointer: callers resume here after the callee returns.
const SAVE_RESTORE_HELPER_SIZE: u64 = 8;

#[derive(Debug)]
pub struct StubTable {
    group: usize,
    base_address: u64,
    call_stubs: Vec<CallStub>,
    call_lookup: AHashMap<CallStubKey, usize>,
    long_branch_stubs: Vec<LongBranchStub>,
    long_branch_lookup: AHashMap<u64, usize>,
    needs_save_restore: bool,
    total_size: u64,
    /// In monotonic mode the table never reports a smaller size than it
    /// already reached, which guarantees relaxation terminates even when
    /// distances oscillate around an encoding threshold.
    monotonic: bool,
}

impl StubTable {
    #[must_use]
    pub fn new(group: usize) -> Self {
        Self {
            group,
            base_address: 0,
            call_stubs: Vec::new(),
            call_lookup: AHashMap::new(),
            long_branch_stubs: Vec::new(),
            long_branch_lookup: AHashMap::new(),
            needs_save_restore: false,
            total_size: 0,
            monotonic: false,
        }
    }

    #[must_use]
    pub fn group(&self) -> usize {
        self.group
    }

    #[must_use]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn set_base_address(&mut self, address: u64) {
        self.base_address = address;
    }

    pub fn enter_monotonic_mode(&mut self) {
        self.monotonic = true;
    }

    /// Records that a call site at `caller_address` needs a call stub for
    /// `key`, marking whichever encoding variants the site requires.
    /// Returns whether the site can reach the table at its current
    /// provisional address.
    pub fn add_call_stub(
        &mut self,
        caller_address: u64,
        key: CallStubKey,
        pool: PltPool,
        plt_offset: u64,
        flags: StubFlags,
    ) -> bool {
        let index = *self.call_lookup.entry(key).or_insert_with(|| {
            self.call_stubs.push(CallStub {
                key,
                pool,
                plt_offset,
                flags: StubFlags::empty(),
                offset: 0,
                size: 0,
            });
            self.call_stubs.len() - 1
        });
        self.call_stubs[index].flags |= flags;
        self.reaches(caller_address)
    }

    /// Same pattern keyed by destination address, for plain branches whose
    /// target is simply too far away.
    pub fn add_long_branch_stub(
        &mut self,
        caller_address: u64,
        destination: u64,
        flags: StubFlags,
    ) -> bool {
        let index = *self
            .long_branch_lookup
            .entry(destination)
            .or_insert_with(|| {
                self.long_branch_stubs.push(LongBranchStub {
                    destination,
                    flags: StubFlags::empty(),
                    offset: 0,
                    size: 0,
                    brlt_offset: None,
                });
                self.long_branch_stubs.len() - 1
            });
        self.long_branch_stubs[index].flags |= flags;
        self.reaches(caller_address)
    }

    /// Whether a 24-bit branch at `caller_address` reaches this table.
    #[must_use]
    pub fn reaches(&self, caller_address: u64) -> bool {
        let distance = self.base_address.wrapping_sub(caller_address) as i64;
        // The check covers the whole table, not just its first entry, so a
        // site that passes here still passes once offsets are assigned.
        (-MAX_BRANCH_OFFSET..MAX_BRANCH_OFFSET - self.total_size as i64).contains(&distance)
    }

    /// Exact byte size of a call stub given its accumulated flags and the
    /// distance to its PLT slot.
    #[must_use]
    pub fn resolve_call_stub_size(&self, stub: &CallStub, ctx: &StubContext) -> u64 {
        let plt_entry = ctx.plt_entry_address(stub);
        let mut size = 0u64;

        if ctx.abi == AbiVersion::ElfV1 {
            // addis r11,r2,ha; std r2,40(r1); ld r12,lo(r11);
            // ld r2,lo+8(r11); mtctr r12; bctr
            size += 24;
            if ctx.thread_safe && stub.pool == PltPool::Global {
                size += 8;
            }
            return size;
        }

        if stub.flags.contains(StubFlags::TOC) || !stub.flags.contains(StubFlags::NOTOC) {
            let toc_offset = plt_entry.wrapping_sub(ctx.toc_base) as i64;
            // addis r12,r2,ha; ld r12,lo(r12); mtctr r12; bctr, with the
            // addis folded away when the high half is zero.
            size += if ValueSlice::HiAdjusted.apply(toc_offset as u64) == 0 {
                12
            } else {
                16
            };
            if stub.flags.contains(StubFlags::R2SAVE) {
                size += 4;
            }
            if ctx.thread_safe && stub.pool == PltPool::Global {
                size += 8;
            }
        }
        if stub.flags.contains(StubFlags::NOTOC) {
            let stub_address = self.base_address + stub.offset + size;
            let distance = plt_entry.wrapping_sub(stub_address) as i64;
            size += if ctx.use_p10 && stub.flags.contains(StubFlags::P10) {
                // pld r12,plt@pcrel; mtctr r12; bctr
                16
            } else if distance.unsigned_abs() < MAX_TOC_PAIR_OFFSET as u64 {
                // mflr r12; bcl 20,31,.+4; mflr r11; mtlr r12;
                // addis r12,r11,ha; ld r12,lo(r12); mtctr r12; bctr
                32
            } else {
                // Full 64-bit absolute address synthesis.
                28
            };
        }
        size
    }

    /// Exact byte size of a long-branch stub given the distance to its
    /// destination.
    #[must_use]
    pub fn resolve_long_branch_size(&self, stub: &LongBranchStub, ctx: &StubContext) -> u64 {
        let stub_address = self.base_address + stub.offset;
        let distance = stub.destination.wrapping_sub(stub_address) as i64;
        if distance.unsigned_abs() < MAX_BRANCH_OFFSET as u64 {
            return 4; // Direct branch.
        }
        if ctx.use_p10 && stub.flags.contains(StubFlags::P10) {
            return 16; // pla r12; mtctr r12; bctr
        }
        // addis/addi from the TOC base when the destination is within the
        // pair's reach; otherwise load the full address from the branch
        // lookup table. Both are four instructions.
        16
    }

    /// Whether a long-branch destination needs a branch-lookup-table slot
    /// (the address is reachable neither directly nor by TOC arithmetic).
    #[must_use]
    pub fn long_branch_needs_brlt(&self, stub: &LongBranchStub, ctx: &StubContext) -> bool {
        let stub_address = self.base_address + stub.offset;
        let distance = stub.destination.wrapping_sub(stub_address) as i64;
        if distance.unsigned_abs() < MAX_BRANCH_OFFSET as u64 {
            return false;
        }
        if ctx.use_p10 && stub.flags.contains(StubFlags::P10) {
            return false;
        }
        let toc_distance = stub.destination.wrapping_sub(ctx.toc_base) as i64;
        toc_distance.unsigned_abs() >= MAX_TOC_PAIR_OFFSET as u64
    }

    /// Assigns offsets to every entry in insertion order and returns the
    /// table's total byte size, including the shared save/restore helper
    /// when any entry needs it.
    pub fn place(&mut self, base_address: u64, ctx: &StubContext) -> u64 {
        self.base_address = base_address;
        let mut offset = 0u64;
        self.needs_save_restore = false;

        for index in 0..self.call_stubs.len() {
            self.call_stubs[index].offset = offset;
            let size = self.resolve_call_stub_size(&self.call_stubs[index], ctx);
            self.call_stubs[index].size = size;
            if self.call_stubs[index].flags.contains(StubFlags::R2SAVE) {
                self.needs_save_restore = true;
            }
            offset += size.next_multiple_of(4);
        }
        for index in 0..self.long_branch_stubs.len() {
            self.long_branch_stubs[index].offset = offset;
            let size = self.resolve_long_branch_size(&self.long_branch_stubs[index], ctx);
            self.long_branch_stubs[index].size = size;
            offset += size.next_multiple_of(4);
        }
        if self.needs_save_restore {
            offset += SAVE_RESTORE_HELPER_SIZE;
        }

        if self.monotonic {
            offset = offset.max(self.total_size);
        }
        self.total_size = offset;
        tracing::trace!(
            group = self.group,
            base_address,
            size = offset,
            calls = self.call_stubs.len(),
            long_branches = self.long_branch_stubs.len(),
            "placed stub table"
        );
        offset
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[must_use]
    pub fn call_stub_address(&self, key: &CallStubKey) -> Option<u64> {
        self.call_lookup
            .get(key)
            .map(|&index| self.base_address + self.call_stubs[index].offset)
    }

    #[must_use]
    pub fn long_branch_stub_address(&self, destination: u64) -> Option<u64> {
        self.long_branch_lookup
            .get(&destination)
            .map(|&index| self.base_address + self.long_branch_stubs[index].offset)
    }

    #[must_use]
    pub fn call_stubs(&self) -> &[CallStub] {
        &self.call_stubs
    }

    #[must_use]
    pub fn long_branch_stubs(&self) -> &[LongBranchStub] {
        &self.long_branch_stubs
    }

    pub fn long_branch_stubs_mut(&mut self) -> &mut [LongBranchStub] {
        &mut self.long_branch_stubs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.call_stubs.is_empty() && self.long_branch_stubs.is_empty()
    }

    /// Emits the table's instructions. Entry offsets and sizes must already
    /// be final.
    pub fn emit(&self, ctx: &StubContext) -> Vec<u8> {
        let e = ctx.endian;
        let mut bytes = vec![0u8; self.total_size as usize];
        let word = |bytes: &mut Vec<u8>, at: &mut usize, w: u32| {
            insn::write_u32(e, &mut bytes[*at..], w);
            *at += 4;
        };

        for stub in &self.call_stubs {
            let mut at = stub.offset as usize;
            let plt_entry = ctx.plt_entry_address(stub);

            if ctx.abi == AbiVersion::ElfV1 {
                let toc_offset = plt_entry.wrapping_sub(ctx.toc_base);
                let ha = ValueSlice::HiAdjusted.apply(toc_offset) as u32;
                let lo = ValueSlice::Lo.apply(toc_offset) as u32;
                word(&mut bytes, &mut at, insn::addis(11, 2, ha));
                word(&mut bytes, &mut at, insn::std(2, 1, 40));
                word(&mut bytes, &mut at, insn::ld(12, 11, lo));
                if ctx.thread_safe && stub.pool == PltPool::Global {
                    word(&mut bytes, &mut at, insn::cmpdi(7, 12, 0));
                }
                word(&mut bytes, &mut at, insn::ld(2, 11, lo.wrapping_add(8)));
                word(&mut bytes, &mut at, insn::mtctr(12));
                if ctx.thread_safe && stub.pool == PltPool::Global {
                    word(&mut bytes, &mut at, insn::bnectr(7));
                    word(&mut bytes, &mut at, insn::b(0));
                } else {
                    word(&mut bytes, &mut at, insn::BCTR);
                }
                continue;
            }

            if stub.flags.contains(StubFlags::TOC) || !stub.flags.contains(StubFlags::NOTOC) {
                let toc_offset = plt_entry.wrapping_sub(ctx.toc_base);
                let ha = ValueSlice::HiAdjusted.apply(toc_offset) as u32;
                let lo = ValueSlice::Lo.apply(toc_offset) as u32;
                if stub.flags.contains(StubFlags::R2SAVE) {
                    word(&mut bytes, &mut at, insn::STD_R2_24_R1);
                }
                if ha == 0 {
                    word(&mut bytes, &mut at, insn::ld(12, 2, lo));
                } else {
                    word(&mut bytes, &mut at, insn::addis(12, 2, ha));
                    word(&mut bytes, &mut at, insn::ld(12, 12, lo));
                }
                word(&mut bytes, &mut at, insn::mtctr(12));
                if ctx.thread_safe && stub.pool == PltPool::Global {
                    word(&mut bytes, &mut at, insn::cmpdi(7, 12, 0));
                    word(&mut bytes, &mut at, insn::bnectr(7));
                    word(&mut bytes, &mut at, insn::b(0));
                } else {
                    word(&mut bytes, &mut at, insn::BCTR);
                }
            }
            if stub.flags.contains(StubFlags::NOTOC) {
                let stub_address = self.base_address + at as u64;
                let distance = plt_entry.wrapping_sub(stub_address) as i64;
                if ctx.use_p10 && stub.flags.contains(StubFlags::P10) {
                    let (prefix, suffix) = insn::pld_pcrel(12, distance);
                    word(&mut bytes, &mut at, prefix);
                    word(&mut bytes, &mut at, suffix);
                } else if distance.unsigned_abs() < MAX_TOC_PAIR_OFFSET as u64 {
                    word(&mut bytes, &mut at, insn::mflr(12));
                    word(&mut bytes, &mut at, insn::BCL_20_31);
                    word(&mut bytes, &mut at, insn::mflr(11));
                    word(&mut bytes, &mut at, insn::mtlr(12));
                    // The bcl put the address of the following instruction
                    // in r11.
                    let pc = self.base_address + at as u64 - 8;
                    let offset = plt_entry.wrapping_sub(pc);
                    let ha = ValueSlice::HiAdjusted.apply(offset) as u32;
                    let lo = ValueSlice::Lo.apply(offset) as u32;
                    word(&mut bytes, &mut at, insn::addis(12, 11, ha));
                    word(&mut bytes, &mut at, insn::ld(12, 12, lo));
                } else {
                    word(&mut bytes, &mut at, insn::lis(12, (plt_entry >> 48) as u32));
                    word(&mut bytes, &mut at, insn::ori(12, 12, (plt_entry >> 32) as u32));
                    word(&mut bytes, &mut at, insn::RLDICR_R12_32);
                    word(&mut bytes, &mut at, insn::oris(12, 12, (plt_entry >> 16) as u32));
                    word(&mut bytes, &mut at, insn::ori(12, 12, plt_entry as u32));
                }
                word(&mut bytes, &mut at, insn::mtctr(12));
                word(&mut bytes, &mut at, insn::BCTR);
            }
        }

        for stub in &self.long_branch_stubs {
            let mut at = stub.offset as usize;
            let stub_address = self.base_address + stub.offset;
            let distance = stub.destination.wrapping_sub(stub_address) as i64;
            if distance.unsigned_abs() < MAX_BRANCH_OFFSET as u64 {
                word(&mut bytes, &mut at, insn::b(distance));
                continue;
            }
            if ctx.use_p10 && stub.flags.contains(StubFlags::P10) {
                let (prefix, suffix) = insn::paddi_pcrel(12, distance);
                word(&mut bytes, &mut at, prefix);
                word(&mut bytes, &mut at, suffix);
            } else if let Some(brlt_offset) = stub.brlt_offset {
                let slot = ctx.branch_lookup_address + brlt_offset;
                let toc_offset = slot.wrapping_sub(ctx.toc_base);
                let ha = ValueSlice::HiAdjusted.apply(toc_offset) as u32;
                let lo = ValueSlice::Lo.apply(toc_offset) as u32;
                word(&mut bytes, &mut at, insn::addis(12, 2, ha));
                word(&mut bytes, &mut at, insn::ld(12, 12, lo));
            } else {
                let toc_offset = stub.destination.wrapping_sub(ctx.toc_base);
                let ha = ValueSlice::HiAdjusted.apply(toc_offset) as u32;
                let lo = ValueSlice::Lo.apply(toc_offset) as u32;
                word(&mut bytes, &mut at, insn::addis(12, 2, ha));
                word(&mut bytes, &mut at, insn::addi(12, 12, lo));
            }
            word(&mut bytes, &mut at, insn::mtctr(12));
            word(&mut bytes, &mut at, insn::BCTR);
        }

        if self.needs_save_restore {
            let mut at = (self.total_size - SAVE_RESTORE_HELPER_SIZE) as usize;
            word(&mut bytes, &mut at, insn::LD_R2_24_R1);
            word(&mut bytes, &mut at, insn::BLR);
        }

        bytes
    }
}

/// Threshold table for picking a long-branch encoding, kept as literal data
/// because an off-by-one here produces a binary that assembles but jumps
/// through garbage. Each boundary has a test below.
pub const LONG_BRANCH_THRESHOLDS: &[(i64, u64)] = &[
    (MAX_BRANCH_OFFSET, 4),     // direct b
    (MAX_PCREL34_OFFSET, 16),   // pla; mtctr; bctr (POWER10)
    (MAX_TOC_PAIR_OFFSET, 16),  // addis; addi; mtctr; bctr
];

/// Picks the expected encoded size for a displacement, mirroring
/// `resolve_long_branch_size` for the thresholds alone.
#[must_use]
pub fn long_branch_size_for_distance(distance: i64, use_p10: bool) -> u64 {
    if distance.unsigned_abs() < MAX_BRANCH_OFFSET as u64 {
        return LONG_BRANCH_THRESHOLDS[0].1;
    }
    if use_p10 && distance.unsigned_abs() < MAX_PCREL34_OFFSET as u64 {
        return LONG_BRANCH_THRESHOLDS[1].1;
    }
    LONG_BRANCH_THRESHOLDS[2].1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolId;
    use rstest::rstest;

    fn ctx() -> StubContext {
        StubContext {
            toc_base: 0x1008_8000,
            plt_address: 0x1010_0000,
            local_plt_address: 0x1011_0000,
            iplt_address: 0x1012_0000,
            branch_lookup_address: 0x1009_0000,
            abi: AbiVersion::ElfV2,
            endian: Endianness::Little,
            use_p10: false,
            thread_safe: false,
        }
    }

    fn call_key(symbol: u32) -> CallStubKey {
        CallStubKey {
            symbol: SymbolRef::Global(SymbolId(symbol)),
            addend: 0,
        }
    }

    #[test]
    fn test_one_entry_per_key_with_accumulated_flags() {
        let mut table = StubTable::new(0);
        table.set_base_address(0x1000_0000);
        table.add_call_stub(0x1000_0000, call_key(1), PltPool::Global, 0, StubFlags::TOC);
        table.add_call_stub(
            0x1000_0100,
            call_key(1),
            PltPool::Global,
            0,
            StubFlags::NOTOC,
        );
        assert_eq!(table.call_stubs().len(), 1);
        let flags = table.call_stubs()[0].flags;
        assert!(flags.contains(StubFlags::TOC));
        assert!(flags.contains(StubFlags::NOTOC));
    }

    #[test]
    fn test_call_stub_sizes() {
        let mut table = StubTable::new(0);
        table.add_call_stub(0x1000_0000, call_key(1), PltPool::Global, 0, StubFlags::TOC);
        let total = table.place(0x1000_0000, &ctx());
        // addis + ld + mtctr + bctr
        assert_eq!(total, 16);

        let mut table = StubTable::new(0);
        table.add_call_stub(
            0x1000_0000,
            call_key(1),
            PltPool::Global,
            0,
            StubFlags::TOC | StubFlags::R2SAVE,
        );
        // The r2 save adds one instruction and the shared restore helper.
        let total = table.place(0x1000_0000, &ctx());
        assert_eq!(total, 20 + SAVE_RESTORE_HELPER_SIZE);
    }

    #[test]
    fn test_call_stub_folds_zero_high_half() {
        let mut context = ctx();
        // Put the PLT slot within the TOC immediate's reach.
        context.plt_address = context.toc_base + 0x100;
        let mut table = StubTable::new(0);
        table.add_call_stub(0x1000_0000, call_key(1), PltPool::Global, 0, StubFlags::TOC);
        let total = table.place(0x1000_0000, &context);
        assert_eq!(total, 12); // ld + mtctr + bctr
    }

    #[test]
    fn test_thread_safe_guard_only_for_lazy_slots() {
        let mut context = ctx();
        context.thread_safe = true;
        let mut table = StubTable::new(0);
        table.add_call_stub(0x1000_0000, call_key(1), PltPool::Global, 0, StubFlags::TOC);
        table.add_call_stub(
            0x1000_0000,
            CallStubKey {
                symbol: SymbolRef::Global(SymbolId(2)),
                addend: 0,
            },
            PltPool::Local,
            0,
            StubFlags::TOC,
        );
        table.place(0x1000_0000, &context);
        assert_eq!(table.call_stubs()[0].size, 24); // guarded
        assert_eq!(table.call_stubs()[1].size, 16); // local slots are eager
    }

    #[test]
    fn test_long_branch_direct_when_reachable() {
        let mut table = StubTable::new(0);
        table.add_long_branch_stub(0x1000_0000, 0x1010_0000, StubFlags::TOC);
        let total = table.place(0x1000_0000, &ctx());
        assert_eq!(total, 4);
        let bytes = table.emit(&ctx());
        let word = insn::read_u32(Endianness::Little, &bytes);
        assert_eq!(word, insn::b(0x0010_0000));
    }

    #[test]
    fn test_long_branch_toc_form_when_out_of_reach() {
        let mut table = StubTable::new(0);
        let destination = 0x9000_0000;
        table.add_long_branch_stub(0x1000_0000, destination, StubFlags::TOC);
        let total = table.place(0x1000_0000, &ctx());
        assert_eq!(total, 16);
    }

    #[test]
    fn test_reaches_accounts_for_table_size() {
        let mut table = StubTable::new(0);
        table.set_base_address(0x1200_0000);
        assert!(table.reaches(0x1200_0000 - (MAX_BRANCH_OFFSET as u64 - 4)));
        assert!(!table.reaches(0x1200_0000 - MAX_BRANCH_OFFSET as u64));
    }

    #[test]
    fn test_monotonic_mode_never_shrinks() {
        let mut context = ctx();
        let mut table = StubTable::new(0);
        table.add_call_stub(0x1000_0000, call_key(1), PltPool::Global, 0, StubFlags::TOC);
        let first = table.place(0x1000_0000, &context);
        assert_eq!(first, 16);
        table.enter_monotonic_mode();
        // Even if the PLT moves close enough for the short form, the table
        // keeps its size.
        context.plt_address = context.toc_base + 0x100;
        let second = table.place(0x1000_0000, &context);
        assert_eq!(second, 16);
    }

    #[rstest]
    #[case(MAX_BRANCH_OFFSET - 4, false, 4)]
    #[case(MAX_BRANCH_OFFSET, false, 16)]
    #[case(-MAX_BRANCH_OFFSET, false, 4)]
    #[case(-MAX_BRANCH_OFFSET - 4, false, 16)]
    #[case(MAX_PCREL34_OFFSET - 4, true, 16)]
    #[case(MAX_BRANCH_OFFSET, true, 16)]
    #[case(MAX_TOC_PAIR_OFFSET, false, 16)]
    fn test_long_branch_thresholds(
        #[case] distance: i64,
        #[case] use_p10: bool,
        #[case] expected: u64,
    ) {
        assert_eq!(long_branch_size_for_distance(distance, use_p10), expected);
    }
}
