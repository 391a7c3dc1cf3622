//! PLT builders. Three pools exist because their preemption and relocation
//! semantics differ: globally-visible entries are resolved lazily through
//! jump-slot relocations, local entries just need the address filled in at
//! load time, and local ifunc entries must be resolved by running the
//! resolver function. Like the GOT, every pool is append-only.

use crate::args::OutputKind;
use crate::artifacts::DynamicRelocation;
use crate::artifacts::RelocTarget;
use crate::model::SymbolRef;
use crate::value_flags::ValueFlags;
use ahash::AHashMap;
use ppclink_utils::elf::DynamicRelocationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PltPool {
    Global,
    Local,
    LocalIfunc,
}

impl PltPool {
    fn target(self) -> RelocTarget {
        match self {
            PltPool::Global => RelocTarget::Plt,
            PltPool::Local => RelocTarget::LocalPlt,
            PltPool::LocalIfunc => RelocTarget::Iplt,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PltEntry {
    pub symbol: SymbolRef,
    pub offset: u64,
    pub relocation: Option<DynamicRelocationKind>,
}

#[derive(Debug)]
struct Pool {
    entries: Vec<PltEntry>,
    lookup: AHashMap<SymbolRef, u64>,
    next_offset: u64,
}

impl Pool {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            lookup: AHashMap::new(),
            next_offset: 0,
        }
    }
}

#[derive(Debug)]
pub struct PltBuilder {
    slot_size: u64,
    output_kind: OutputKind,
    global: Pool,
    local: Pool,
    local_ifunc: Pool,
    dynamic: Vec<DynamicRelocation>,
}

impl PltBuilder {
    #[must_use]
    pub fn new(slot_size: u64, output_kind: OutputKind) -> Self {
        Self {
            slot_size,
            output_kind,
            global: Pool::new(),
            local: Pool::new(),
            local_ifunc: Pool::new(),
            dynamic: Vec::new(),
        }
    }

    /// Picks the pool a symbol's entry belongs in.
    #[must_use]
    pub fn pool_for(symbol: SymbolRef, flags: ValueFlags) -> PltPool {
        if flags.is_ifunc() {
            return PltPool::LocalIfunc;
        }
        match symbol {
            SymbolRef::Global(_) if flags.is_interposable() || flags.is_dynamic() => {
                PltPool::Global
            }
            _ => PltPool::Local,
        }
    }

    /// Returns the offset of the symbol's slot within its pool's section,
    /// allocating the slot on first use.
    pub fn add(&mut self, symbol: SymbolRef, flags: ValueFlags) -> (PltPool, u64) {
        let pool_id = Self::pool_for(symbol, flags);
        let relocation = match pool_id {
            PltPool::Global => Some(DynamicRelocationKind::JumpSlot),
            PltPool::LocalIfunc => Some(DynamicRelocationKind::Irelative),
            PltPool::Local => self
                .output_kind
                .is_relocatable()
                .then_some(DynamicRelocationKind::Relative),
        };
        let slot_size = self.slot_size;
        let pool = self.pool_mut(pool_id);
        if let Some(&offset) = pool.lookup.get(&symbol) {
            return (pool_id, offset);
        }
        let offset = pool.next_offset;
        pool.next_offset += slot_size;
        pool.entries.push(PltEntry {
            symbol,
            offset,
            relocation,
        });
        pool.lookup.insert(symbol, offset);
        if let Some(kind) = relocation {
            // Lazy jump slots and ifunc slots relocate the address word of
            // the slot; on descriptor ABIs that word comes first, so the
            // slot offset is the relocation offset either way.
            self.dynamic.push(DynamicRelocation {
                target: pool_id.target(),
                offset,
                kind,
                symbol: (kind != DynamicRelocationKind::Relative).then_some(symbol),
                addend: 0,
            });
        }
        tracing::trace!(?symbol, ?pool_id, offset, "allocated PLT slot");
        (pool_id, offset)
    }

    #[must_use]
    pub fn lookup(&self, symbol: SymbolRef, flags: ValueFlags) -> Option<(PltPool, u64)> {
        let pool_id = Self::pool_for(symbol, flags);
        self.pool(pool_id)
            .lookup
            .get(&symbol)
            .map(|&offset| (pool_id, offset))
    }

    fn pool(&self, id: PltPool) -> &Pool {
        match id {
            PltPool::Global => &self.global,
            PltPool::Local => &self.local,
            PltPool::LocalIfunc => &self.local_ifunc,
        }
    }

    fn pool_mut(&mut self, id: PltPool) -> &mut Pool {
        match id {
            PltPool::Global => &mut self.global,
            PltPool::Local => &mut self.local,
            PltPool::LocalIfunc => &mut self.local_ifunc,
        }
    }

    #[must_use]
    pub fn entries(&self, id: PltPool) -> &[PltEntry] {
        &self.pool(id).entries
    }

    #[must_use]
    pub fn size(&self, id: PltPool) -> u64 {
        self.pool(id).next_offset
    }

    #[must_use]
    pub fn dynamic_relocations(&self) -> &[DynamicRelocation] {
        &self.dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectId;
    use crate::model::SymbolId;

    #[test]
    fn test_pools_are_separate() {
        let mut plt = PltBuilder::new(8, OutputKind::DynamicExecutable);
        let (pool_a, a) = plt.add(SymbolRef::Global(SymbolId(1)), ValueFlags::DYNAMIC);
        let (pool_b, b) = plt.add(
            SymbolRef::Local {
                object: ObjectId(0),
                index: 5,
            },
            ValueFlags::IFUNC | ValueFlags::NON_INTERPOSABLE,
        );
        assert_eq!(pool_a, PltPool::Global);
        assert_eq!(pool_b, PltPool::LocalIfunc);
        // Each pool numbers its slots from zero.
        assert_eq!(a, 0);
        assert_eq!(b, 0);
    }

    #[test]
    fn test_one_slot_per_symbol() {
        let mut plt = PltBuilder::new(24, OutputKind::DynamicExecutable);
        let first = plt.add(SymbolRef::Global(SymbolId(7)), ValueFlags::DYNAMIC);
        let again = plt.add(SymbolRef::Global(SymbolId(7)), ValueFlags::DYNAMIC);
        assert_eq!(first, again);
        assert_eq!(plt.size(PltPool::Global), 24);
        assert_eq!(plt.dynamic_relocations().len(), 1);
        assert_eq!(
            plt.dynamic_relocations()[0].kind,
            DynamicRelocationKind::JumpSlot
        );
    }

    #[test]
    fn test_non_interposable_global_function_is_local() {
        let mut plt = PltBuilder::new(8, OutputKind::StaticExecutable);
        let (pool, _) = plt.add(
            SymbolRef::Global(SymbolId(3)),
            ValueFlags::FUNCTION | ValueFlags::NON_INTERPOSABLE,
        );
        assert_eq!(pool, PltPool::Local);
        // A static link needs no relocation for it either.
        assert!(plt.dynamic_relocations().is_empty());
    }

    #[test]
    fn test_local_pool_in_pie_gets_relative() {
        let mut plt = PltBuilder::new(8, OutputKind::PositionIndependentExecutable);
        plt.add(
            SymbolRef::Local {
                object: ObjectId(1),
                index: 2,
            },
            ValueFlags::FUNCTION | ValueFlags::NON_INTERPOSABLE,
        );
        assert_eq!(
            plt.dynamic_relocations()[0].kind,
            DynamicRelocationKind::Relative
        );
        assert_eq!(plt.dynamic_relocations()[0].symbol, None);
    }
}
