//! The branch lookup table (64-bit only). When even a long-branch stub
//! cannot encode the distance to its destination, the stub instead loads a
//! full-width address from this table. Keyed by destination address.

use crate::args::OutputKind;
use crate::artifacts::DynamicRelocation;
use crate::artifacts::RelocTarget;
use ahash::AHashMap;
use ppclink_utils::elf::DynamicRelocationKind;

#[derive(Debug, Clone, Copy)]
pub struct BranchLookupEntry {
    pub destination: u64,
    pub offset: u64,
}

#[derive(Debug)]
pub struct BranchLookupTable {
    entries: Vec<BranchLookupEntry>,
    lookup: AHashMap<u64, u64>,
    output_kind: OutputKind,
    dynamic: Vec<DynamicRelocation>,
}

impl BranchLookupTable {
    #[must_use]
    pub fn new(output_kind: OutputKind) -> Self {
        Self {
            entries: Vec::new(),
            lookup: AHashMap::new(),
            output_kind,
            dynamic: Vec::new(),
        }
    }

    /// Returns the table offset of the slot holding `destination`.
    pub fn add(&mut self, destination: u64) -> u64 {
        if let Some(&offset) = self.lookup.get(&destination) {
            return offset;
        }
        let offset = self.entries.len() as u64 * 8;
        self.entries.push(BranchLookupEntry {
            destination,
            offset,
        });
        self.lookup.insert(destination, offset);
        if self.output_kind.is_relocatable() {
            self.dynamic.push(DynamicRelocation {
                target: RelocTarget::BranchLookup,
                offset,
                kind: DynamicRelocationKind::Relative,
                symbol: None,
                addend: destination as i64,
            });
        }
        offset
    }

    #[must_use]
    pub fn entries(&self) -> &[BranchLookupEntry] {
        &self.entries
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.entries.len() as u64 * 8
    }

    #[must_use]
    pub fn dynamic_relocations(&self) -> &[DynamicRelocation] {
        &self.dynamic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_destination() {
        let mut brlt = BranchLookupTable::new(OutputKind::StaticExecutable);
        let a = brlt.add(0x1000_0000);
        let b = brlt.add(0x2000_0000);
        let c = brlt.add(0x1000_0000);
        assert_eq!(a, c);
        assert_eq!((a, b), (0, 8));
        assert_eq!(brlt.size(), 16);
    }

    #[test]
    fn test_pie_entries_need_relative_relocations() {
        let mut brlt = BranchLookupTable::new(OutputKind::PositionIndependentExecutable);
        brlt.add(0x1234_5678);
        assert_eq!(brlt.dynamic_relocations().len(), 1);
        assert_eq!(brlt.dynamic_relocations()[0].addend, 0x1234_5678);
    }
}
