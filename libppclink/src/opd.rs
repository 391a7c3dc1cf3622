//! Function descriptor table for the ELFv1 ABI. A function's "address" is
//! the address of a three-word descriptor (entry point, TOC pointer,
//! environment); taking the address of a function and calling through that
//! address must agree, so address-of relocations resolve through this table
//! to the descriptor while direct calls resolve to the entry point inside
//! it.

use crate::model::Location;
use crate::model::SymbolRef;
use ahash::AHashMap;

#[derive(Debug, Clone, Copy)]
pub struct FunctionDescriptor {
    pub symbol: SymbolRef,
    /// Where the function's code actually starts.
    pub code: Location,
    pub offset: u64,
}

#[derive(Debug, Default)]
pub struct FunctionDescriptorTable {
    entries: Vec<FunctionDescriptor>,
    lookup: AHashMap<SymbolRef, u64>,
}

pub const DESCRIPTOR_SIZE: u64 = 24;

impl FunctionDescriptorTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: SymbolRef, code: Location) -> u64 {
        if let Some(&offset) = self.lookup.get(&symbol) {
            return offset;
        }
        let offset = self.entries.len() as u64 * DESCRIPTOR_SIZE;
        self.entries.push(FunctionDescriptor {
            symbol,
            code,
            offset,
        });
        self.lookup.insert(symbol, offset);
        offset
    }

    #[must_use]
    pub fn lookup(&self, symbol: SymbolRef) -> Option<u64> {
        self.lookup.get(&symbol).copied()
    }

    /// The code location a descriptor points at, for call-style resolution.
    #[must_use]
    pub fn code_location(&self, symbol: SymbolRef) -> Option<Location> {
        let offset = self.lookup(symbol)?;
        Some(self.entries[(offset / DESCRIPTOR_SIZE) as usize].code)
    }

    #[must_use]
    pub fn entries(&self) -> &[FunctionDescriptor] {
        &self.entries
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.entries.len() as u64 * DESCRIPTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectId;
    use crate::model::SymbolId;

    #[test]
    fn test_descriptor_per_symbol() {
        let mut opd = FunctionDescriptorTable::new();
        let loc = Location {
            object: ObjectId(0),
            section: 1,
            offset: 0x40,
        };
        let a = opd.add(SymbolRef::Global(SymbolId(1)), loc);
        let b = opd.add(SymbolRef::Global(SymbolId(1)), loc);
        assert_eq!(a, b);
        assert_eq!(opd.size(), DESCRIPTOR_SIZE);
        assert_eq!(opd.code_location(SymbolRef::Global(SymbolId(1))), Some(loc));
    }
}
