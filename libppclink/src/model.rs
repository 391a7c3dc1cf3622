//! The in-memory model of the inputs the generic linker core hands to the
//! backend: sections, relocation records and symbols. Everything here is
//! immutable once classification starts; the backend attaches its own state
//! (GOT/PLT offsets, stub entries) in its own tables rather than mutating
//! these records.

use crate::value_flags::ValueFlags;
use ppclink_utils::elf::SectionFlags;
use std::fmt;

/// Identifies an input object within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object #{}", self.0)
    }
}

/// Identifies a global symbol shared across all input objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A reference from a relocation to either a global symbol or an
/// object-scoped local symbol. Used as the key of every auxiliary table, so
/// it needs cheap hashing and a total order for deterministic diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolRef {
    Global(SymbolId),
    Local { object: ObjectId, index: u32 },
}

/// Where a defined symbol lives, before addresses are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub object: ObjectId,
    pub section: usize,
    pub offset: u64,
}

/// A relocation as read from an input object. Immutable.
#[derive(Debug, Clone, Copy)]
pub struct RelocationRecord {
    pub offset: u64,
    pub r_type: u32,
    pub symbol: SymbolRef,
    pub addend: i64,
}

#[derive(Debug, Clone)]
pub struct InputSection {
    pub name: String,
    pub bytes: Vec<u8>,
    pub flags: SectionFlags,
    pub alignment: u64,
    pub relocations: Vec<RelocationRecord>,
}

impl InputSection {
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.flags.contains(ppclink_utils::elf::shf::EXECINSTR)
    }

    #[must_use]
    pub fn is_alloc(&self) -> bool {
        self.flags.contains(ppclink_utils::elf::shf::ALLOC)
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.flags.contains(ppclink_utils::elf::shf::TLS)
    }
}

#[derive(Debug, Clone)]
pub struct LocalSymbol {
    pub section: Option<usize>,
    pub offset: u64,
    pub st_other: u8,
    pub flags: ValueFlags,
}

/// ABI convention attributes declared by one input, merged across the link
/// per the mismatch policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbiAttributes {
    /// 0 = unset, 1 = hard-float double, 2 = soft-float, 3 = single-
    /// precision hard-float, mirroring Tag_GNU_Power_ABI_FP's low bits.
    pub fp: u32,
    /// 0 = unset, 1 = generic, 2 = AltiVec, 3 = SPE.
    pub vector: u32,
    /// 0 = unset, 1 = r3/r4 return, 2 = memory return.
    pub struct_return: u32,
}

#[derive(Debug, Clone)]
pub struct InputObject {
    pub name: String,
    pub sections: Vec<InputSection>,
    pub local_symbols: Vec<LocalSymbol>,
    pub attributes: AbiAttributes,
}

impl InputObject {
    pub fn local_symbol(&self, index: u32) -> crate::error::Result<&LocalSymbol> {
        self.local_symbols
            .get(index as usize)
            .ok_or_else(|| anyhow::anyhow!("Local symbol {index} out of range in {}", self.name))
    }
}

/// A global symbol as resolved by the generic core. The backend reads the
/// attributes and the definition; it never mutates these entries.
#[derive(Debug, Clone)]
pub struct GlobalSymbol {
    pub name: String,
    pub definition: Option<Location>,
    /// Value for absolute symbols and for symbols defined by shared objects
    /// (where it is only used for diagnostics).
    pub absolute_value: u64,
    pub st_other: u8,
    pub flags: ValueFlags,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<GlobalSymbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: GlobalSymbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    #[must_use]
    pub fn get(&self, id: SymbolId) -> &GlobalSymbol {
        &self.symbols[id.as_usize()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &GlobalSymbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }
}

/// Summary of what a relocation's symbol looks like to the classifier,
/// assembled once per relocation from either the local or the global side.
#[derive(Debug, Clone, Copy)]
pub struct SymbolView {
    pub flags: ValueFlags,
    pub st_other: u8,
}

pub(crate) fn symbol_view(
    objects: &[InputObject],
    symbols: &SymbolTable,
    symbol: SymbolRef,
) -> crate::error::Result<SymbolView> {
    match symbol {
        SymbolRef::Global(id) => {
            let sym = symbols.get(id);
            Ok(SymbolView {
                flags: sym.flags,
                st_other: sym.st_other,
            })
        }
        SymbolRef::Local { object, index } => {
            let local = objects[object.as_usize()].local_symbol(index)?;
            Ok(SymbolView {
                flags: local.flags | ValueFlags::NON_INTERPOSABLE,
                st_other: local.st_other,
            })
        }
    }
}
