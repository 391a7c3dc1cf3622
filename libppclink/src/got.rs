//! The GOT builder. Slots are keyed by `(symbol, kind, addend)` and
//! append-only: once a slot is handed out its offset never changes, which
//! keeps already-emitted dynamic relocations stable across relaxation
//! passes.

use crate::args::OutputKind;
use crate::artifacts::DynamicRelocation;
use crate::artifacts::RelocTarget;
use crate::model::SymbolRef;
use crate::value_flags::ValueFlags;
use ahash::AHashMap;
use ppclink_utils::elf::DynamicRelocationKind;
use ppclink_utils::elf::TOC_BASE_OFFSET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GotKind {
    /// One word holding the symbol's address.
    Standard,
    /// Module ID + DTPREL pair for a general-dynamic access.
    TlsGdPair,
    /// Module ID + zero pair shared by all local-dynamic accesses of one
    /// module.
    TlsLdPair,
    /// One word holding the symbol's thread-pointer-relative offset.
    TpRel,
    /// One word holding the symbol's module-relative offset.
    DtpRel,
}

impl GotKind {
    #[must_use]
    pub fn num_words(self) -> u64 {
        match self {
            GotKind::TlsGdPair | GotKind::TlsLdPair => 2,
            GotKind::Standard | GotKind::TpRel | GotKind::DtpRel => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GotKey {
    pub symbol: SymbolRef,
    pub kind: GotKind,
    pub addend: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct GotEntry {
    pub key: GotKey,
    pub offset: u64,
}

#[derive(Debug)]
pub struct GotBuilder {
    word_bytes: u64,
    output_kind: OutputKind,
    entries: Vec<GotEntry>,
    lookup: AHashMap<GotKey, u64>,
    next_offset: u64,
    /// The one module-ID pair shared by every local-dynamic access.
    tlsld_entry: Option<u64>,
    dynamic: Vec<DynamicRelocation>,
}

impl GotBuilder {
    #[must_use]
    pub fn new(word_bytes: u64, output_kind: OutputKind) -> Self {
        Self {
            word_bytes,
            output_kind,
            entries: Vec::new(),
            lookup: AHashMap::new(),
            // The word at the TOC base itself is reserved; some ABIs store
            // a back-pointer to the dynamic section there.
            next_offset: 0,
            tlsld_entry: None,
            dynamic: Vec::new(),
        }
    }

    /// The module's shared local-dynamic GOT pair, allocated lazily on the
    /// first local-dynamic access.
    pub fn tlsld(&mut self) -> u64 {
        if let Some(offset) = self.tlsld_entry {
            return offset;
        }
        let offset = self.next_offset;
        self.next_offset += 2 * self.word_bytes;
        if self.output_kind.is_relocatable() {
            self.dynamic.push(DynamicRelocation {
                target: RelocTarget::Got,
                offset,
                kind: DynamicRelocationKind::DtpMod,
                symbol: None,
                addend: 0,
            });
        }
        self.tlsld_entry = Some(offset);
        offset
    }

    #[must_use]
    pub fn tlsld_entry(&self) -> Option<u64> {
        self.tlsld_entry
    }

    /// Returns the slot offset for `key`, allocating it on first use.
    /// `flags` are the symbol's attributes; they decide whether the slot
    /// value is link-time-known or needs a dynamic relocation.
    pub fn add(&mut self, key: GotKey, flags: ValueFlags) -> u64 {
        if let Some(&offset) = self.lookup.get(&key) {
            return offset;
        }
        let offset = self.next_offset;
        self.next_offset += key.kind.num_words() * self.word_bytes;
        self.entries.push(GotEntry { key, offset });
        self.lookup.insert(key, offset);
        self.emit_dynamic(key, offset, flags);
        tracing::trace!(?key, offset, "allocated GOT slot");
        offset
    }

    /// The slot offset if one was allocated during classification.
    #[must_use]
    pub fn lookup(&self, key: &GotKey) -> Option<u64> {
        self.lookup.get(key).copied()
    }

    fn emit_dynamic(&mut self, key: GotKey, offset: u64, flags: ValueFlags) {
        let is_relocatable = self.output_kind.is_relocatable();
        let push = |dynamic: &mut Vec<DynamicRelocation>, offset, kind, symbol, addend| {
            dynamic.push(DynamicRelocation {
                target: RelocTarget::Got,
                offset,
                kind,
                symbol,
                addend,
            });
        };
        match key.kind {
            GotKind::Standard => {
                if flags.is_ifunc() {
                    push(
                        &mut self.dynamic,
                        offset,
                        DynamicRelocationKind::Irelative,
                        Some(key.symbol),
                        key.addend,
                    );
                } else if flags.is_dynamic() || (flags.is_interposable() && is_relocatable) {
                    push(
                        &mut self.dynamic,
                        offset,
                        DynamicRelocationKind::GotEntry,
                        Some(key.symbol),
                        key.addend,
                    );
                } else if is_relocatable && flags.is_address() {
                    push(
                        &mut self.dynamic,
                        offset,
                        DynamicRelocationKind::Relative,
                        None,
                        key.addend,
                    );
                }
            }
            GotKind::TlsGdPair => {
                if is_relocatable || flags.is_dynamic() {
                    push(
                        &mut self.dynamic,
                        offset,
                        DynamicRelocationKind::DtpMod,
                        Some(key.symbol),
                        0,
                    );
                    push(
                        &mut self.dynamic,
                        offset + self.word_bytes,
                        DynamicRelocationKind::DtpOff,
                        Some(key.symbol),
                        key.addend,
                    );
                }
            }
            GotKind::TlsLdPair => {
                if is_relocatable {
                    push(&mut self.dynamic, offset, DynamicRelocationKind::DtpMod, None, 0);
                }
            }
            GotKind::TpRel => {
                if is_relocatable || flags.is_dynamic() {
                    push(
                        &mut self.dynamic,
                        offset,
                        DynamicRelocationKind::TpOff,
                        Some(key.symbol),
                        key.addend,
                    );
                }
            }
            GotKind::DtpRel => {}
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[GotEntry] {
        &self.entries
    }

    #[must_use]
    pub fn dynamic_relocations(&self) -> &[DynamicRelocation] {
        &self.dynamic
    }

    /// Total byte size of the GOT section.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.next_offset
    }

    /// Offset of a slot relative to the TOC base pointer, which sits
    /// `TOC_BASE_OFFSET` past the section start.
    #[must_use]
    pub fn toc_relative_offset(&self, slot_offset: u64) -> i64 {
        slot_offset as i64 - TOC_BASE_OFFSET as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SymbolId;

    fn key(symbol: u32, kind: GotKind, addend: i64) -> GotKey {
        GotKey {
            symbol: SymbolRef::Global(SymbolId(symbol)),
            kind,
            addend,
        }
    }

    #[test]
    fn test_one_slot_per_key() {
        let mut got = GotBuilder::new(8, OutputKind::StaticExecutable);
        let a = got.add(key(1, GotKind::Standard, 0), ValueFlags::NON_INTERPOSABLE);
        let b = got.add(key(1, GotKind::Standard, 0), ValueFlags::NON_INTERPOSABLE);
        assert_eq!(a, b);
        assert_eq!(got.entries().len(), 1);
        // A different addend is a different slot.
        let c = got.add(key(1, GotKind::Standard, 8), ValueFlags::NON_INTERPOSABLE);
        assert_ne!(a, c);
        assert_eq!(got.size(), 16);
    }

    #[test]
    fn test_slot_numbering_is_append_order() {
        let mut got = GotBuilder::new(8, OutputKind::StaticExecutable);
        let a = got.add(key(3, GotKind::TlsGdPair, 0), ValueFlags::NON_INTERPOSABLE);
        let b = got.add(key(1, GotKind::Standard, 0), ValueFlags::NON_INTERPOSABLE);
        assert_eq!(a, 0);
        assert_eq!(b, 16); // The GD pair takes two words.
    }

    #[test]
    fn test_dynamic_relocations_for_interposable() {
        let mut got = GotBuilder::new(8, OutputKind::SharedObject);
        got.add(key(1, GotKind::Standard, 0), ValueFlags::empty());
        let rels = got.dynamic_relocations();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].kind, DynamicRelocationKind::GotEntry);
    }

    #[test]
    fn test_tls_gd_pair_relocations_in_shared_object() {
        let mut got = GotBuilder::new(8, OutputKind::SharedObject);
        got.add(key(2, GotKind::TlsGdPair, 0), ValueFlags::TLS);
        let kinds: Vec<_> = got.dynamic_relocations().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![DynamicRelocationKind::DtpMod, DynamicRelocationKind::DtpOff]
        );
    }

    #[test]
    fn test_static_executable_needs_no_dynamic_relocations() {
        let mut got = GotBuilder::new(8, OutputKind::StaticExecutable);
        got.add(key(1, GotKind::Standard, 0), ValueFlags::NON_INTERPOSABLE);
        got.add(key(2, GotKind::TpRel, 0), ValueFlags::NON_INTERPOSABLE | ValueFlags::TLS);
        assert!(got.dynamic_relocations().is_empty());
    }

    #[test]
    fn test_ifunc_gets_irelative() {
        let mut got = GotBuilder::new(8, OutputKind::StaticExecutable);
        got.add(
            key(1, GotKind::Standard, 0),
            ValueFlags::IFUNC | ValueFlags::NON_INTERPOSABLE,
        );
        assert_eq!(
            got.dynamic_relocations()[0].kind,
            DynamicRelocationKind::Irelative
        );
    }
}
