//! Address assignment for the backend's view of the output: executable
//! sections in group order with stub tables interleaved, then the generated
//! tables, then data and TLS sections. Recomputed by the relaxation driver
//! every time a stub table changes size; everything downstream reads
//! addresses only through the [`OutputLayout`] produced here.

use crate::arch::PowerPcArch;
use crate::error::Result;
use crate::model::InputObject;
use crate::model::Location;
use crate::model::ObjectId;
use crate::model::SymbolRef;
use crate::model::SymbolTable;
use crate::stub_group::CodeSectionRef;
use crate::stub_group::StubGroup;
use crate::value_flags::ValueFlags;
use ppclink_utils::elf::PPC_TLS_DTV_OFFSET;
use ppclink_utils::elf::PPC_TP_OFFSET;
use ppclink_utils::elf::TOC_BASE_OFFSET;

/// Byte sizes of the generated tables, queried from the builders when a
/// layout is computed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableSizes {
    pub got: u64,
    pub plt: u64,
    pub local_plt: u64,
    pub iplt: u64,
    pub branch_lookup: u64,
    pub function_descriptors: u64,
}

#[derive(Debug, Default)]
pub struct OutputLayout {
    /// Address of every input section, indexed `[object][section]`.
    /// `None` for sections that don't get loaded.
    section_addresses: Vec<Vec<Option<u64>>>,
    /// Address of each group's stub table.
    pub stub_table_addresses: Vec<u64>,
    pub got_address: u64,
    pub plt_address: u64,
    pub local_plt_address: u64,
    pub iplt_address: u64,
    pub branch_lookup_address: u64,
    pub function_descriptor_address: u64,
    pub toc_base: u64,
    pub tls_start: u64,
    pub tls_end: u64,
}

impl OutputLayout {
    pub fn compute<A: PowerPcArch>(
        objects: &[InputObject],
        code_order: &[CodeSectionRef],
        groups: &[StubGroup],
        stub_sizes: &[u64],
        tables: TableSizes,
        image_base: u64,
    ) -> OutputLayout {
        debug_assert_eq!(groups.len(), stub_sizes.len());

        let mut layout = OutputLayout {
            section_addresses: objects
                .iter()
                .map(|o| vec![None; o.sections.len()])
                .collect(),
            ..Default::default()
        };
        let mut cursor = image_base;

        // Code, with each group's stub table right after its owner section.
        for (group_index, group) in groups.iter().enumerate() {
            for code_index in group.sections.clone() {
                let (object_id, section_index) = code_order[code_index];
                cursor = layout.place(objects, object_id, section_index, cursor);
            }
            layout.stub_table_addresses.push(cursor);
            cursor += stub_sizes[group_index];
        }
        // Before grouping runs, lay the code out back to back.
        if groups.is_empty() {
            for &(object_id, section_index) in code_order {
                cursor = layout.place(objects, object_id, section_index, cursor);
            }
        }

        // Generated tables. The GOT is placed first so the TOC base covers
        // as much of it as possible; the branch lookup table sits right
        // after it, TOC-addressable by long-branch stubs.
        cursor = cursor.next_multiple_of(8);
        layout.got_address = cursor;
        layout.toc_base = cursor + TOC_BASE_OFFSET;
        cursor += tables.got;
        layout.branch_lookup_address = cursor;
        cursor += tables.branch_lookup;
        layout.plt_address = cursor;
        cursor += tables.plt;
        layout.local_plt_address = cursor;
        cursor += tables.local_plt;
        layout.iplt_address = cursor;
        cursor += tables.iplt;
        layout.function_descriptor_address = cursor;
        cursor += tables.function_descriptors;

        // Remaining allocatable data, TLS first so its extent is contiguous.
        cursor = cursor.next_multiple_of(A::WORD_BYTES);
        layout.tls_start = cursor;
        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if section.is_alloc() && section.is_tls() {
                    cursor = layout.place(
                        objects,
                        ObjectId(object_index as u32),
                        section_index,
                        cursor,
                    );
                }
            }
        }
        layout.tls_end = cursor;
        for (object_index, object) in objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                if section.is_alloc() && !section.is_tls() && !section.is_executable() {
                    cursor = layout.place(
                        objects,
                        ObjectId(object_index as u32),
                        section_index,
                        cursor,
                    );
                }
            }
        }

        layout
    }

    fn place(
        &mut self,
        objects: &[InputObject],
        object_id: ObjectId,
        section_index: usize,
        cursor: u64,
    ) -> u64 {
        let section = &objects[object_id.as_usize()].sections[section_index];
        let address = cursor.next_multiple_of(section.alignment.max(1));
        self.section_addresses[object_id.as_usize()][section_index] = Some(address);
        address + section.bytes.len() as u64
    }

    #[must_use]
    pub fn section_address(&self, object: ObjectId, section: usize) -> Option<u64> {
        self.section_addresses[object.as_usize()][section]
    }

    pub fn resolve_location(&self, location: Location) -> Result<u64> {
        self.section_address(location.object, location.section)
            .map(|address| address + location.offset)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Reference to unplaced section {} of {}",
                    location.section,
                    location.object
                )
            })
    }

    /// The link-time value of a symbol, before any function-descriptor or
    /// local-entry adjustment. Dynamic and undefined symbols resolve to 0.
    pub fn symbol_value(
        &self,
        objects: &[InputObject],
        symbols: &SymbolTable,
        symbol: SymbolRef,
    ) -> Result<u64> {
        match symbol {
            SymbolRef::Global(id) => {
                let sym = symbols.get(id);
                if sym.flags.contains(ValueFlags::ABSOLUTE) {
                    return Ok(sym.absolute_value);
                }
                match sym.definition {
                    Some(location) => self.resolve_location(location),
                    None => Ok(0),
                }
            }
            SymbolRef::Local { object, index } => {
                let local = objects[object.as_usize()].local_symbol(index)?;
                match local.section {
                    Some(section) => self.resolve_location(Location {
                        object,
                        section,
                        offset: local.offset,
                    }),
                    None => Ok(local.offset),
                }
            }
        }
    }

    /// The thread pointer value: TP points a fixed bias past the start of
    /// the initial TLS block.
    #[must_use]
    pub fn thread_pointer(&self) -> u64 {
        self.tls_start.wrapping_add(PPC_TP_OFFSET)
    }

    /// The dynamic-thread-vector base used for DTPREL values.
    #[must_use]
    pub fn dtv_base(&self) -> u64 {
        self.tls_start.wrapping_add(PPC_TLS_DTV_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Ppc64;
    use crate::model::InputSection;
    use crate::stub_group::code_section_order;
    use ppclink_utils::elf::SectionFlags;
    use ppclink_utils::elf::shf;

    fn section(flags: SectionFlags, len: usize, alignment: u64) -> InputSection {
        InputSection {
            name: String::new(),
            bytes: vec![0; len],
            flags,
            alignment,
            relocations: Vec::new(),
        }
    }

    fn test_objects() -> Vec<InputObject> {
        let exec = SectionFlags::empty().with(shf::ALLOC).with(shf::EXECINSTR);
        let data = SectionFlags::empty().with(shf::ALLOC).with(shf::WRITE);
        let tls = data.with(shf::TLS);
        vec![InputObject {
            name: "a.o".to_owned(),
            sections: vec![
                section(exec, 0x100, 4),
                section(data, 0x20, 8),
                section(tls, 0x10, 8),
            ],
            local_symbols: Vec::new(),
            attributes: Default::default(),
        }]
    }

    #[test]
    fn test_code_then_tables_then_data() {
        let objects = test_objects();
        let order = code_section_order(&objects);
        let groups = vec![StubGroup {
            sections: 0..1,
            owner: 0,
        }];
        let layout = OutputLayout::compute::<Ppc64>(
            &objects,
            &order,
            &groups,
            &[0x40],
            TableSizes {
                got: 0x100,
                ..Default::default()
            },
            0x1000_0000,
        );
        assert_eq!(layout.section_address(ObjectId(0), 0), Some(0x1000_0000));
        // Stub table directly after the owner section.
        assert_eq!(layout.stub_table_addresses, vec![0x1000_0100]);
        assert_eq!(layout.got_address, 0x1000_0140);
        assert_eq!(layout.toc_base, 0x1000_0140 + TOC_BASE_OFFSET);
        // TLS precedes the plain data section.
        let tls = layout.section_address(ObjectId(0), 2).unwrap();
        let data = layout.section_address(ObjectId(0), 1).unwrap();
        assert!(tls < data);
        assert_eq!(layout.tls_start, tls);
    }

    #[test]
    fn test_stub_growth_moves_later_sections() {
        let objects = test_objects();
        let order = code_section_order(&objects);
        let groups = vec![StubGroup {
            sections: 0..1,
            owner: 0,
        }];
        let small = OutputLayout::compute::<Ppc64>(
            &objects,
            &order,
            &groups,
            &[0x10],
            TableSizes::default(),
            0x1000_0000,
        );
        let large = OutputLayout::compute::<Ppc64>(
            &objects,
            &order,
            &groups,
            &[0x50],
            TableSizes::default(),
            0x1000_0000,
        );
        assert_eq!(large.got_address - small.got_address, 0x40);
    }
}
